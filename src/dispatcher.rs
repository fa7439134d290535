//! 事件分发器 - 负责将入站消息路由到每个已注册的回调集
//! Event Dispatcher - Routes inbound messages to every registered callback set
//!
//! Each channel class keeps a registration list. Subscribing returns a
//! [`Registration`] guard; dropping it removes the callbacks, so a torn-down
//! view is never called again.
//!
//! 每个通道类别维护一个注册列表。订阅返回 [`Registration`] 守卫；
//! 丢弃它会移除回调，因此已销毁的视图不会再被调用。

use crate::{
    channel::ChannelClass,
    protocol::{Entry, EntryId, InboundMessage, ReactionUpdate},
};
use parking_lot::Mutex;
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::trace;

/// Receives channel events. Every method defaults to a no-op, so a consumer
/// only implements the kinds it cares about.
///
/// 接收通道事件。每个方法默认都是空操作，消费者只需实现关心的类型。
pub trait ChannelCallbacks: Send + Sync {
    fn on_entry(&self, _entry: &Entry) {}

    fn on_entry_removed(&self, _id: &EntryId) {}

    fn on_entry_reaction_changed(&self, _update: &ReactionUpdate) {}
}

type EntryFn = Box<dyn Fn(&Entry) + Send + Sync>;
type RemovedFn = Box<dyn Fn(&EntryId) + Send + Sync>;
type ReactionFn = Box<dyn Fn(&ReactionUpdate) + Send + Sync>;

/// Closure-based [`ChannelCallbacks`]. Unset slots ignore their kind.
///
/// 基于闭包的 [`ChannelCallbacks`]。未设置的槽位忽略对应类型。
#[derive(Default)]
pub struct CallbackSet {
    on_entry: Option<EntryFn>,
    on_entry_removed: Option<RemovedFn>,
    on_entry_reaction_changed: Option<ReactionFn>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_entry(mut self, f: impl Fn(&Entry) + Send + Sync + 'static) -> Self {
        self.on_entry = Some(Box::new(f));
        self
    }

    pub fn on_entry_removed(mut self, f: impl Fn(&EntryId) + Send + Sync + 'static) -> Self {
        self.on_entry_removed = Some(Box::new(f));
        self
    }

    pub fn on_entry_reaction_changed(
        mut self,
        f: impl Fn(&ReactionUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.on_entry_reaction_changed = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSet")
            .field("on_entry", &self.on_entry.is_some())
            .field("on_entry_removed", &self.on_entry_removed.is_some())
            .field(
                "on_entry_reaction_changed",
                &self.on_entry_reaction_changed.is_some(),
            )
            .finish()
    }
}

impl ChannelCallbacks for CallbackSet {
    fn on_entry(&self, entry: &Entry) {
        if let Some(f) = &self.on_entry {
            f(entry);
        }
    }

    fn on_entry_removed(&self, id: &EntryId) {
        if let Some(f) = &self.on_entry_removed {
            f(id);
        }
    }

    fn on_entry_reaction_changed(&self, update: &ReactionUpdate) {
        if let Some(f) = &self.on_entry_reaction_changed {
            f(update);
        }
    }
}

type Route = (u64, Arc<dyn ChannelCallbacks>);

/// Routes channel events to registered callbacks.
///
/// 将通道事件路由到已注册的回调。
pub struct EventDispatcher {
    routes: [Mutex<Vec<Route>>; ChannelClass::ALL.len()],
    next_id: AtomicU64,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("EventDispatcher");
        for class in ChannelClass::ALL {
            dbg.field(class.wire_name(), &self.registrations(class));
        }
        dbg.finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self {
            routes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds `callbacks` to the registration list of `class`.
    ///
    /// 将 `callbacks` 加入 `class` 的注册列表。
    pub fn subscribe(
        self: &Arc<Self>,
        class: ChannelClass,
        callbacks: Arc<dyn ChannelCallbacks>,
    ) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes[class.index()].lock().push((id, callbacks));
        trace!(channel = %class, id, "Callbacks registered");
        Registration {
            dispatcher: Arc::clone(self),
            class,
            id: Some(id),
        }
    }

    /// Replaces every registration on `class` with `callbacks`. The last
    /// registration wins; earlier guards become inert.
    ///
    /// 用 `callbacks` 替换 `class` 上的所有注册。最后一次注册生效；之前的守卫失效。
    pub fn register_callbacks(
        self: &Arc<Self>,
        class: ChannelClass,
        callbacks: Arc<dyn ChannelCallbacks>,
    ) -> Registration {
        self.routes[class.index()].lock().clear();
        self.subscribe(class, callbacks)
    }

    /// Number of live registrations on `class`.
    pub fn registrations(&self, class: ChannelClass) -> usize {
        self.routes[class.index()].lock().len()
    }

    fn is_registered(&self, class: ChannelClass, id: u64) -> bool {
        self.routes[class.index()]
            .lock()
            .iter()
            .any(|(route_id, _)| *route_id == id)
    }

    fn unregister(&self, class: ChannelClass, id: u64) {
        let mut routes = self.routes[class.index()].lock();
        routes.retain(|(route_id, _)| *route_id != id);
        trace!(channel = %class, id, remaining = routes.len(), "Callbacks unregistered");
    }

    /// Delivers `message` to every callback set registered on `class`, in
    /// registration order. Returns the number of deliveries.
    ///
    /// The list is snapshotted before delivery and no lock is held while a
    /// callback runs. A registration dropped by an earlier callback in the same
    /// pass is skipped.
    ///
    /// 按注册顺序将 `message` 投递给 `class` 上注册的每个回调集，返回投递次数。
    /// 投递前对列表做快照，回调运行时不持有锁。同一轮中被先前回调移除的注册会被跳过。
    pub fn dispatch(&self, class: ChannelClass, message: &InboundMessage) -> usize {
        self.dispatch_while(class, message, || true)
    }

    /// Like [`dispatch`](Self::dispatch), but checks `still_current` before
    /// each callback and stops the pass once it returns false.
    ///
    /// 与 [`dispatch`](Self::dispatch) 相同，但在每个回调之前检查 `still_current`，
    /// 一旦其返回 false 即停止本轮投递。
    pub fn dispatch_while(
        &self,
        class: ChannelClass,
        message: &InboundMessage,
        still_current: impl Fn() -> bool,
    ) -> usize {
        if !matches!(
            message,
            InboundMessage::EntryCreated(_)
                | InboundMessage::EntryRemoved(_)
                | InboundMessage::EntryReactionChanged(_)
        ) {
            trace!(channel = %class, kind = message.kind_name(), "Nothing to dispatch");
            return 0;
        }

        let snapshot: Vec<Route> = self.routes[class.index()].lock().clone();
        let mut delivered = 0;
        for (id, callbacks) in snapshot {
            if !still_current() {
                trace!(channel = %class, delivered, "Dispatch stopped, source superseded");
                break;
            }
            if !self.is_registered(class, id) {
                continue;
            }
            deliver(callbacks.as_ref(), message);
            delivered += 1;
        }
        trace!(channel = %class, kind = message.kind_name(), delivered, "Message dispatched");
        delivered
    }
}

fn deliver(callbacks: &dyn ChannelCallbacks, message: &InboundMessage) {
    match message {
        InboundMessage::EntryCreated(entry) => callbacks.on_entry(entry),
        InboundMessage::EntryRemoved(id) => callbacks.on_entry_removed(id),
        InboundMessage::EntryReactionChanged(update) => callbacks.on_entry_reaction_changed(update),
        _ => {}
    }
}

/// Keeps a callback set registered. Dropping it unsubscribes.
///
/// 保持回调集处于注册状态。丢弃即取消订阅。
#[must_use = "dropping a Registration unsubscribes immediately"]
pub struct Registration {
    dispatcher: Arc<EventDispatcher>,
    class: ChannelClass,
    id: Option<u64>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("class", &self.class)
            .field("id", &self.id)
            .finish()
    }
}

impl Registration {
    pub fn class(&self) -> ChannelClass {
        self.class
    }

    /// Whether the callbacks are still on the list. False after a
    /// `register_callbacks` on the same class replaced them.
    pub fn is_active(&self) -> bool {
        self.id
            .is_some_and(|id| self.dispatcher.is_registered(self.class, id))
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.id.take() {
            self.dispatcher.unregister(self.class, id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn counting() -> (Arc<AtomicUsize>, Arc<dyn ChannelCallbacks>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let callbacks = CallbackSet::new().on_entry(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (hits, Arc::new(callbacks))
    }

    fn created(id: &str) -> InboundMessage {
        InboundMessage::EntryCreated(Entry::new(id))
    }

    #[test]
    fn every_registration_receives_the_event() {
        let dispatcher = EventDispatcher::new();
        let (a, cb_a) = counting();
        let (b, cb_b) = counting();
        let _ra = dispatcher.subscribe(ChannelClass::Local, cb_a);
        let _rb = dispatcher.subscribe(ChannelClass::Local, cb_b);

        assert_eq!(dispatcher.dispatch(ChannelClass::Local, &created("1")), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_registration_is_not_called() {
        let dispatcher = EventDispatcher::new();
        let (hits, callbacks) = counting();
        let registration = dispatcher.subscribe(ChannelClass::Global, callbacks);
        drop(registration);

        assert_eq!(dispatcher.dispatch(ChannelClass::Global, &created("1")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.registrations(ChannelClass::Global), 0);
    }

    #[test]
    fn classes_are_isolated() {
        let dispatcher = EventDispatcher::new();
        let (hits, callbacks) = counting();
        let _r = dispatcher.subscribe(ChannelClass::Home, callbacks);

        assert_eq!(dispatcher.dispatch(ChannelClass::Local, &created("1")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn register_callbacks_last_write_wins() {
        let dispatcher = EventDispatcher::new();
        let (first, cb_first) = counting();
        let (second, cb_second) = counting();
        let stale = dispatcher.register_callbacks(ChannelClass::Local, cb_first);
        let _current = dispatcher.register_callbacks(ChannelClass::Local, cb_second);

        dispatcher.dispatch(ChannelClass::Local, &created("1"));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        // The replaced guard must not remove the current registration.
        drop(stale);
        assert_eq!(dispatcher.registrations(ChannelClass::Local), 1);
    }

    #[test]
    fn non_entry_kinds_are_not_dispatched() {
        let dispatcher = EventDispatcher::new();
        let (hits, callbacks) = counting();
        let _r = dispatcher.subscribe(ChannelClass::Local, callbacks);

        for message in [
            InboundMessage::Connected,
            InboundMessage::Liveness,
            InboundMessage::Unknown("later".into()),
        ] {
            assert_eq!(dispatcher.dispatch(ChannelClass::Local, &message), 0);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn removal_routes_to_removal_callback_only() {
        let dispatcher = EventDispatcher::new();
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = removed.clone();
        let callbacks = CallbackSet::new()
            .on_entry(|_| panic!("entry callback must not fire"))
            .on_entry_removed(move |id| sink.lock().push(id.clone()));
        let _r = dispatcher.subscribe(ChannelClass::Local, Arc::new(callbacks));

        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryRemoved(EntryId::from("x")),
        );
        assert_eq!(*removed.lock(), vec![EntryId::from("x")]);
    }

    #[test]
    fn dispatch_while_stops_once_the_source_is_superseded() {
        let dispatcher = EventDispatcher::new();
        let current = Arc::new(AtomicBool::new(true));
        let flip = current.clone();
        let _first = dispatcher.subscribe(
            ChannelClass::Home,
            Arc::new(CallbackSet::new().on_entry(move |_| {
                flip.store(false, Ordering::SeqCst);
            })),
        );
        let (later, cb_later) = counting();
        let _second = dispatcher.subscribe(ChannelClass::Home, cb_later);

        let delivered = dispatcher.dispatch_while(ChannelClass::Home, &created("1"), || {
            current.load(Ordering::SeqCst)
        });

        assert_eq!(delivered, 1);
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }
}
