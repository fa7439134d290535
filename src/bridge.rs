//! The state bridge: applies channel events to entry stores, idempotently.
//!
//! Subscribers that route the same channel class into the same store share
//! one bridge through a [`BridgeTable`], so each event mutates a store once no
//! matter how many views are watching.
//!
//! 状态桥：以幂等方式将通道事件应用到条目存储。
//! 将同一通道类别路由到同一存储的订阅者通过 [`BridgeTable`] 共享一个桥，
//! 因此无论有多少视图在观察，每个事件只修改存储一次。

use crate::{
    channel::ChannelClass,
    dispatcher::{ChannelCallbacks, EventDispatcher, Registration},
    protocol::{Entry, EntryId, ReactionAction, ReactionUpdate},
    store::{ColumnEntryStore, ColumnId, EntryStore},
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::trace;

/// Callback run for each entry a subscriber's bridge newly inserts.
pub type NewEntryFn = Arc<dyn Fn(&Entry) + Send + Sync>;

/// Where received entries land.
///
/// 接收到的条目的落点。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RoutingScope {
    /// The global aggregate store.
    /// 全局聚合存储。
    #[default]
    Global,
    /// A named partition of the column store.
    /// 列存储中的一个具名分区。
    Column(ColumnId),
}

/// Translates events into store mutations.
///
/// 将事件转换为存储变更。
#[derive(Debug, Clone)]
pub struct StateBridge {
    global: Arc<dyn EntryStore>,
    columns: Arc<dyn ColumnEntryStore>,
    scope: RoutingScope,
}

impl StateBridge {
    pub fn new(
        global: Arc<dyn EntryStore>,
        columns: Arc<dyn ColumnEntryStore>,
        scope: RoutingScope,
    ) -> Self {
        Self {
            global,
            columns,
            scope,
        }
    }

    pub fn scope(&self) -> &RoutingScope {
        &self.scope
    }

    /// Resolves the target store for the current event.
    fn target(&self) -> Arc<dyn EntryStore> {
        match &self.scope {
            RoutingScope::Global => Arc::clone(&self.global),
            RoutingScope::Column(column) => self.columns.column(column),
        }
    }

    /// Prepends `entry` unless it is already present. Returns whether it was
    /// inserted.
    pub fn apply_entry(&self, entry: &Entry) -> bool {
        let inserted = self.target().insert_if_absent(entry.clone());
        if !inserted {
            trace!(id = %entry.id, "Duplicate entry ignored");
        }
        inserted
    }

    /// Removes the entry if present. Returns whether it was.
    pub fn apply_removal(&self, id: &EntryId) -> bool {
        self.target().remove(id)
    }

    /// Merges a reaction change into the matching entry. An absent entry is
    /// not an error: its removal may have raced ahead of the reaction.
    ///
    /// 将反应变化合并到匹配的条目中。条目不存在不算错误：其删除可能先于反应事件到达。
    pub fn apply_reaction(&self, update: &ReactionUpdate) -> bool {
        let merged = self
            .target()
            .update(&update.id, &mut |entry| merge_reaction(entry, update));
        if !merged {
            trace!(id = %update.id, "Reaction for absent entry ignored");
        }
        merged
    }
}

fn merge_reaction(entry: &mut Entry, update: &ReactionUpdate) {
    match &update.counts {
        Some(counts) => entry.reactions = counts.clone(),
        None => match update.action {
            ReactionAction::Add => {
                *entry
                    .reactions
                    .entry(update.reaction_kind.clone())
                    .or_insert(0) += 1;
            }
            ReactionAction::Remove => {
                if let Some(count) = entry.reactions.get_mut(&update.reaction_kind) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        entry.reactions.remove(&update.reaction_kind);
                    }
                }
            }
        },
    }
    entry.reaction_assets.extend(
        update
            .display_assets
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
}

impl ChannelCallbacks for StateBridge {
    fn on_entry(&self, entry: &Entry) {
        self.apply_entry(entry);
    }

    fn on_entry_removed(&self, id: &EntryId) {
        self.apply_removal(id);
    }

    fn on_entry_reaction_changed(&self, update: &ReactionUpdate) {
        self.apply_reaction(update);
    }
}

/// One bridge plus the new-entry hooks of every subscriber sharing it.
///
/// 一个桥以及共享它的所有订阅者的新条目钩子。
struct SharedBridge {
    bridge: StateBridge,
    hooks: Mutex<Vec<(u64, NewEntryFn)>>,
    next_hook: AtomicU64,
}

impl SharedBridge {
    fn add_hook(&self, hook: NewEntryFn) -> u64 {
        let id = self.next_hook.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().push((id, hook));
        id
    }

    fn remove_hook(&self, id: u64) {
        self.hooks.lock().retain(|(hook_id, _)| *hook_id != id);
    }
}

impl ChannelCallbacks for SharedBridge {
    fn on_entry(&self, entry: &Entry) {
        if !self.bridge.apply_entry(entry) {
            return;
        }
        let hooks: Vec<NewEntryFn> = self
            .hooks
            .lock()
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            hook(entry);
        }
    }

    fn on_entry_removed(&self, id: &EntryId) {
        self.bridge.apply_removal(id);
    }

    fn on_entry_reaction_changed(&self, update: &ReactionUpdate) {
        self.bridge.apply_reaction(update);
    }
}

/// Keeps a shared bridge registered with the dispatcher.
struct BridgeLease {
    shared: Arc<SharedBridge>,
    registration: Registration,
}

type BridgeKey = (ChannelClass, RoutingScope);

/// Hands out shared bridges, one dispatcher registration per channel class
/// and routing scope. The registration lives as long as any attachment.
///
/// 分发共享桥：每个通道类别与路由范围组合对应一个分发器注册。只要仍有附着，注册就一直存在。
pub(crate) struct BridgeTable {
    dispatcher: Arc<EventDispatcher>,
    global: Arc<dyn EntryStore>,
    columns: Arc<dyn ColumnEntryStore>,
    leases: Mutex<HashMap<BridgeKey, Weak<BridgeLease>>>,
}

impl fmt::Debug for BridgeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeTable")
            .field("leases", &self.leases.lock().len())
            .finish_non_exhaustive()
    }
}

impl BridgeTable {
    pub(crate) fn new(
        dispatcher: Arc<EventDispatcher>,
        global: Arc<dyn EntryStore>,
        columns: Arc<dyn ColumnEntryStore>,
    ) -> Self {
        Self {
            dispatcher,
            global,
            columns,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Attaches one subscriber to the bridge for `class` and `scope`,
    /// registering the bridge if nobody holds a live one.
    ///
    /// 将一个订阅者附着到 `class` 与 `scope` 对应的桥上；若没有存活的桥则先注册一个。
    pub(crate) fn attach(
        &self,
        class: ChannelClass,
        scope: &RoutingScope,
        hook: Option<NewEntryFn>,
    ) -> BridgeAttachment {
        let lease = {
            let mut leases = self.leases.lock();
            leases.retain(|_, lease| lease.strong_count() > 0);
            let key = (class, scope.clone());
            let live = leases
                .get(&key)
                .and_then(Weak::upgrade)
                .filter(|lease| lease.registration.is_active());
            match live {
                Some(lease) => lease,
                None => {
                    let shared = Arc::new(SharedBridge {
                        bridge: StateBridge::new(
                            Arc::clone(&self.global),
                            Arc::clone(&self.columns),
                            scope.clone(),
                        ),
                        hooks: Mutex::new(Vec::new()),
                        next_hook: AtomicU64::new(1),
                    });
                    let registration = self.dispatcher.subscribe(class, shared.clone());
                    trace!(channel = %class, ?scope, "Shared bridge registered");
                    let lease = Arc::new(BridgeLease {
                        shared,
                        registration,
                    });
                    leases.insert(key, Arc::downgrade(&lease));
                    lease
                }
            }
        };
        let hook = hook.map(|hook| lease.shared.add_hook(hook));
        BridgeAttachment { lease, hook }
    }
}

/// One subscriber's hold on a shared bridge. Dropping it removes the
/// subscriber's hook; the last drop unregisters the bridge.
///
/// 一个订阅者对共享桥的持有。丢弃时移除该订阅者的钩子；最后一次丢弃会注销该桥。
pub(crate) struct BridgeAttachment {
    lease: Arc<BridgeLease>,
    hook: Option<u64>,
}

impl Drop for BridgeAttachment {
    fn drop(&mut self) {
        if let Some(id) = self.hook.take() {
            self.lease.shared.remove_hook(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dispatcher::CallbackSet,
        protocol::InboundMessage,
        store::{MemoryColumnStore, MemoryEntryStore},
    };
    use std::collections::BTreeMap;

    fn bridge(scope: RoutingScope) -> (Arc<MemoryEntryStore>, Arc<MemoryColumnStore>, StateBridge) {
        let global = Arc::new(MemoryEntryStore::new(100));
        let columns = Arc::new(MemoryColumnStore::new(100));
        let bridge = StateBridge::new(global.clone(), columns.clone(), scope);
        (global, columns, bridge)
    }

    fn reaction(id: &str, kind: &str, action: ReactionAction) -> ReactionUpdate {
        ReactionUpdate {
            id: EntryId::from(id),
            reaction_kind: kind.to_string(),
            action,
            counts: None,
            display_assets: BTreeMap::new(),
        }
    }

    #[test]
    fn created_created_removed_leaves_the_survivor() {
        let (global, _, bridge) = bridge(RoutingScope::Global);
        bridge.on_entry(&Entry::new("A"));
        bridge.on_entry(&Entry::new("B"));
        bridge.on_entry_removed(&EntryId::from("A"));
        assert_eq!(global.ids(), vec![EntryId::from("B")]);
    }

    #[test]
    fn duplicate_entry_is_stored_once() {
        let (global, _, bridge) = bridge(RoutingScope::Global);
        assert!(bridge.apply_entry(&Entry::new("A")));
        assert!(!bridge.apply_entry(&Entry::new("A")));
        assert_eq!(global.len(), 1);
    }

    #[test]
    fn removal_of_absent_entry_is_quiet() {
        let (_, _, bridge) = bridge(RoutingScope::Global);
        assert!(!bridge.apply_removal(&EntryId::from("ghost")));
    }

    #[test]
    fn reaction_for_absent_entry_does_not_insert() {
        let (global, _, bridge) = bridge(RoutingScope::Global);
        assert!(!bridge.apply_reaction(&reaction("ghost", "like", ReactionAction::Add)));
        assert!(global.is_empty());
    }

    #[test]
    fn reaction_add_and_remove_adjust_counts() {
        let (global, _, bridge) = bridge(RoutingScope::Global);
        bridge.apply_entry(&Entry::new("A"));
        bridge.apply_reaction(&reaction("A", "like", ReactionAction::Add));
        bridge.apply_reaction(&reaction("A", "like", ReactionAction::Add));
        bridge.apply_reaction(&reaction("A", "like", ReactionAction::Remove));
        assert_eq!(global.entries()[0].reactions.get("like"), Some(&1));

        bridge.apply_reaction(&reaction("A", "like", ReactionAction::Remove));
        assert!(global.entries()[0].reactions.is_empty());
    }

    #[test]
    fn server_counts_replace_local_counts_and_assets_merge() {
        let (global, _, bridge) = bridge(RoutingScope::Global);
        bridge.apply_entry(&Entry::new("A"));
        let mut update = reaction("A", ":blob:", ReactionAction::Add);
        update.counts = Some(BTreeMap::from([(":blob:".to_string(), 7)]));
        update.display_assets = BTreeMap::from([(":blob:".to_string(), "u".to_string())]);
        bridge.apply_reaction(&update);

        let entry = &global.entries()[0];
        assert_eq!(entry.reactions.get(":blob:"), Some(&7));
        assert_eq!(entry.reaction_assets.get(":blob:").map(String::as_str), Some("u"));
    }

    #[test]
    fn column_scope_routes_to_partition() {
        let column = ColumnId::new("deck-1");
        let (global, columns, bridge) = bridge(RoutingScope::Column(column.clone()));
        bridge.on_entry(&Entry::new("A"));

        assert!(global.is_empty());
        assert_eq!(columns.get(&column).map(|c| c.len()), Some(1));
    }

    fn bridge_table() -> (Arc<EventDispatcher>, Arc<MemoryEntryStore>, BridgeTable) {
        let dispatcher = EventDispatcher::new();
        let global = Arc::new(MemoryEntryStore::new(100));
        let table = BridgeTable::new(
            dispatcher.clone(),
            global.clone(),
            Arc::new(MemoryColumnStore::new(100)),
        );
        (dispatcher, global, table)
    }

    fn counting_hook() -> (Arc<std::sync::atomic::AtomicUsize>, NewEntryFn) {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = count.clone();
        let hook: NewEntryFn = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (count, hook)
    }

    #[test]
    fn shared_scope_applies_each_event_once() {
        let (dispatcher, global, table) = bridge_table();
        let _first = table.attach(ChannelClass::Local, &RoutingScope::Global, None);
        let _second = table.attach(ChannelClass::Local, &RoutingScope::Global, None);
        assert_eq!(dispatcher.registrations(ChannelClass::Local), 1);

        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryCreated(Entry::new("A")),
        );
        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryReactionChanged(reaction("A", "like", ReactionAction::Add)),
        );
        assert_eq!(global.entries()[0].reactions.get("like"), Some(&1));

        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryReactionChanged(reaction("A", "like", ReactionAction::Remove)),
        );
        assert!(global.entries()[0].reactions.is_empty());
    }

    #[test]
    fn hooks_fire_once_each_and_only_for_new_entries() {
        let (dispatcher, _, table) = bridge_table();
        let (first_count, first_hook) = counting_hook();
        let (second_count, second_hook) = counting_hook();
        let _first = table.attach(ChannelClass::Global, &RoutingScope::Global, Some(first_hook));
        let _second = table.attach(ChannelClass::Global, &RoutingScope::Global, Some(second_hook));

        let created = InboundMessage::EntryCreated(Entry::new("A"));
        dispatcher.dispatch(ChannelClass::Global, &created);
        dispatcher.dispatch(ChannelClass::Global, &created);

        assert_eq!(first_count.load(Ordering::SeqCst), 1);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn last_detach_unregisters_the_bridge() {
        let (dispatcher, _, table) = bridge_table();
        let (count, hook) = counting_hook();
        let first = table.attach(ChannelClass::Local, &RoutingScope::Global, Some(hook));
        let second = table.attach(ChannelClass::Local, &RoutingScope::Global, None);
        let column = table.attach(
            ChannelClass::Local,
            &RoutingScope::Column(ColumnId::new("deck")),
            None,
        );
        assert_eq!(dispatcher.registrations(ChannelClass::Local), 2);

        drop(first);
        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryCreated(Entry::new("A")),
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.registrations(ChannelClass::Local), 2);

        drop(second);
        drop(column);
        assert_eq!(dispatcher.registrations(ChannelClass::Local), 0);
    }

    #[test]
    fn replaced_registration_gets_a_fresh_bridge() {
        let (dispatcher, global, table) = bridge_table();
        let _stale = table.attach(ChannelClass::Local, &RoutingScope::Global, None);
        let _other = dispatcher.register_callbacks(ChannelClass::Local, Arc::new(CallbackSet::new()));

        let _fresh = table.attach(ChannelClass::Local, &RoutingScope::Global, None);
        dispatcher.dispatch(
            ChannelClass::Local,
            &InboundMessage::EntryCreated(Entry::new("A")),
        );
        assert_eq!(global.entries().len(), 1);
    }
}
