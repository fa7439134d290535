//! The channel registry: one connection record per channel class.
//!
//! The registry is constructed explicitly and shared by `Arc`; separate
//! instances never share records, so tests can run side by side.
//!
//! 通道注册表：每个通道类别一条连接记录。
//! 注册表显式构造并通过 `Arc` 共享；不同实例之间从不共享记录。

use crate::{
    channel::ChannelClass,
    supervisor::{link::ActiveTransport, state::LinkState},
    timer::TimerHandle,
};
use parking_lot::{Mutex, MutexGuard};
use tokio::{sync::watch, task::JoinHandle};

/// Mutable per-channel connection state.
///
/// Only the supervisor writes these fields. The lock is never held across an
/// `.await` or while a consumer callback runs.
///
/// 每个通道的可变连接状态。只有监督器写入这些字段。
/// 锁从不跨越 `.await` 持有，也不会在消费者回调运行时持有。
#[derive(Debug, Default)]
pub(crate) struct ConnectionRecord {
    pub(crate) state: LinkState,
    pub(crate) transport: Option<ActiveTransport>,
    pub(crate) reconnect_timer: Option<TimerHandle>,
    pub(crate) keepalive_timer: Option<TimerHandle>,
    pub(crate) subscriber_count: usize,
    pub(crate) connected: bool,
    /// Bumped for every transport; events from older transports are dropped.
    /// 每个传输递增一次；来自旧传输的事件会被丢弃。
    pub(crate) generation: u64,
    pub(crate) reconnects: u64,
    /// Task of the last transport shut down, until the next open picks it up.
    /// 最近一次被关闭的传输的任务，直到下一次打开接手。
    pub(crate) closing: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    /// Generation of the transport currently attached, if any.
    pub(crate) fn current_generation(&self) -> Option<u64> {
        self.transport.as_ref().map(|t| t.generation)
    }
}

/// Point-in-time view of a record.
///
/// 记录的某一时刻视图。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSnapshot {
    pub state: LinkState,
    pub subscriber_count: usize,
    pub connected: bool,
    pub has_transport: bool,
    pub reconnect_pending: bool,
    pub keepalive_running: bool,
    /// Number of transports opened by a reconnect timer.
    pub reconnects: u64,
}

#[derive(Debug)]
pub(crate) struct ChannelSlot {
    record: Mutex<ConnectionRecord>,
    connected_tx: watch::Sender<bool>,
}

impl ChannelSlot {
    fn new() -> Self {
        let (connected_tx, _) = watch::channel(false);
        Self {
            record: Mutex::new(ConnectionRecord::default()),
            connected_tx,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionRecord> {
        self.record.lock()
    }

    /// Publishes the connected flag to listeners, only on change.
    ///
    /// 仅在变化时向监听者发布连接标志。
    pub(crate) fn publish_connected(&self, connected: bool) {
        self.connected_tx.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }
}

/// Fixed table of connection records, one per [`ChannelClass`].
///
/// 连接记录的固定表，每个 [`ChannelClass`] 一条。
#[derive(Debug)]
pub struct ChannelRegistry {
    slots: [ChannelSlot; ChannelClass::ALL.len()],
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| ChannelSlot::new()),
        }
    }

    /// Returns the record slot for `class`. Never fails and never creates a
    /// second record.
    pub(crate) fn get(&self, class: ChannelClass) -> &ChannelSlot {
        &self.slots[class.index()]
    }

    pub fn snapshot(&self, class: ChannelClass) -> RecordSnapshot {
        let record = self.get(class).lock();
        RecordSnapshot {
            state: record.state,
            subscriber_count: record.subscriber_count,
            connected: record.connected,
            has_transport: record.transport.is_some(),
            reconnect_pending: record.reconnect_timer.is_some(),
            keepalive_running: record.keepalive_timer.is_some(),
            reconnects: record.reconnects,
        }
    }

    /// A listener on the connected flag of `class`. Dropping the receiver
    /// unsubscribes it.
    ///
    /// `class` 连接标志的监听者。丢弃接收端即取消订阅。
    pub fn watch_connected(&self, class: ChannelClass) -> watch::Receiver<bool> {
        self.get(class).connected_tx.subscribe()
    }

    pub fn subscriber_count(&self, class: ChannelClass) -> usize {
        self.get(class).lock().subscriber_count
    }

    pub fn is_connected(&self, class: ChannelClass) -> bool {
        self.get(class).lock().connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_class_starts_idle() {
        let registry = ChannelRegistry::new();
        for class in ChannelClass::ALL {
            let snapshot = registry.snapshot(class);
            assert_eq!(snapshot.state, LinkState::Idle);
            assert_eq!(snapshot.subscriber_count, 0);
            assert!(!snapshot.connected);
            assert!(!snapshot.has_transport);
        }
    }

    #[test]
    fn get_returns_the_same_record() {
        let registry = ChannelRegistry::new();
        registry.get(ChannelClass::Home).lock().subscriber_count = 3;
        assert_eq!(registry.subscriber_count(ChannelClass::Home), 3);
        assert_eq!(registry.subscriber_count(ChannelClass::Local), 0);
    }

    #[test]
    fn registries_are_independent() {
        let a = ChannelRegistry::new();
        let b = ChannelRegistry::new();
        a.get(ChannelClass::Global).lock().subscriber_count = 1;
        assert_eq!(b.subscriber_count(ChannelClass::Global), 0);
    }

    #[test]
    fn connected_listener_sees_only_changes() {
        let registry = ChannelRegistry::new();
        let mut rx = registry.watch_connected(ChannelClass::Local);
        let slot = registry.get(ChannelClass::Local);

        slot.publish_connected(false);
        assert!(!rx.has_changed().unwrap());

        slot.publish_connected(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }
}
