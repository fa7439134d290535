//! The multiplexer facade and its builder.
//!
//! 多路复用器门面及其构建器。

use crate::{
    bridge::BridgeTable,
    channel::ChannelClass,
    config::Config,
    dispatcher::EventDispatcher,
    registry::{ChannelRegistry, RecordSnapshot},
    session::{Anonymous, AuthenticationState, CredentialProvider, SessionGuard},
    store::{ColumnEntryStore, EntryStore, MemoryColumnStore, MemoryEntryStore},
    subscription::{SubscriptionHandle, SubscriptionOptions},
    supervisor::ConnectionSupervisor,
    transport::{Connector, WsConnector},
};
use std::sync::Arc;

/// Builder for a [`Multiplexer`]. Anything not set falls back to a default:
/// the WebSocket connector, no credential and in-memory stores.
///
/// [`Multiplexer`] 的构建器。未设置的部分使用默认值：WebSocket 连接器、无凭证以及内存存储。
#[derive(Debug, Default)]
pub struct MultiplexerBuilder {
    config: Config,
    connector: Option<Arc<dyn Connector>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    global: Option<Arc<dyn EntryStore>>,
    columns: Option<Arc<dyn ColumnEntryStore>>,
}

impl MultiplexerBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn global_store(mut self, store: Arc<dyn EntryStore>) -> Self {
        self.global = Some(store);
        self
    }

    pub fn column_store(mut self, store: Arc<dyn ColumnEntryStore>) -> Self {
        self.columns = Some(store);
        self
    }

    pub fn build(self) -> Multiplexer {
        let max_entries = self.config.store.max_entries;
        let config = Arc::new(self.config);
        let registry = Arc::new(ChannelRegistry::new());
        let dispatcher = EventDispatcher::new();
        let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector));
        let credentials = self.credentials.unwrap_or_else(|| Arc::new(Anonymous));
        let global = self
            .global
            .unwrap_or_else(|| Arc::new(MemoryEntryStore::new(max_entries)));
        let columns = self
            .columns
            .unwrap_or_else(|| Arc::new(MemoryColumnStore::new(max_entries)));

        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&dispatcher),
            connector,
            Arc::clone(&credentials),
            Arc::clone(&config),
        );
        let bridges = Arc::new(BridgeTable::new(
            Arc::clone(&dispatcher),
            Arc::clone(&global),
            Arc::clone(&columns),
        ));

        Multiplexer {
            config,
            registry,
            dispatcher,
            supervisor,
            bridges,
            credentials,
            global,
            columns,
        }
    }
}

/// One live-update client: every channel class, its supervisor and the stores
/// entries land in. Cheap to share by `Arc`; independent instances never share
/// connection state.
///
/// 一个实时更新客户端：包含所有通道类别、其监督器以及条目写入的存储。
/// 可通过 `Arc` 低成本共享；独立实例之间从不共享连接状态。
#[derive(Debug)]
pub struct Multiplexer {
    config: Arc<Config>,
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<EventDispatcher>,
    supervisor: Arc<ConnectionSupervisor>,
    bridges: Arc<BridgeTable>,
    credentials: Arc<dyn CredentialProvider>,
    global: Arc<dyn EntryStore>,
    columns: Arc<dyn ColumnEntryStore>,
}

impl Multiplexer {
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::default()
    }

    /// Creates a subscription handle and activates it if its guards allow.
    /// Must be called within a tokio runtime: the first subscriber of a class
    /// schedules the open as a task.
    ///
    /// 创建订阅句柄，并在条件允许时激活它。必须在 tokio 运行时内调用：
    /// 某类别的第一个订阅者会将打开操作调度为任务。
    pub fn subscribe(
        &self,
        class: ChannelClass,
        options: SubscriptionOptions,
    ) -> SubscriptionHandle {
        SubscriptionHandle::new(
            class,
            options,
            Arc::clone(&self.supervisor),
            Arc::clone(&self.bridges),
            Arc::clone(&self.credentials),
        )
    }

    /// Starts the task that closes credentialed channels on logout and
    /// reopens them on login. The task stops when the guard is dropped.
    pub fn spawn_session_guard(&self, auth: Arc<dyn AuthenticationState>) -> SessionGuard {
        SessionGuard::spawn(Arc::clone(&self.supervisor), auth)
    }

    pub fn snapshot(&self, class: ChannelClass) -> RecordSnapshot {
        self.registry.snapshot(class)
    }

    pub fn is_connected(&self, class: ChannelClass) -> bool {
        self.registry.is_connected(class)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn global_store(&self) -> &Arc<dyn EntryStore> {
        &self.global
    }

    pub fn column_store(&self) -> &Arc<dyn ColumnEntryStore> {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::StoreConfig, protocol::Entry, transport::mock::MockConnector};

    #[test]
    fn default_stores_are_sized_from_config() {
        let mux = Multiplexer::builder()
            .config(Config {
                store: StoreConfig { max_entries: 2 },
                ..Config::default()
            })
            .connector(MockConnector::new())
            .build();

        for id in ["a", "b", "c"] {
            mux.global_store().prepend(Entry::new(id));
        }
        assert_eq!(mux.global_store().entries().len(), 2);
        assert_eq!(mux.config().store.max_entries, 2);
    }

    #[test]
    fn instances_do_not_share_records() {
        let first = Multiplexer::builder().connector(MockConnector::new()).build();
        let second = Multiplexer::builder().connector(MockConnector::new()).build();

        first.supervisor().retain(ChannelClass::Local);
        assert_eq!(first.registry().subscriber_count(ChannelClass::Local), 1);
        assert_eq!(second.registry().subscriber_count(ChannelClass::Local), 0);
    }
}
