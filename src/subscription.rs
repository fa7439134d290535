//! Per-view subscription handles.
//!
//! A [`SubscriptionHandle`] is what a consuming view holds. While active it
//! counts as one subscriber of its channel class and holds an attachment to
//! the shared bridge for its routing scope. Deactivating or dropping it undoes
//! both.
//!
//! 每个视图的订阅句柄。消费视图持有 [`SubscriptionHandle`]。处于活动状态时，
//! 它计为其通道类别的一个订阅者，并附着到其路由范围的共享桥上。停用或丢弃它会撤销这两者。

pub use crate::bridge::NewEntryFn;

use crate::{
    bridge::{BridgeAttachment, BridgeTable, RoutingScope},
    channel::ChannelClass,
    error::{Error, Result},
    protocol::Entry,
    session::CredentialProvider,
    supervisor::ConnectionSupervisor,
};
use std::{fmt, sync::Arc};
use tokio::sync::watch;
use tracing::debug;

/// Options a view subscribes with.
///
/// 视图订阅时使用的选项。
#[derive(Clone)]
pub struct SubscriptionOptions {
    pub enabled: bool,
    pub on_new_entry: Option<NewEntryFn>,
    pub routing_scope: RoutingScope,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            on_new_entry: None,
            routing_scope: RoutingScope::Global,
        }
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("enabled", &self.enabled)
            .field("on_new_entry", &self.on_new_entry.is_some())
            .field("routing_scope", &self.routing_scope)
            .finish()
    }
}

impl SubscriptionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn on_new_entry(mut self, f: impl Fn(&Entry) + Send + Sync + 'static) -> Self {
        self.on_new_entry = Some(Arc::new(f));
        self
    }

    pub fn routing_scope(mut self, scope: RoutingScope) -> Self {
        self.routing_scope = scope;
        self
    }
}

/// One view's interest in a channel class. Not shared; drop it on unmount.
///
/// 一个视图对某个通道类别的关注。不共享；卸载时丢弃。
pub struct SubscriptionHandle {
    class: ChannelClass,
    options: SubscriptionOptions,
    supervisor: Arc<ConnectionSupervisor>,
    bridges: Arc<BridgeTable>,
    credentials: Arc<dyn CredentialProvider>,
    connected: watch::Receiver<bool>,
    /// Present exactly while this handle is counted as a subscriber.
    attachment: Option<BridgeAttachment>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("class", &self.class)
            .field("options", &self.options)
            .field("active", &self.is_active())
            .field("connected", &self.connected())
            .finish()
    }
}

impl SubscriptionHandle {
    pub(crate) fn new(
        class: ChannelClass,
        options: SubscriptionOptions,
        supervisor: Arc<ConnectionSupervisor>,
        bridges: Arc<BridgeTable>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let connected = supervisor.registry().watch_connected(class);
        let mut handle = Self {
            class,
            options,
            supervisor,
            bridges,
            credentials,
            connected,
            attachment: None,
        };
        handle.refresh();
        handle
    }

    pub fn class(&self) -> ChannelClass {
        self.class
    }

    pub fn routing_scope(&self) -> &RoutingScope {
        &self.options.routing_scope
    }

    /// Whether this handle currently counts as a subscriber.
    pub fn is_active(&self) -> bool {
        self.attachment.is_some()
    }

    /// Whether the channel is open. Tracks the channel's own listener, not
    /// shared state.
    ///
    /// 通道是否已打开。跟踪通道自身的监听者，而不是共享状态。
    pub fn connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Waits for the next connected/disconnected transition and returns the
    /// new value.
    pub async fn changed(&mut self) -> Result<bool> {
        self.connected
            .changed()
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(*self.connected.borrow_and_update())
    }

    /// Waits until the channel is open.
    pub async fn wait_connected(&mut self) -> Result<()> {
        self.connected
            .wait_for(|connected| *connected)
            .await
            .map_err(|_| Error::ChannelClosed)?;
        Ok(())
    }

    fn check_guards(&self) -> Result<()> {
        if !self.options.enabled {
            return Err(Error::SubscriptionDisabled(self.class));
        }
        if self.class.requires_credential() && self.credentials.credential().is_none() {
            return Err(Error::CredentialRequired(self.class));
        }
        Ok(())
    }

    /// Re-evaluates the activation guards and activates or deactivates to
    /// match. Call after the credential changes. Returns whether the handle
    /// is active.
    ///
    /// 重新评估激活条件并相应地激活或停用。凭证变化后调用。返回句柄是否处于活动状态。
    pub fn refresh(&mut self) -> bool {
        match self.check_guards() {
            Ok(()) => self.activate(),
            Err(reason) => {
                if self.is_active() {
                    debug!(channel = %self.class, %reason, "Subscription deactivating");
                }
                self.deactivate();
            }
        }
        self.is_active()
    }

    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        self.options.enabled = enabled;
        self.refresh()
    }

    /// Opens the channel now, under the same guards as activation.
    ///
    /// 在与激活相同的条件下立即打开通道。
    pub fn connect(&mut self) -> Result<()> {
        self.check_guards()?;
        self.activate();
        self.supervisor.open(self.class)
    }

    /// Force-closes the channel, under the same guards as activation.
    ///
    /// 在与激活相同的条件下强制关闭通道。
    pub fn disconnect(&mut self) -> Result<()> {
        self.check_guards()?;
        self.supervisor.close(self.class, true);
        Ok(())
    }

    fn activate(&mut self) {
        if self.is_active() {
            return;
        }
        self.attachment = Some(self.bridges.attach(
            self.class,
            &self.options.routing_scope,
            self.options.on_new_entry.clone(),
        ));
        let subscribers = self.supervisor.retain(self.class);
        debug!(channel = %self.class, subscribers, "Subscription activated");
        if subscribers == 1 {
            self.supervisor.schedule_open(self.class);
        }
    }

    fn deactivate(&mut self) {
        if self.attachment.take().is_some() {
            let subscribers = self.supervisor.release(self.class);
            debug!(channel = %self.class, subscribers, "Subscription deactivated");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.deactivate();
    }
}
