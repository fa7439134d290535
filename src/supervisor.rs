//! The connection supervisor: opens and closes the live transport of each
//! channel class, owns the reconnect and keepalive timers, and runs the
//! per-channel state machine.
//!
//! 连接监督器：打开和关闭每个通道类别的实时传输，拥有重连和保活定时器，
//! 并运行每个通道的状态机。

pub(crate) mod link;
pub mod state;

use crate::{
    channel::{ChannelClass, resolve_endpoint},
    config::Config,
    dispatcher::EventDispatcher,
    error::{Error, Result},
    protocol::{InboundMessage, OutboundMessage},
    registry::{ChannelRegistry, ConnectionRecord},
    session::CredentialProvider,
    timer::TimerHandle,
    transport::Connector,
};
use link::{ActiveTransport, LinkCommand};
use state::{LinkState, transition};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Owner of every channel's transport and timers.
///
/// 每个通道传输和定时器的所有者。
#[derive(Debug)]
pub struct ConnectionSupervisor {
    registry: Arc<ChannelRegistry>,
    dispatcher: Arc<EventDispatcher>,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialProvider>,
    config: Arc<Config>,
}

/// Logs a transition the supervisor's own bookkeeping guarantees is legal.
fn apply(class: ChannelClass, record: &mut ConnectionRecord, next: LinkState) {
    if let Err(e) = transition(class, &mut record.state, next) {
        error!(channel = %class, error = %e, "Record left in unexpected state");
    }
}

impl ConnectionSupervisor {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        dispatcher: Arc<EventDispatcher>,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialProvider>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            dispatcher,
            connector,
            credentials,
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the transport for `class`.
    ///
    /// Idempotent: does nothing while a transport is opening or open. Does
    /// nothing without demand. A credentialed class without a credential is
    /// refused. A pending reconnect is pre-empted.
    ///
    /// 打开 `class` 的传输。幂等：传输正在打开或已打开时不做任何事。
    /// 没有需求时不做任何事。需要凭证但没有凭证的类别会被拒绝。待处理的重连会被抢占。
    pub fn open(self: &Arc<Self>, class: ChannelClass) -> Result<()> {
        let credential = if class.requires_credential() {
            match self.credentials.credential() {
                Some(token) => Some(token),
                None => {
                    debug!(channel = %class, "No credential; not opening");
                    return Err(Error::CredentialRequired(class));
                }
            }
        } else {
            None
        };
        let endpoint = resolve_endpoint(&self.config.endpoint, class, credential.as_deref())?;

        let slot = self.registry.get(class);
        let mut record = slot.lock();
        if record.transport.is_some() {
            trace!(channel = %class, state = record.state.name(), "Transport already present");
            return Ok(());
        }
        if record.subscriber_count == 0 {
            debug!(channel = %class, "No subscribers; not opening");
            Self::settle_idle(class, &mut record);
            return Ok(());
        }
        if let Some(timer) = record.reconnect_timer.take() {
            debug!(channel = %class, "Pending reconnect pre-empted by open");
            timer.cancel();
        }

        transition(class, &mut record.state, LinkState::Connecting)?;
        record.generation += 1;
        let generation = record.generation;
        let predecessor = record.closing.take().filter(|task| !task.is_finished());
        let (commands, rx) = mpsc::channel(self.config.protocol.outbound_capacity);
        let task = tokio::spawn(Arc::clone(self).run_link(
            class,
            generation,
            endpoint,
            predecessor,
            rx,
        ));
        record.transport = Some(ActiveTransport {
            generation,
            commands,
            task,
        });
        info!(channel = %class, generation, "Live channel connecting");
        Ok(())
    }

    /// Schedules [`open`](Self::open) as a follow-up task instead of running it
    /// inline. The deferred call re-checks demand, so a subscriber that leaves
    /// before it runs opens nothing.
    ///
    /// 将 [`open`](Self::open) 调度为后续任务而非内联运行。延迟调用会重新检查需求，
    /// 因此在其运行前离开的订阅者不会打开任何东西。
    pub fn schedule_open(self: &Arc<Self>, class: ChannelClass) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = supervisor.open(class) {
                debug!(channel = %class, error = %e, "Deferred open skipped");
            }
        });
    }

    /// Closes the transport for `class` if `force` is set or nobody is
    /// subscribed. Cancels both timers and marks the channel disconnected.
    ///
    /// 若设置了 `force` 或无人订阅，则关闭 `class` 的传输。取消两个定时器并将通道标记为断开。
    pub fn close(&self, class: ChannelClass, force: bool) {
        let slot = self.registry.get(class);
        let mut record = slot.lock();
        if !force && record.subscriber_count > 0 {
            trace!(
                channel = %class,
                subscribers = record.subscriber_count,
                "Close skipped; channel still in demand"
            );
            return;
        }

        if let Some(timer) = record.reconnect_timer.take() {
            timer.cancel();
        }
        if let Some(timer) = record.keepalive_timer.take() {
            timer.cancel();
        }
        let was_connected = std::mem::replace(&mut record.connected, false);
        let had_transport = match record.transport.take() {
            Some(transport) => {
                record.closing = Some(transport.shutdown(was_connected));
                true
            }
            None => false,
        };
        apply(class, &mut record, LinkState::Idle);
        drop(record);

        slot.publish_connected(false);
        if had_transport {
            info!(channel = %class, force, "Live channel closed");
        }
    }

    /// Registers one more subscriber. Returns the new count.
    ///
    /// 增加一个订阅者。返回新的计数。
    pub fn retain(&self, class: ChannelClass) -> usize {
        let mut record = self.registry.get(class).lock();
        record.subscriber_count += 1;
        trace!(channel = %class, subscribers = record.subscriber_count, "Subscriber added");
        record.subscriber_count
    }

    /// Drops one subscriber. When the last one leaves the transport is
    /// force-closed at once. Returns the remaining count.
    ///
    /// 移除一个订阅者。最后一个离开时立即强制关闭传输。返回剩余计数。
    pub fn release(&self, class: ChannelClass) -> usize {
        let remaining = {
            let mut record = self.registry.get(class).lock();
            if record.subscriber_count == 0 {
                warn!(channel = %class, "Release without a matching retain");
                return 0;
            }
            record.subscriber_count -= 1;
            record.subscriber_count
        };
        trace!(channel = %class, subscribers = remaining, "Subscriber removed");
        if remaining == 0 {
            self.close(class, true);
        }
        remaining
    }

    /// Force-closes every credentialed channel regardless of subscriber
    /// count. Called when the session ends.
    ///
    /// 无论订阅者数量如何，强制关闭所有需要凭证的通道。会话结束时调用。
    pub fn invalidate_credentials(&self) {
        for class in ChannelClass::ALL {
            if class.requires_credential() {
                self.close(class, true);
            }
        }
        info!("Credentialed channels closed after credential invalidation");
    }

    /// Schedules an open for every credentialed channel that still has
    /// subscribers. Called when a session starts.
    ///
    /// 为每个仍有订阅者的需要凭证的通道调度打开。会话开始时调用。
    pub fn resume_credentialed(self: &Arc<Self>) {
        for class in ChannelClass::ALL {
            if class.requires_credential() && self.registry.subscriber_count(class) > 0 {
                self.schedule_open(class);
            }
        }
    }

    fn settle_idle(class: ChannelClass, record: &mut ConnectionRecord) {
        if record.transport.is_none() && record.reconnect_timer.is_none() {
            apply(class, record, LinkState::Idle);
        }
    }

    fn is_current(&self, class: ChannelClass, generation: u64) -> bool {
        self.registry.get(class).lock().current_generation() == Some(generation)
    }

    /// Decodes and routes one text frame. Malformed frames are logged and
    /// dropped; the link stays up.
    ///
    /// 解码并路由一个文本帧。格式错误的帧会被记录并丢弃；链路保持连接。
    pub(crate) fn handle_frame(self: &Arc<Self>, class: ChannelClass, generation: u64, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(channel = %class, generation, error = %e, "Dropping malformed message");
                return;
            }
        };

        match &message {
            InboundMessage::Connected => self.handle_connected(class, generation),
            InboundMessage::Liveness => trace!(channel = %class, "Liveness response"),
            InboundMessage::ServerError(data) => {
                warn!(channel = %class, %data, "Server reported an error");
            }
            InboundMessage::Unknown(kind) => {
                trace!(channel = %class, kind = kind.as_str(), "Ignoring unknown message kind");
            }
            InboundMessage::EntryCreated(_)
            | InboundMessage::EntryRemoved(_)
            | InboundMessage::EntryReactionChanged(_) => {
                // Re-checked per callback: a callback may close or reopen the channel.
                // 每个回调前重新检查：回调可能关闭或重新打开通道。
                if self.is_current(class, generation) {
                    self.dispatcher
                        .dispatch_while(class, &message, || self.is_current(class, generation));
                } else {
                    trace!(channel = %class, generation, "Dropping message from superseded transport");
                }
            }
        }
    }

    fn handle_connected(self: &Arc<Self>, class: ChannelClass, generation: u64) {
        let slot = self.registry.get(class);
        let mut record = slot.lock();
        if record.current_generation() != Some(generation) {
            trace!(channel = %class, generation, "Ignoring acknowledgement from superseded transport");
            return;
        }
        if record.connected {
            trace!(channel = %class, "Duplicate acknowledgement");
            return;
        }
        apply(class, &mut record, LinkState::Open);
        record.connected = true;

        let Some(commands) = record.transport.as_ref().map(|t| t.commands.clone()) else {
            return;
        };
        record.keepalive_timer = Some(TimerHandle::every(
            self.config.timing.keepalive_interval,
            move || {
                let commands = commands.clone();
                async move {
                    trace!(channel = %class, "Sending keepalive ping");
                    commands
                        .send(LinkCommand::Send(OutboundMessage::Ping))
                        .await
                        .is_ok()
                }
            },
        ));
        drop(record);

        slot.publish_connected(true);
        info!(channel = %class, generation, "Live channel open");
    }

    /// Handles the end of a transport. The only place that reacts to an
    /// unexpected close; transport errors never transition on their own.
    ///
    /// 处理传输的结束。这是唯一对意外关闭做出反应的地方；传输错误本身从不引起状态转换。
    pub(crate) fn handle_close(
        self: &Arc<Self>,
        class: ChannelClass,
        generation: u64,
        code: Option<u16>,
    ) {
        let slot = self.registry.get(class);
        let mut record = slot.lock();
        if record.current_generation() != Some(generation) {
            trace!(channel = %class, generation, "Ignoring close from superseded transport");
            return;
        }

        // The link task is the one reporting; it exits on its own.
        record.transport = None;
        let was_connected = std::mem::replace(&mut record.connected, false);
        if let Some(timer) = record.keepalive_timer.take() {
            timer.cancel();
        }

        let auth_rejected = code == Some(self.config.protocol.auth_rejected_close_code);
        let subscribers = record.subscriber_count;
        if subscribers > 0 && !auth_rejected {
            apply(class, &mut record, LinkState::Connecting);
            if record.reconnect_timer.is_none() {
                let delay = self.config.timing.reconnect_delay;
                let supervisor = Arc::clone(self);
                record.reconnect_timer = Some(TimerHandle::after(delay, async move {
                    supervisor.fire_reconnect(class);
                }));
                info!(channel = %class, ?code, ?delay, "Live channel lost; reconnect scheduled");
            } else {
                debug!(channel = %class, ?code, "Reconnect already pending");
            }
        } else {
            apply(class, &mut record, LinkState::Idle);
            if auth_rejected {
                warn!(channel = %class, ?code, "Authentication rejected; not reconnecting");
            } else {
                debug!(channel = %class, ?code, "Live channel closed without demand");
            }
        }
        drop(record);

        if was_connected {
            slot.publish_connected(false);
        }
    }

    fn fire_reconnect(self: &Arc<Self>, class: ChannelClass) {
        {
            let mut record = self.registry.get(class).lock();
            match record.reconnect_timer.take() {
                Some(timer) => timer.disarm(),
                None => return,
            }
            record.reconnects += 1;
        }
        debug!(channel = %class, "Reconnect timer fired");
        if let Err(e) = self.open(class) {
            warn!(channel = %class, error = %e, "Reconnect abandoned");
            let mut record = self.registry.get(class).lock();
            Self::settle_idle(class, &mut record);
        }
    }
}
