//! The per-transport task: drives one link until it closes.
//!
//! 每个传输的任务：驱动一条链路直到其关闭。

use super::ConnectionSupervisor;
use crate::{
    channel::ChannelClass,
    protocol::OutboundMessage,
    transport::{TransportEvent, TransportLink},
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle, time};
use tracing::{debug, trace, warn};
use url::Url;

/// Commands from the supervisor to a link task.
#[derive(Debug)]
pub(crate) enum LinkCommand {
    Send(OutboundMessage),
    /// Close the link gracefully and exit without reporting a close.
    /// 优雅关闭链路并退出，不上报关闭事件。
    Close,
}

/// The transport attached to a record.
#[derive(Debug)]
pub(crate) struct ActiveTransport {
    pub(crate) generation: u64,
    pub(crate) commands: mpsc::Sender<LinkCommand>,
    pub(crate) task: JoinHandle<()>,
}

impl ActiveTransport {
    /// Tears the link down. An acknowledged link is asked to close gracefully;
    /// a handshake in flight is simply aborted. Returns the link task so the
    /// next transport on the channel can wait for it.
    ///
    /// 拆除链路。已确认的链路被请求优雅关闭；进行中的握手直接中止。
    /// 返回链路任务，以便该通道的下一个传输等待它结束。
    pub(crate) fn shutdown(self, graceful: bool) -> JoinHandle<()> {
        if !(graceful && self.commands.try_send(LinkCommand::Close).is_ok()) {
            self.task.abort();
        }
        self.task
    }
}

impl ConnectionSupervisor {
    /// Runs one transport from handshake to close.
    ///
    /// Every observation is reported back to the supervisor tagged with
    /// `generation`, so a superseded link cannot touch the record. A
    /// `predecessor` still closing is awaited first, so a channel never has
    /// two sockets up at once.
    ///
    /// 运行一个传输，从握手到关闭。每个观察结果都带有 `generation` 标签上报给监督器，
    /// 因此被取代的链路无法修改记录。若前一个传输仍在关闭，先等待其结束，
    /// 因此一个通道不会同时存在两个套接字。
    pub(crate) async fn run_link(
        self: Arc<Self>,
        class: ChannelClass,
        generation: u64,
        endpoint: Url,
        predecessor: Option<JoinHandle<()>>,
        mut commands: mpsc::Receiver<LinkCommand>,
    ) {
        if let Some(previous) = predecessor {
            trace!(channel = %class, generation, "Waiting for previous transport to close");
            // A cancelled predecessor counts as closed.
            let _ = previous.await;
        }
        debug!(channel = %class, generation, path = endpoint.path(), "Opening live transport");

        let TransportLink {
            mut sink,
            mut events,
        } = match self.connector.connect(&endpoint).await {
            Ok(link) => link,
            Err(e) => {
                warn!(channel = %class, generation, error = %e, "Failed to open live transport");
                self.handle_close(class, generation, None);
                return;
            }
        };
        trace!(channel = %class, generation, "Transport open, awaiting acknowledgement");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(LinkCommand::Send(message)) => match message.encode() {
                        Ok(text) => {
                            if let Err(e) = sink.send(text).await {
                                // The read side reports the close.
                                // 关闭由读取端上报。
                                warn!(channel = %class, generation, error = %e, "Failed to send control message");
                            }
                        }
                        Err(e) => warn!(channel = %class, error = %e, "Failed to encode control message"),
                    },
                    Some(LinkCommand::Close) | None => {
                        match time::timeout(self.config.timing.close_timeout, sink.close()).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(channel = %class, generation, error = %e, "Error while closing transport");
                            }
                            Err(_) => {
                                debug!(channel = %class, generation, "Graceful close timed out; dropping transport");
                            }
                        }
                        debug!(channel = %class, generation, "Transport closed by supervisor");
                        return;
                    }
                },
                event = events.next() => match event {
                    Some(TransportEvent::Text(text)) => self.handle_frame(class, generation, &text),
                    Some(TransportEvent::Error(e)) => {
                        warn!(channel = %class, generation, error = %e, "Transport error");
                    }
                    Some(TransportEvent::Closed { code }) => {
                        self.handle_close(class, generation, code);
                        return;
                    }
                    None => {
                        self.handle_close(class, generation, None);
                        return;
                    }
                },
            }
        }
    }
}
