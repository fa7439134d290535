//! Transport layer abstraction for the live push channel.
//!
//! The supervisor never talks to a socket directly. It asks a [`Connector`]
//! for a [`TransportLink`], a pair of halves: a sink for outbound text frames
//! and a stream of [`TransportEvent`]s.
//!
//! 实时推送通道的传输层抽象。
//!
//! 监督器从不直接操作套接字。它向 [`Connector`] 请求一个 [`TransportLink`]，
//! 由出站文本帧的 sink 和 [`TransportEvent`] 流两部分组成。

pub mod mock;
pub mod ws;

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::{fmt::Debug, pin::Pin};
use url::Url;

pub use ws::WsConnector;

/// Outbound half of a link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a link.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Something that happened on an open link.
///
/// 已打开链路上发生的事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame.
    /// 文本帧。
    Text(String),
    /// A transport-level error. Informational; a `Closed` event or the end of
    /// the stream follows when the link is actually gone.
    ///
    /// 传输层错误，仅供参考；链路真正断开时会随后出现 `Closed` 事件或流结束。
    Error(String),
    /// The peer closed the link, with its close code if it sent one.
    /// 对端关闭了链路，若对端发送了关闭码则附带关闭码。
    Closed { code: Option<u16> },
}

/// An established bidirectional link.
pub struct TransportLink {
    pub sink: FrameSink,
    pub events: EventStream,
}

impl Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Opens links to streaming endpoints.
///
/// This trait lets the supervisor run against a real WebSocket or against an
/// in-process fake in tests.
///
/// 打开到流式端点的链路。此 trait 使监督器既可以运行在真实 WebSocket 上，
/// 也可以在测试中运行在进程内模拟上。
#[async_trait]
pub trait Connector: Send + Sync + Debug + 'static {
    /// Performs the transport handshake with `endpoint`.
    ///
    /// 与 `endpoint` 执行传输握手。
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink>;
}
