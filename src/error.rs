//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::channel::ChannelClass;
use thiserror::Error;

/// The primary error type for the live update multiplexer.
/// 实时更新多路复用器的主要错误类型。
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying push transport failed.
    /// 底层推送传输失败。
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound payload could not be decoded.
    /// 入站载荷无法解码。
    #[error("failed to decode inbound message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured origin could not be turned into a streaming endpoint.
    /// 配置的源地址无法转换为流式端点。
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// The origin uses a scheme that has no WebSocket counterpart.
    /// 源地址使用了没有对应 WebSocket 方案的协议。
    #[error("unsupported origin scheme `{0}`")]
    UnsupportedScheme(String),

    /// The channel needs a credential and none is available.
    /// 通道需要凭证，但当前没有可用凭证。
    #[error("channel {0} requires a credential")]
    CredentialRequired(ChannelClass),

    /// The subscription is disabled and may not drive the connection.
    /// 订阅已禁用，不能驱动连接。
    #[error("subscription on channel {0} is disabled")]
    SubscriptionDisabled(ChannelClass),

    /// An internal channel between tasks was closed unexpectedly.
    /// 任务间的内部通道意外关闭。
    #[error("internal channel is broken")]
    ChannelClosed,

    /// A state machine transition was rejected.
    /// 状态机转换被拒绝。
    #[error("invalid transition on channel {channel}: {from} -> {to}")]
    InvalidTransition {
        channel: ChannelClass,
        from: &'static str,
        to: &'static str,
    },
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        match err {
            Error::Transport(msg) => std::io::Error::new(ErrorKind::ConnectionReset, msg),
            Error::Decode(e) => std::io::Error::new(ErrorKind::InvalidData, e),
            Error::InvalidEndpoint(e) => std::io::Error::new(ErrorKind::InvalidInput, e),
            Error::UnsupportedScheme(s) => std::io::Error::new(ErrorKind::InvalidInput, s),
            Error::CredentialRequired(_) => ErrorKind::PermissionDenied.into(),
            Error::SubscriptionDisabled(_) => ErrorKind::NotConnected.into(),
            Error::ChannelClosed => ErrorKind::BrokenPipe.into(),
            e @ Error::InvalidTransition { .. } => std::io::Error::other(e.to_string()),
        }
    }
}
