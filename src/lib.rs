#![deny(clippy::expect_used, clippy::unwrap_used)]

//! The root of the live update channel multiplexer.
//! 实时更新通道多路复用器的根。
//!
//! One bidirectional push channel is kept per feed category and shared by
//! every view subscribed to it. Views hold [`SubscriptionHandle`]s, and the
//! [`ConnectionSupervisor`] owns the transports behind them. Decoded messages
//! reach entry stores through the [`EventDispatcher`] and a [`StateBridge`].
//!
//! 每个信息流类别保持一条双向推送通道，由所有订阅它的视图共享。

pub mod bridge;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod mux;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod store;
pub mod subscription;
pub mod supervisor;
pub mod transport;

mod timer;

pub use bridge::{RoutingScope, StateBridge};
pub use channel::ChannelClass;
pub use config::Config;
pub use dispatcher::{CallbackSet, ChannelCallbacks, EventDispatcher, Registration};
pub use error::{Error, Result};
pub use mux::{Multiplexer, MultiplexerBuilder};
pub use session::{AuthenticationState, CredentialProvider, Session, SessionGuard};
pub use subscription::{SubscriptionHandle, SubscriptionOptions};
pub use supervisor::ConnectionSupervisor;
