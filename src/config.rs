//! 定义了多路复用器的可配置参数。
//! Defines configurable parameters for the multiplexer.

use std::time::Duration;

/// A structure containing all configurable parameters for the multiplexer.
///
/// 包含多路复用器所有可配置参数的结构体。
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Where the streaming endpoints live.
    /// 流式端点所在位置。
    pub endpoint: EndpointConfig,

    /// Reconnect and keepalive timing.
    /// 重连与保活计时。
    pub timing: TimingConfig,

    /// Wire protocol parameters.
    /// 线路协议参数。
    pub protocol: ProtocolConfig,

    /// Parameters for the bundled in-memory stores.
    /// 内置内存存储的参数。
    pub store: StoreConfig,
}

/// Endpoint resolution parameters.
///
/// 端点解析参数。
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// The origin of the hosting page, e.g. `https://example.social`. The
    /// WebSocket scheme follows it: `http` maps to `ws`, `https` to `wss`.
    ///
    /// 宿主页面的源地址。WebSocket 协议跟随它：`http` 对应 `ws`，`https` 对应 `wss`。
    pub origin: String,
    /// Path segment under which every channel is mounted.
    /// 所有通道挂载的路径前缀。
    pub path_prefix: String,
    /// Query parameter name carrying the credential token.
    /// 携带凭证令牌的查询参数名。
    pub token_param: String,
}

/// Timer parameters.
///
/// 定时器参数。
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Fixed delay before a reconnect attempt. No backoff, no jitter.
    /// 重连尝试前的固定延迟。无退避，无抖动。
    pub reconnect_delay: Duration,
    /// Interval between liveness pings while a channel is open.
    /// 通道打开期间存活探测的间隔。
    pub keepalive_interval: Duration,
    /// How long a graceful close may take before the transport is dropped.
    /// A reopen of the same channel waits at most this long for it.
    ///
    /// 优雅关闭在传输被丢弃前可持续的最长时间。同一通道的重新打开最多等待这么久。
    pub close_timeout: Duration,
}

/// Wire protocol parameters.
///
/// 线路协议参数。
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Close code the server uses to signal "authentication rejected".
    /// A close with this code never triggers a reconnect.
    ///
    /// 服务器用于表示"认证被拒绝"的关闭码。以此码关闭时不会触发重连。
    pub auth_rejected_close_code: u16,
    /// Capacity of the per-connection outbound queue.
    /// 每个连接出站队列的容量。
    pub outbound_capacity: usize,
}

/// In-memory store parameters.
///
/// 内存存储参数。
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries a memory store keeps; the oldest are dropped.
    /// 内存存储保留的最大条目数；最旧的会被丢弃。
    pub max_entries: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
            path_prefix: "streaming".to_string(),
            token_param: "i".to_string(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(25),
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            auth_rejected_close_code: 4001,
            outbound_capacity: 64,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { max_entries: 500 }
    }
}
