//! 通道连接状态机
//! Channel Connection State Machine
//!
//! 该模块定义每个通道记录的三个状态以及合法的状态转换。
//!
//! This module defines the three states of a channel record and the legal
//! transitions between them.

use crate::{
    channel::ChannelClass,
    error::{Error, Result},
};
use tracing::{trace, warn};

/// Lifecycle state of one channel's live transport.
///
/// 单个通道实时传输的生命周期状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No transport and nothing scheduled.
    /// 无传输，也没有任何计划任务。
    #[default]
    Idle,
    /// A handshake is in flight, or a reconnect is pending.
    /// 握手进行中，或重连等待中。
    Connecting,
    /// The server acknowledged the channel; keepalive is running.
    /// 服务器已确认通道；保活正在运行。
    Open,
}

impl LinkState {
    /// 获取状态的字符串表示
    /// Gets string representation of the state
    pub fn name(self) -> &'static str {
        match self {
            LinkState::Idle => "Idle",
            LinkState::Connecting => "Connecting",
            LinkState::Open => "Open",
        }
    }
}

/// 状态验证器
/// State validator
pub struct StateValidator;

impl StateValidator {
    /// 验证状态转换是否合法
    /// Validate if state transition is legal
    pub fn is_valid_transition(current: LinkState, next: LinkState) -> bool {
        use LinkState::*;

        match (current, next) {
            // 有需求时打开
            // Opened with demand present
            (Idle, Connecting) => true,

            // 收到 connected 确认
            // `connected` acknowledgement received
            (Connecting, Open) => true,
            // 确认前关闭、强制关闭或不可重连的失败
            // Closed before acknowledgement, forced close, or non-reconnectable failure
            (Connecting, Idle) => true,

            // 强制关闭或需求归零
            // Forced close or demand reached zero
            (Open, Idle) => true,
            // 意外关闭且可以重连
            // Unexpected close, reconnect eligible
            (Open, Connecting) => true,

            // 同状态转换（幂等）
            // Same state transition (idempotent)
            (a, b) if a == b => true,

            _ => false,
        }
    }
}

/// Applies a transition, rejecting illegal ones.
///
/// 执行状态转换，拒绝非法转换。
pub(crate) fn transition(
    channel: ChannelClass,
    current: &mut LinkState,
    next: LinkState,
) -> Result<()> {
    if !StateValidator::is_valid_transition(*current, next) {
        warn!(
            %channel,
            from = current.name(),
            to = next.name(),
            "Invalid state transition attempted"
        );
        return Err(Error::InvalidTransition {
            channel,
            from: current.name(),
            to: next.name(),
        });
    }
    if *current != next {
        trace!(%channel, from = current.name(), to = next.name(), "State transition executed");
    }
    *current = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use LinkState::*;

    #[test]
    fn documented_transitions_are_valid() {
        for (from, to) in [
            (Idle, Connecting),
            (Connecting, Open),
            (Open, Idle),
            (Open, Connecting),
            (Connecting, Idle),
            (Connecting, Connecting),
            (Idle, Idle),
        ] {
            assert!(
                StateValidator::is_valid_transition(from, to),
                "{from:?} -> {to:?} should be valid"
            );
        }
    }

    #[test]
    fn idle_cannot_jump_to_open() {
        assert!(!StateValidator::is_valid_transition(Idle, Open));
    }

    #[test]
    fn rejected_transition_leaves_state_untouched() {
        let mut state = Idle;
        let err = transition(ChannelClass::Local, &mut state, Open).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { from: "Idle", to: "Open", .. }));
        assert_eq!(state, Idle);

        transition(ChannelClass::Local, &mut state, Connecting).unwrap();
        assert_eq!(state, Connecting);
    }
}
