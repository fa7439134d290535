//! Credential and authentication-state collaborators.
//!
//! The multiplexer does not store sessions. It reads the current credential
//! through [`CredentialProvider`] and watches [`AuthenticationState`] so that a
//! logout closes every credentialed channel at once.
//!
//! 凭证与认证状态协作者。多路复用器不存储会话。它通过 [`CredentialProvider`]
//! 读取当前凭证，并监视 [`AuthenticationState`]，使登出时立即关闭所有需要凭证的通道。

use crate::supervisor::ConnectionSupervisor;
use std::{fmt::Debug, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

/// Source of the current credential token.
///
/// 当前凭证令牌的来源。
pub trait CredentialProvider: Send + Sync + Debug + 'static {
    fn credential(&self) -> Option<String>;
}

/// Reactive is-authenticated flag.
///
/// 响应式的是否已认证标志。
pub trait AuthenticationState: Send + Sync + Debug + 'static {
    fn is_authenticated(&self) -> bool;

    /// A receiver that observes every change of the flag.
    fn watch_authenticated(&self) -> watch::Receiver<bool>;
}

/// A provider for clients that never sign in.
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn credential(&self) -> Option<String> {
        None
    }
}

/// An in-memory session implementing both collaborator traits.
///
/// 实现两个协作者 trait 的内存会话。
#[derive(Debug)]
pub struct Session {
    token: watch::Sender<Option<String>>,
    authenticated: watch::Sender<bool>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (token, _) = watch::channel(None);
        let (authenticated, _) = watch::channel(false);
        Self {
            token,
            authenticated,
        }
    }

    pub fn signed_in(token: impl Into<String>) -> Self {
        let session = Self::new();
        session.sign_in(token);
        session
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        self.token.send_replace(Some(token.into()));
        self.authenticated.send_replace(true);
    }

    pub fn sign_out(&self) {
        self.token.send_replace(None);
        self.authenticated.send_replace(false);
    }
}

impl CredentialProvider for Session {
    fn credential(&self) -> Option<String> {
        self.token.borrow().clone()
    }
}

impl AuthenticationState for Session {
    fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    fn watch_authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }
}

/// Background task tying the supervisor to the authentication flag.
///
/// On logout every credentialed channel is force-closed regardless of its
/// subscriber count. On login, credentialed channels that still have
/// subscribers are reopened.
///
/// 将监督器与认证标志绑定的后台任务。登出时无论订阅者数量如何都强制关闭所有需要凭证的通道；
/// 登录时重新打开仍有订阅者的需要凭证的通道。
#[derive(Debug)]
pub struct SessionGuard {
    task: JoinHandle<()>,
}

impl SessionGuard {
    pub fn spawn(
        supervisor: Arc<ConnectionSupervisor>,
        auth: Arc<dyn AuthenticationState>,
    ) -> Self {
        let mut rx = auth.watch_authenticated();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let authenticated = *rx.borrow_and_update();
                if authenticated {
                    info!("Session started; resuming credentialed channels");
                    supervisor.resume_credentialed();
                } else {
                    info!("Session ended; closing credentialed channels");
                    supervisor.invalidate_credentials();
                }
            }
            debug!("Authentication state source dropped; session guard exiting");
        });
        Self { task }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tracks_token_and_flag() {
        let session = Session::new();
        assert_eq!(session.credential(), None);
        assert!(!session.is_authenticated());

        session.sign_in("tok");
        assert_eq!(session.credential().as_deref(), Some("tok"));
        assert!(session.is_authenticated());

        session.sign_out();
        assert_eq!(session.credential(), None);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn watchers_see_sign_out() {
        let session = Session::signed_in("tok");
        let mut rx = session.watch_authenticated();
        session.sign_out();
        rx.changed().await.unwrap();
        assert!(!*rx.borrow());
    }
}
