//! tests/common/harness.rs
#![allow(dead_code)]

use feedmux::{
    ChannelClass, Config, Multiplexer, Session,
    transport::mock::{MockConnector, MockPeer},
};
use serde_json::{Value, json};
use std::{sync::Arc, sync::Once, time::Duration};

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "feedmux=debug".to_string());
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Lets spawned tasks run until they block. Advances the paused clock by 1ms.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// A multiplexer wired to a mock server and an in-memory session.
pub struct TestHarness {
    pub mux: Multiplexer,
    pub connector: Arc<MockConnector>,
    pub session: Arc<Session>,
}

impl TestHarness {
    /// A harness whose session is signed in with token `tok`.
    pub fn new() -> Self {
        Self::with_session(Session::signed_in("tok"))
    }

    /// A harness with nobody signed in.
    pub fn anonymous() -> Self {
        Self::with_session(Session::new())
    }

    fn with_session(session: Session) -> Self {
        init_tracing();
        let connector = MockConnector::new();
        let session = Arc::new(session);
        let mux = Multiplexer::builder()
            .config(Config::default())
            .connector(connector.clone())
            .credentials(session.clone())
            .build();
        Self {
            mux,
            connector,
            session,
        }
    }

    /// The peer of the most recent link to `class`.
    pub fn peer(&self, class: ChannelClass) -> MockPeer {
        self.connector
            .peers()
            .into_iter()
            .rev()
            .find(|peer| peer.endpoint().path().ends_with(class.wire_name()))
            .unwrap_or_else(|| panic!("no link was opened for {class}"))
    }

    /// Acknowledges the current link of `class` and waits for it to settle.
    pub async fn acknowledge(&self, class: ChannelClass) -> MockPeer {
        let peer = self.peer(class);
        peer.acknowledge();
        settle().await;
        peer
    }
}

pub fn created(id: &str) -> Value {
    json!({ "event": "entry-created", "data": { "id": id, "text": format!("entry {id}") } })
}

pub fn removed(id: &str) -> Value {
    json!({ "event": "entry-removed", "data": { "id": id } })
}

pub fn reacted(id: &str, kind: &str, action: &str) -> Value {
    json!({
        "event": "entry-reaction-changed",
        "data": { "id": id, "reactionKind": kind, "action": action }
    })
}
