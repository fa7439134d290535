//! In-process [`Connector`](super::Connector) for tests and demos.
//!
//! Every connect attempt is recorded. A successful attempt yields a
//! [`MockPeer`] that plays the server: it pushes frames and close codes into the
//! link and observes what the client sent.
//!
//! 用于测试和演示的进程内 [`Connector`](super::Connector)。
//! 每次连接尝试都会被记录。成功的尝试会产生一个扮演服务器的 [`MockPeer`]。

use super::{Connector, TransportEvent, TransportLink};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{Sink, stream};
use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};
use tokio::{sync::mpsc, time};
use url::Url;

#[derive(Debug, Default)]
struct MockState {
    attempts: Vec<Url>,
    peers: Vec<MockPeer>,
    refuse_next: usize,
    close_delay: Option<Duration>,
}

/// A connector whose links terminate in [`MockPeer`]s.
#[derive(Debug, Default)]
pub struct MockConnector {
    state: Mutex<MockState>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` attempts fail at handshake.
    ///
    /// 让接下来的 `n` 次尝试在握手阶段失败。
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().refuse_next = n;
    }

    /// Makes every link opened from now on take `delay` to finish a graceful
    /// close.
    ///
    /// 让此后打开的每条链路完成优雅关闭需要 `delay` 时长。
    pub fn slow_close(&self, delay: Duration) {
        self.state.lock().close_delay = Some(delay);
    }

    /// Number of connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts.len()
    }

    /// Endpoints of every attempt, in order.
    pub fn endpoints(&self) -> Vec<Url> {
        self.state.lock().attempts.clone()
    }

    /// Peers of every established link, in order.
    pub fn peers(&self) -> Vec<MockPeer> {
        self.state.lock().peers.clone()
    }

    pub fn last_peer(&self) -> Option<MockPeer> {
        self.state.lock().peers.last().cloned()
    }

    /// Number of established links the client has not dropped yet.
    ///
    /// 客户端尚未丢弃的已建立链路数量。
    pub fn live_links(&self) -> usize {
        self.state
            .lock()
            .peers
            .iter()
            .filter(|peer| !peer.is_closed())
            .count()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink> {
        let mut state = self.state.lock();
        state.attempts.push(endpoint.clone());
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let peer = MockPeer {
            endpoint: endpoint.clone(),
            inbound: inbound_tx,
            outbound: Arc::new(Mutex::new(outbound_rx)),
            closed: closed.clone(),
        };
        state.peers.push(peer);

        let sink = MockSink {
            outbound: outbound_tx,
            close_delay: state.close_delay,
            closing: None,
            _guard: CloseOnDrop(closed),
        };
        let events = stream::unfold(inbound_rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            events: Box::pin(events),
        })
    }
}

/// Client half of a mock link. Frames go straight to the peer; closing
/// takes the connector's configured delay.
struct MockSink {
    outbound: mpsc::UnboundedSender<String>,
    close_delay: Option<Duration>,
    closing: Option<Pin<Box<time::Sleep>>>,
    _guard: CloseOnDrop,
}

impl Sink<String> for MockSink {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, frame: String) -> Result<()> {
        self.outbound.send(frame).map_err(|_| Error::ChannelClosed)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        let Some(delay) = this.close_delay else {
            return Poll::Ready(Ok(()));
        };
        let sleep = this
            .closing
            .get_or_insert_with(|| Box::pin(time::sleep(delay)));
        sleep.as_mut().poll(cx).map(Ok)
    }
}

/// Marks the peer closed once the client drops its sink.
#[derive(Debug)]
struct CloseOnDrop(Arc<AtomicBool>);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The server side of one mock link.
///
/// 一条模拟链路的服务器端。
#[derive(Debug, Clone)]
pub struct MockPeer {
    endpoint: Url,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    outbound: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn push(&self, event: TransportEvent) {
        let _ = self.inbound.send(event);
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push(TransportEvent::Text(text.into()));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Sends the application-level `connected` acknowledgement.
    pub fn acknowledge(&self) {
        self.send_text(r#"{"event":"connected"}"#);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(TransportEvent::Error(message.into()));
    }

    pub fn close(&self, code: Option<u16>) {
        self.push(TransportEvent::Closed { code });
    }

    /// Drains the frames the client has sent so far.
    ///
    /// 取出客户端目前已发送的帧。
    pub fn sent(&self) -> Vec<String> {
        let mut rx = self.outbound.lock();
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the client has dropped its end of the link.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
