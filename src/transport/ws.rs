//! WebSocket implementation of [`Connector`](super::Connector).
//!
//! WebSocket 实现的 [`Connector`](super::Connector)。

use super::{Connector, TransportEvent, TransportLink};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;
use url::Url;

/// Opens links with `tokio-tungstenite`. TLS is used for `wss` endpoints.
///
/// 使用 `tokio-tungstenite` 打开链路。`wss` 端点使用 TLS。
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink> {
        let (stream, response) = tokio_tungstenite::connect_async(endpoint.as_str()).await?;
        debug!(
            path = endpoint.path(),
            status = %response.status(),
            "WebSocket handshake complete"
        );

        let (sink, stream) = stream.split();
        let sink = sink
            .sink_map_err(Error::from)
            .with(|text: String| future::ready(Ok::<_, Error>(Message::text(text))));
        let events = stream.filter_map(|frame| future::ready(translate(frame)));

        Ok(TransportLink {
            sink: Box::pin(sink),
            events: Box::pin(events),
        })
    }
}

/// Maps a raw WebSocket frame to a link event. Control frames are handled by
/// tungstenite itself and produce nothing here.
///
/// 将原始 WebSocket 帧映射为链路事件。控制帧由 tungstenite 自身处理，此处不产生事件。
fn translate(
    frame: std::result::Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<TransportEvent> {
    match frame {
        Ok(Message::Text(text)) => Some(TransportEvent::Text(text.as_str().to_owned())),
        Ok(Message::Binary(data)) => Some(match String::from_utf8(data.to_vec()) {
            Ok(text) => TransportEvent::Text(text),
            Err(_) => TransportEvent::Error("binary frame is not valid UTF-8".to_string()),
        }),
        Ok(Message::Close(frame)) => Some(TransportEvent::Closed {
            code: frame.map(|f| u16::from(f.code)),
        }),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(TransportEvent::Error(e.to_string())),
    }
}
