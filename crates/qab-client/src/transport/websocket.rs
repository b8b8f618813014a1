//! WebSocket transport: one text message per frame

use futures::{future, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

use super::{FrameSink, FrameStream};
use crate::error::TransportError;

/// Connect to a `ws://` or `wss://` URL
pub async fn connect(url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
    let (ws, _response) = connect_async(url).await?;
    tracing::debug!(url, "WebSocket connected");
    Ok(split(ws))
}

/// Split an established WebSocket into frame halves.
///
/// Binary messages are accepted when they hold UTF-8. Control messages are
/// skipped; a close message ends the inbound stream.
pub fn split<S>(ws: WebSocketStream<S>) -> (FrameSink, FrameStream)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = ws.split();

    let sink = sink
        .sink_map_err(TransportError::from)
        .with(|text: String| future::ready(Ok::<_, TransportError>(Message::text(text))));

    let stream = stream
        .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
        .filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!(len = data.len(), "Skipping non-UTF-8 binary message");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::from(e))),
            })
        });

    (Box::pin(sink), Box::pin(stream))
}
