//! Newline-delimited JSON over a byte stream

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

use qab_protocol::MAX_FRAME_SIZE;

use super::{FrameSink, FrameStream};
use crate::error::TransportError;

/// Connect to `host:port` over TCP
pub async fn connect(addr: &str) -> Result<(FrameSink, FrameStream), TransportError> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    tracing::debug!(addr, "TCP connected");
    Ok(framed(stream))
}

/// Frame any byte stream as one JSON document per line.
///
/// Lines longer than [`MAX_FRAME_SIZE`] are a transport error.
pub fn framed<T>(io: T) -> (FrameSink, FrameStream)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let framed = Framed::new(io, LinesCodec::new_with_max_length(MAX_FRAME_SIZE));
    let (sink, stream) = framed.split::<String>();
    let sink = sink.sink_map_err(TransportError::from);
    let stream = stream.map(|line| line.map_err(TransportError::from));
    (Box::pin(sink), Box::pin(stream))
}
