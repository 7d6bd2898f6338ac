//! Framed message connection
//!
//! Sends and receives whole protocol frames over any byte stream.

use super::codec::{Message, ProtocolError, MAX_FRAME_SIZE, SERIALIZER_ID_SIZE};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Transport-level failures
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Failed to bind channel {name}: {source}")]
    Bind {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to connect to channel {name}: {source}")]
    Connect {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// One peer connection carrying length-prefixed frames
pub struct Connection<S> {
    stream: S,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub async fn send(&mut self, message: &Message) -> Result<(), IpcError> {
        let frame = message.encode_frame();
        trace!(kind = message.kind(), bytes = frame.len(), "send");
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Read the next frame; `None` once the peer closed cleanly between frames
    pub async fn receive(&mut self) -> Result<Option<Message>, IpcError> {
        let mut prefix = [0u8; 4];
        let mut filled = 0;
        while filled < prefix.len() {
            match self.stream.read(&mut prefix[filled..]).await? {
                0 if filled == 0 => return Ok(None),
                0 => return Err(IpcError::Disconnected),
                n => filled += n,
            }
        }
        let len = u32::from_le_bytes(prefix);

        let size = len as usize;
        if size < SERIALIZER_ID_SIZE {
            return Err(ProtocolError::FrameTooShort(len).into());
        }
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size }.into());
        }

        let mut body = vec![0u8; size];
        match self.stream.read_exact(&mut body).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(IpcError::Disconnected)
            }
            Err(e) => return Err(e.into()),
        }

        let message = Message::decode_body(&body)?;
        trace!(kind = message.kind(), bytes = size, "receive");
        Ok(Some(message))
    }

    /// Send a message and wait for the single response
    pub async fn request(&mut self, message: &Message) -> Result<Message, IpcError> {
        self.send(message).await?;
        self.receive().await?.ok_or(IpcError::Disconnected)
    }

    pub async fn shutdown(&mut self) -> Result<(), IpcError> {
        self.stream.shutdown().await?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }
}
