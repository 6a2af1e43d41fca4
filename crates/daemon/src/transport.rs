//! Framed message stream shared by the server and [`FileClient`](crate::client::FileClient).
//!
//! Wraps any async byte stream and reads or writes one [`Frame`] at a time,
//! buffering partial reads until [`FrameCodec::try_decode`] yields a frame.

use protocol::{Envelope, Frame, FrameCodec, ProtocolError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// A byte stream speaking the framed envelope protocol.
pub struct FramedStream<S> {
    stream: S,
    codec: FrameCodec,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            codec: FrameCodec::new(),
            buffer: Vec::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `None` on a clean disconnect between frames. A disconnect in
    /// the middle of a frame is `ConnectionClosed`.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let mut chunk = vec![0u8; READ_BUFFER_SIZE];
        loop {
            if let Some((frame, consumed)) = self.codec.try_decode(&self.buffer)? {
                self.buffer.drain(..consumed);
                return Ok(Some(frame));
            }

            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::ConnectionClosed(format!(
                    "peer closed with {} bytes of a partial frame",
                    self.buffer.len()
                )));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read and decode the next envelope.
    pub async fn read_envelope(&mut self) -> Result<Option<Envelope>, ProtocolError> {
        match self.read_frame().await? {
            Some(frame) => Ok(Some(Envelope::from_msgpack(&frame.payload)?)),
            None => Ok(None),
        }
    }

    /// Encode and send one envelope.
    pub async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), ProtocolError> {
        let payload = envelope.to_msgpack()?;
        let bytes = self.codec.encode(&Frame::new(payload))?;

        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
