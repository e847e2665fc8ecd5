//! Framed byte channel.
//!
//! Messages carry no length prefix: whatever a single read returns, up to the
//! caller's limit, is treated as one message. Senders write each message with
//! one `write_all` + `flush`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Waits for the next read and returns up to `max_len` bytes of it as one
    /// frame. `Ok(None)` means the other side closed the stream.
    pub async fn receive(&mut self, max_len: usize) -> io::Result<Option<String>> {
        self.buf.resize(max_len.max(1), 0);
        let read = self.inner.read(&mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&self.buf[..read]).into_owned()))
    }

    /// Reads exactly `len` bytes, across as many reads as it takes.
    pub async fn receive_exact(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut bytes = vec![0; len];
        self.inner.read_exact(&mut bytes).await?;
        Ok(bytes)
    }
}

pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Returns once every byte has been handed to the transport.
    pub async fn send(&mut self, payload: impl AsRef<[u8]>) -> io::Result<()> {
        self.inner.write_all(payload.as_ref()).await?;
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}

/// Both halves of a framed TCP connection.
pub struct FramedChannel {
    pub reader: FrameReader<OwnedReadHalf>,
    pub writer: FrameWriter<OwnedWriteHalf>,
}

impl FramedChannel {
    pub fn new(stream: TcpStream) -> Self {
        // Frames are tiny and latency matters more than throughput.
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY: {err}");
        }
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        }
    }

    pub fn into_split(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}
