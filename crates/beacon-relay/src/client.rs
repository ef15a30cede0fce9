//! Minimal relay peer speaking the frame wire format.

use std::net::SocketAddr;

use beacon_core::{DEFAULT_MAX_FRAME_SIZE, FrameError, read_frame, write_frame};
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// A TCP client that sends and receives whole frames.
pub struct RelayClient {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
}

impl RelayClient {
    /// Connect to a relay.
    pub async fn connect(addr: SocketAddr) -> Result<Self, FrameError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self { reader, writer })
    }

    /// Send one frame.
    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        write_frame(&mut self.writer, payload).await
    }

    /// Receive one frame of at most [`DEFAULT_MAX_FRAME_SIZE`] bytes; `None`
    /// when the relay closed the connection.
    pub async fn recv_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        read_frame(&mut self.reader, DEFAULT_MAX_FRAME_SIZE).await
    }

    /// Raw write half, for sending malformed input.
    pub fn writer(&mut self) -> &mut OwnedWriteHalf {
        &mut self.writer
    }

    /// Local address of this client's socket.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.reader.local_addr()
    }
}
