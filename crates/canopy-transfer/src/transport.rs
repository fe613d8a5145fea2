//! Transport seam and the newline-delimited TCP transport
//!
//! A [`Transport`] turns an address into a [`Channel`]: an ordered, duplex
//! stream of text messages. The connection manager and the RPC client only
//! see these traits, so tests can script a peer without sockets.
//!
//! The TCP transport frames each message as one line of JSON.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::Result;

/// Opens channels to a peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to `address`. Resolves once the channel is ready.
    async fn connect(&self, address: &str) -> Result<Box<dyn Channel>>;
}

/// One open duplex message stream.
#[async_trait]
pub trait Channel: Send {
    /// Next inbound message, or `None` once the peer closed the stream.
    ///
    /// Must be cancel-safe: the manager races it against shutdown and
    /// outbound sends.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Send one message.
    async fn send(&mut self, text: &str) -> Result<()>;

    /// Close our side of the stream.
    async fn close(&mut self) -> Result<()>;
}

/// Line-framed JSON over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, address: &str) -> Result<Box<dyn Channel>> {
        let stream = TcpStream::connect(address).await?;
        Ok(Box::new(TcpChannel::new(stream)?))
    }
}

/// A connected TCP stream framed by newlines.
pub struct TcpChannel {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
}

impl TcpChannel {
    /// Wrap an established stream (either side of the connection).
    pub fn new(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let (reader, writer) = stream.into_split();
        debug!(%peer, "TCP channel open");
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            peer,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn recv(&mut self) -> Result<Option<String>> {
        // next_line is cancel-safe; blank keep-alive lines are skipped
        while let Some(line) = self.lines.next_line().await? {
            if !line.trim().is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TcpChannel::new(stream).unwrap();
            peer.send(r#"{"type":"hello","payload":{}}"#).await.unwrap();
            peer.recv().await.unwrap()
        });

        let mut channel = TcpTransport.connect(&addr.to_string()).await.unwrap();
        assert_eq!(
            channel.recv().await.unwrap().as_deref(),
            Some(r#"{"type":"hello","payload":{}}"#)
        );
        channel.send(r#"{"type":"ready_for_graph","payload":{}}"#).await.unwrap();

        let echoed = server.await.unwrap();
        assert_eq!(echoed.as_deref(), Some(r#"{"type":"ready_for_graph","payload":{}}"#));
    }

    #[tokio::test]
    async fn recv_reports_orderly_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut peer = TcpChannel::new(stream).unwrap();
            peer.send("").await.unwrap();
            peer.send("last").await.unwrap();
            peer.close().await.unwrap();
        });

        let mut channel = TcpTransport.connect(&addr.to_string()).await.unwrap();
        assert_eq!(channel.recv().await.unwrap().as_deref(), Some("last"));
        assert_eq!(channel.recv().await.unwrap(), None);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let err = TcpTransport.connect(&addr.to_string()).await.err().unwrap();
        assert!(matches!(err, crate::TransferError::Io(_)));
    }
}
