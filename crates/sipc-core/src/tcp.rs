//! TCP transport: every connection is one address.
//!
//! Frames are length-prefixed with [`LengthCodec`]. Inbound frames carry
//! their connection as the reply address, so a responder simply answers
//! whoever wrote to it. A read error, an oversized frame or EOF closes the
//! connection and emits [`TransportEvent::PeerGone`].
//! [`TcpHub::shutdown`] releases every listening socket and connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::framing::{FramingError, LengthCodec};
use crate::transport::{
    Address, EventReceiver, Inbound, MessageTransport, TransportError, TransportEvent,
};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Connection table shared by every TCP endpoint of one process.
pub struct TcpHub {
    codec: LengthCodec,
    next_id: AtomicU64,
    conns: DashMap<Address, mpsc::UnboundedSender<Bytes>>,
    listeners: DashMap<SocketAddr, JoinHandle<()>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TcpHub {
    pub fn new() -> (Arc<Self>, EventReceiver) {
        Self::with_codec(LengthCodec::default())
    }

    pub fn with_codec(codec: LengthCodec) -> (Arc<Self>, EventReceiver) {
        let (events, rx) = mpsc::unbounded_channel();
        let hub = Arc::new(Self {
            codec,
            next_id: AtomicU64::new(0),
            conns: DashMap::new(),
            listeners: DashMap::new(),
            events,
        });
        (hub, rx)
    }

    /// Bind `addr` and accept connections in the background.
    ///
    /// Returns the bound socket address (useful with port 0).
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(%local, "listening");

        let hub = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        let addr = hub.register(stream);
                        debug!(%addr, %remote, "accepted connection");
                    }
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        if hub.events.is_closed() {
                            break;
                        }
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        });
        self.listeners.insert(local, task);
        Ok(local)
    }

    /// Stop every accept loop and close every connection.
    ///
    /// Listening sockets are released before this returns.
    pub async fn shutdown(&self) {
        let bound: Vec<SocketAddr> = self.listeners.iter().map(|e| *e.key()).collect();
        for local in bound {
            if let Some((_, task)) = self.listeners.remove(&local) {
                task.abort();
                let _ = task.await;
                info!(%local, "stopped listening");
            }
        }
        self.conns.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Open a connection to a listening hub.
    pub async fn connect(self: &Arc<Self>, remote: SocketAddr) -> Result<Address, TransportError> {
        let stream = TcpStream::connect(remote).await?;
        let addr = self.register(stream);
        debug!(%addr, %remote, "connected");
        Ok(addr)
    }

    /// Close one connection. The peer sees EOF.
    pub fn close(&self, addr: Address) {
        if self.conns.remove(&addr).is_some() {
            debug!(%addr, "closing connection");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    fn register(self: &Arc<Self>, stream: TcpStream) -> Address {
        let addr = Address(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.insert(addr, tx);

        tokio::spawn(write_loop(addr, writer, rx, self.codec));
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = hub.read_loop(addr, reader).await {
                debug!(%addr, "connection ended: {}", e);
            }
            hub.conns.remove(&addr);
            let _ = hub.events.send(TransportEvent::PeerGone(addr));
        });
        addr
    }

    async fn read_loop(&self, addr: Address, mut reader: OwnedReadHalf) -> Result<(), FramingError> {
        let mut buf = BytesMut::with_capacity(4096);
        loop {
            while let Some(frame) = self.codec.decode_stream(&mut buf)? {
                let event = TransportEvent::Message(Inbound {
                    frame,
                    reply_to: Some(addr),
                });
                if self.events.send(event).is_err() {
                    return Ok(());
                }
            }
            if reader.read_buf(&mut buf).await? == 0 {
                return Ok(());
            }
        }
    }
}

async fn write_loop(
    addr: Address,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    codec: LengthCodec,
) {
    let mut out = BytesMut::new();
    while let Some(frame) = rx.recv().await {
        out.clear();
        if let Err(e) = codec.encode(&frame, &mut out) {
            warn!(%addr, "dropping outbound frame: {}", e);
            continue;
        }
        if let Err(e) = writer.write_all(&out).await {
            debug!(%addr, "write failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[async_trait]
impl MessageTransport for TcpHub {
    async fn send(
        &self,
        to: Address,
        frame: Bytes,
        _reply_to: Option<Address>,
    ) -> Result<(), TransportError> {
        if frame.len() > self.codec.max_frame_size() {
            return Err(FramingError::TooLarge(frame.len(), self.codec.max_frame_size()).into());
        }
        let conn = self.conns.get(&to).ok_or(TransportError::Unavailable(to))?;
        conn.send(frame).map_err(|_| TransportError::Unavailable(to))
    }

    fn is_reachable(&self, to: Address) -> bool {
        self.conns
            .get(&to)
            .map(|conn| !conn.is_closed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut EventReceiver) -> TransportEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("hub alive")
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (server, mut server_rx) = TcpHub::new();
        let bound = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let (client, mut client_rx) = TcpHub::new();
        let conn = client.connect(bound).await.unwrap();
        client.send(conn, Bytes::from_static(b"ping"), None).await.unwrap();

        let reply_to = match next_event(&mut server_rx).await {
            TransportEvent::Message(inbound) => {
                assert_eq!(inbound.frame.as_ref(), b"ping");
                inbound.reply_to.unwrap()
            }
            other => panic!("unexpected {:?}", other),
        };
        server.send(reply_to, Bytes::from_static(b"pong"), None).await.unwrap();

        match next_event(&mut client_rx).await {
            TransportEvent::Message(inbound) => {
                assert_eq!(inbound.frame.as_ref(), b"pong");
                assert_eq!(inbound.reply_to, Some(conn));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_reports_peer_gone() {
        let (server, mut server_rx) = TcpHub::new();
        let bound = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (client, _client_rx) = TcpHub::new();
        let conn = client.connect(bound).await.unwrap();

        client.send(conn, Bytes::from_static(b"hi"), None).await.unwrap();
        let peer = match next_event(&mut server_rx).await {
            TransportEvent::Message(inbound) => inbound.reply_to.unwrap(),
            other => panic!("unexpected {:?}", other),
        };

        client.close(conn);
        assert!(!client.is_reachable(conn));
        assert!(matches!(
            next_event(&mut server_rx).await,
            TransportEvent::PeerGone(gone) if gone == peer
        ));
        assert!(!server.is_reachable(peer));
    }

    #[tokio::test]
    async fn test_shutdown_releases_listener() {
        let (server, _server_rx) = TcpHub::new();
        let bound = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (client, mut client_rx) = TcpHub::new();
        let conn = client.connect(bound).await.unwrap();
        assert_eq!(server.listener_count(), 1);

        server.shutdown().await;
        assert_eq!(server.listener_count(), 0);
        assert_eq!(server.connection_count(), 0);
        assert!(TcpStream::connect(bound).await.is_err());

        // The open connection sees the server go away.
        assert!(matches!(
            next_event(&mut client_rx).await,
            TransportEvent::PeerGone(gone) if gone == conn
        ));
    }

    #[tokio::test]
    async fn test_oversized_send_rejected() {
        let (hub, _rx) = TcpHub::new();
        let big = Bytes::from(vec![0u8; crate::framing::MAX_FRAME_SIZE + 1]);
        assert!(matches!(
            hub.send(Address(1), big, None).await,
            Err(TransportError::Framing(FramingError::TooLarge(..)))
        ));
    }

    #[tokio::test]
    async fn test_unknown_connection_unavailable() {
        let (hub, _rx) = TcpHub::new();
        assert!(matches!(
            hub.send(Address(42), Bytes::from_static(b"x"), None).await,
            Err(TransportError::Unavailable(Address(42)))
        ));
    }
}
