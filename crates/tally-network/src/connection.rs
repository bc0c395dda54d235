//! Connection management
//!
//! Framing over byte streams, listener binding with port retry, bounded
//! dials and writes, and a registry of live connections.

use crate::codec::{Message, LENGTH_PREFIX_LEN};
use crate::error::{NetworkError, NetworkResult};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use rand::Rng;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, warn};

/// Range new ports are drawn from after a bind conflict
const EPHEMERAL_PORTS: std::ops::RangeInclusive<u16> = 49152..=65535;

/// Read one frame payload from the stream
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> NetworkResult<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    // EOF before the first prefix byte is a clean close; anywhere later the
    // frame is truncated.
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_u8().await {
        Ok(first) => len_buf[0] = first,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    reader.read_exact(&mut len_buf[1..]).await?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_frame_size {
        return Err(NetworkError::FrameTooLarge {
            len,
            max: max_frame_size,
        });
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf.freeze()))
}

/// Read and decode one message from the stream
pub async fn read_message<R>(reader: &mut R, max_frame_size: usize) -> NetworkResult<Option<Message>>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, max_frame_size).await? {
        Some(payload) => Message::from_payload(&payload).map(Some),
        None => Ok(None),
    }
}

/// Write an already-encoded frame to the stream
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a message to the stream
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> NetworkResult<()>
where
    W: AsyncWrite + Unpin,
{
    let data = msg.encode()?;
    write_frame(writer, &data).await
}

/// Write a message, giving up after `limit`
pub async fn send(stream: &mut TcpStream, msg: &Message, limit: Duration) -> NetworkResult<()> {
    match tokio::time::timeout(limit, write_message(stream, msg)).await {
        Ok(result) => result,
        Err(_) => Err(NetworkError::Timeout(format!(
            "write of {} exceeded {:?}",
            msg.kind(),
            limit
        ))),
    }
}

/// Open a TCP connection, giving up after `limit`
pub async fn dial(addr: &str, limit: Duration) -> NetworkResult<TcpStream> {
    let stream = match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(NetworkError::ConnectionFailed(format!("{}: {}", addr, e))),
        Err(_) => {
            return Err(NetworkError::Timeout(format!(
                "dial {} exceeded {:?}",
                addr, limit
            )))
        }
    };
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Bind a listener on `host`, starting at `preferred_port`
///
/// On a port conflict a random port from the ephemeral range is tried next,
/// up to `max_attempts` binds in total.
pub async fn bind_listener(
    host: IpAddr,
    preferred_port: u16,
    max_attempts: usize,
) -> NetworkResult<TcpListener> {
    let mut port = preferred_port;
    for attempt in 1..=max_attempts {
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                let next = rand::thread_rng().gen_range(EPHEMERAL_PORTS);
                warn!(
                    "Port {} in use (attempt {}/{}), retrying on {}",
                    port, attempt, max_attempts, next
                );
                port = next;
            }
            Err(e) => return Err(NetworkError::Bind(format!("{}:{}: {}", host, port, e))),
        }
    }
    Err(NetworkError::PortInUse {
        attempts: max_attempts,
    })
}

/// Local IP of the interface used for outbound traffic
///
/// No packet is sent; connecting a UDP socket only selects a route. Falls
/// back to loopback when no route exists.
pub async fn outbound_ip() -> IpAddr {
    async fn probe() -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await?;
        Ok(socket.local_addr()?.ip())
    }

    match probe().await {
        Ok(ip) => ip,
        Err(e) => {
            warn!("Could not determine outbound address, using loopback: {}", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Connection direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Accepted by our listener
    Inbound,
    /// Dialed by us
    Outbound,
}

/// Connection identifier, unique per registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// Live connection information
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Registry-assigned id
    pub id: ConnectionId,
    /// Remote address
    pub remote: SocketAddr,
    /// Direction
    pub direction: Direction,
    /// When the connection was registered
    pub opened_at: Instant,
}

/// Registry of live inbound and outbound connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    inbound: DashMap<ConnectionId, ConnectionInfo>,
    outbound: DashMap<ConnectionId, ConnectionInfo>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; it stays registered until the guard drops
    pub fn register(self: &Arc<Self>, remote: SocketAddr, direction: Direction) -> ConnectionGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ConnectionInfo {
            id,
            remote,
            direction,
            opened_at: Instant::now(),
        };
        self.table(direction).insert(id, info.clone());
        debug!("Registered {:?} connection {:?} to {}", direction, id, remote);
        ConnectionGuard {
            registry: Arc::clone(self),
            info,
        }
    }

    /// Number of live inbound connections
    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    /// Number of live outbound connections
    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Snapshot of live connections in one direction
    pub fn connections(&self, direction: Direction) -> Vec<ConnectionInfo> {
        let mut list: Vec<_> = self
            .table(direction)
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        list.sort_by_key(|info| info.id);
        list
    }

    fn table(&self, direction: Direction) -> &DashMap<ConnectionId, ConnectionInfo> {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn remove(&self, info: &ConnectionInfo) {
        self.table(info.direction).remove(&info.id);
    }
}

/// Keeps a connection registered while alive
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    info: ConnectionInfo,
}

impl ConnectionGuard {
    /// Registered information
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.info);
        debug!("Released connection {:?} to {}", self.info.id, self.info.remote);
    }
}
