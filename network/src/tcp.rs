//! TCP realisation of the router/dealer mesh.
//!
//! Every party binds one listening socket (the router role) and opens one
//! outbound connection per remote peer (the dealer role), tagged with the
//! routing identity `Party{self}_to_{peer}`. Accepted connections are read by
//! background tasks that only feed an in-memory queue; all protocol state
//! stays with the task that owns the [`TcpMesh`] value.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::framing::{read_frame, write_frame, MAX_FRAME_LEN};
use crate::{Inbound, MeshConfig, MeshStats, MeshTransport, NetworkError, PartyId, RoutingId};

const CONNECT_ATTEMPTS: usize = 5;
const CONNECT_BACKOFF: Duration = Duration::from_secs(1);
const QUEUE_CAPACITY: usize = 64;

/// One outbound dealer connection: the write side carries identified
/// messages to the peer's router, the queue carries the peer's replies back.
struct DealerLink {
    writer: OwnedWriteHalf,
    replies: mpsc::Receiver<Vec<u8>>,
}

pub struct TcpMesh {
    local_id: PartyId,
    links: HashMap<PartyId, DealerLink>,
    inbound: mpsc::Receiver<Inbound>,
    reply_writers: Arc<Mutex<HashMap<RoutingId, OwnedWriteHalf>>>,
    last_routing_id: Option<RoutingId>,
    stats: MeshStats,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl TcpMesh {
    /// Binds the router endpoint and connects a dealer link to every peer in
    /// the configuration.
    ///
    /// Peers come up in no particular order, so each outbound connect is
    /// retried a few times with a one second backoff before giving up.
    pub async fn connect(config: MeshConfig) -> Result<Self, NetworkError> {
        let local_id = config.local_id;
        let local_addr = *config
            .endpoints
            .get(&local_id)
            .ok_or(NetworkError::UnknownPeer(local_id))?;

        let listener = TcpListener::bind(local_addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: local_addr,
                source,
            })?;
        info!(party = local_id, %local_addr, "router endpoint bound");

        let (inbound_tx, inbound) = mpsc::channel(QUEUE_CAPACITY);
        let reply_writers: Arc<Mutex<HashMap<RoutingId, OwnedWriteHalf>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = vec![tokio::spawn(accept_loop(
            listener,
            inbound_tx,
            Arc::clone(&reply_writers),
        ))];

        let mut peers: Vec<(PartyId, SocketAddr)> = config
            .endpoints
            .iter()
            .filter(|(&peer, _)| peer != local_id)
            .map(|(&peer, &addr)| (peer, addr))
            .collect();
        peers.sort_unstable_by_key(|(peer, _)| *peer);

        let mut links = HashMap::new();
        for (peer, addr) in peers {
            let stream = match connect_with_retry(local_id, peer, addr).await {
                Ok(stream) => stream,
                Err(err) => {
                    for task in &tasks {
                        task.abort();
                    }
                    return Err(err);
                }
            };
            let _ = stream.set_nodelay(true);
            let (reader, writer) = stream.into_split();
            let (replies_tx, replies) = mpsc::channel(QUEUE_CAPACITY);
            tasks.push(tokio::spawn(reply_reader(reader, replies_tx)));
            links.insert(peer, DealerLink { writer, replies });
            debug!(party = local_id, peer, %addr, "dealer link connected");
        }

        Ok(Self {
            local_id,
            links,
            inbound,
            reply_writers,
            last_routing_id: None,
            stats: MeshStats::default(),
            tasks,
            closed: false,
        })
    }

    fn record_sent(&mut self, bytes: usize) {
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += bytes as u64;
    }

    fn record_received(&mut self, bytes: usize) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += bytes as u64;
    }
}

#[async_trait]
impl MeshTransport for TcpMesh {
    fn local_id(&self) -> PartyId {
        self.local_id
    }

    fn peer_ids(&self) -> Vec<PartyId> {
        let mut peers: Vec<PartyId> = self.links.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    async fn send_to(&mut self, peer: PartyId, payload: &[u8]) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        if payload.len() > MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge(payload.len()));
        }
        let identity = RoutingId::new(self.local_id, peer).to_string();
        let link = self
            .links
            .get_mut(&peer)
            .ok_or(NetworkError::UnknownPeer(peer))?;
        write_frame(&mut link.writer, identity.as_bytes()).await?;
        write_frame(&mut link.writer, payload).await?;
        self.record_sent(payload.len());
        Ok(())
    }

    async fn broadcast(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        for peer in self.peer_ids() {
            if let Err(err) = self.send_to(peer, payload).await {
                warn!(party = self.local_id, peer, %err, "broadcast delivery failed");
            }
        }
        Ok(())
    }

    async fn multicast(&mut self, peers: &[PartyId], payload: &[u8]) -> Result<(), NetworkError> {
        for &peer in peers {
            self.send_to(peer, payload).await?;
        }
        Ok(())
    }

    async fn recv_any(&mut self, timeout: Duration) -> Result<Option<Inbound>, NetworkError> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(NetworkError::Closed),
            Ok(Some(message)) => {
                self.last_routing_id = Some(message.routing_id);
                self.record_received(message.payload.len());
                Ok(Some(message))
            }
        }
    }

    async fn recv_from(
        &mut self,
        peer: PartyId,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, NetworkError> {
        let link = self
            .links
            .get_mut(&peer)
            .ok_or(NetworkError::UnknownPeer(peer))?;
        match tokio::time::timeout(timeout, link.replies.recv()).await {
            Err(_) => Ok(None),
            Ok(None) => Err(NetworkError::Closed),
            Ok(Some(payload)) => {
                self.record_received(payload.len());
                Ok(Some(payload))
            }
        }
    }

    async fn reply(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        let routing_id = self.last_routing_id.ok_or(NetworkError::NoReplyRoute)?;
        self.reply_to(routing_id, payload).await
    }

    async fn reply_to(
        &mut self,
        routing_id: RoutingId,
        payload: &[u8],
    ) -> Result<(), NetworkError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(NetworkError::FrameTooLarge(payload.len()));
        }
        let mut writers = self.reply_writers.lock().await;
        let writer = writers
            .get_mut(&routing_id)
            .ok_or(NetworkError::UnknownRoute(routing_id))?;
        write_frame(writer, payload).await?;
        drop(writers);
        self.record_sent(payload.len());
        Ok(())
    }

    fn stats(&self) -> MeshStats {
        self.stats
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.links.clear();
        self.reply_writers.lock().await.clear();
        let stats = self.stats;
        info!(
            party = self.local_id,
            sent = stats.messages_sent,
            received = stats.messages_received,
            "mesh transport closed"
        );
    }
}

impl Drop for TcpMesh {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn connect_with_retry(
    local_id: PartyId,
    peer: PartyId,
    addr: SocketAddr,
) -> Result<TcpStream, NetworkError> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(source) if attempt < CONNECT_ATTEMPTS => {
                debug!(
                    party = local_id,
                    peer,
                    %addr,
                    attempt,
                    %source,
                    "dealer connect failed; backing off"
                );
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
            Err(source) => return Err(NetworkError::Connect { peer, addr, source }),
        }
    }
}

/// Accepts router-side connections for the lifetime of the mesh. Reader tasks
/// are owned by the local join set, so aborting the accept loop tears all of
/// them down with it.
async fn accept_loop(
    listener: TcpListener,
    inbound_tx: mpsc::Sender<Inbound>,
    reply_writers: Arc<Mutex<HashMap<RoutingId, OwnedWriteHalf>>>,
) {
    let mut readers = JoinSet::new();
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let _ = stream.set_nodelay(true);
                readers.spawn(router_reader(
                    stream,
                    inbound_tx.clone(),
                    Arc::clone(&reply_writers),
                ));
            }
            Err(err) => {
                warn!(%err, "router accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Reads identified messages off one accepted connection.
///
/// The first message with a well-formed identity registers the write half of
/// the connection as the return path for that routing identity. Messages with
/// a malformed identity are dropped; the link stays up.
async fn router_reader(
    stream: TcpStream,
    inbound_tx: mpsc::Sender<Inbound>,
    reply_writers: Arc<Mutex<HashMap<RoutingId, OwnedWriteHalf>>>,
) {
    let (mut reader, writer) = stream.into_split();
    let mut writer = Some(writer);
    loop {
        let identity_frame = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let payload = match read_frame(&mut reader).await {
            Ok(frame) => frame,
            Err(_) => break,
        };
        let identity = match std::str::from_utf8(&identity_frame) {
            Ok(identity) => identity,
            Err(_) => {
                warn!("dropping message whose identity frame is not UTF-8");
                continue;
            }
        };
        let routing_id = match RoutingId::parse(identity) {
            Ok(routing_id) => routing_id,
            Err(err) => {
                warn!(identity, %err, "dropping message with malformed identity");
                continue;
            }
        };
        if let Some(writer) = writer.take() {
            reply_writers.lock().await.insert(routing_id, writer);
        }
        let message = Inbound {
            sender: routing_id.src,
            routing_id,
            payload,
        };
        if inbound_tx.send(message).await.is_err() {
            break;
        }
    }
}

/// Reads reply frames off the dealer side of one outbound connection.
async fn reply_reader(mut reader: OwnedReadHalf, replies_tx: mpsc::Sender<Vec<u8>>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(payload) => {
                if replies_tx.send(payload).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
