//! In-memory mesh for protocol tests.
//!
//! Simulates the router/dealer topology with `tokio` channels: every party
//! owns one inbound queue (the router role) and one reply queue per remote
//! peer (the dealer return path). Observable behavior matches the TCP mesh,
//! without sockets.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{Inbound, MeshStats, MeshTransport, NetworkError, PartyId, RoutingId};

pub struct LocalMesh {
    local_id: PartyId,
    routers: HashMap<PartyId, mpsc::Sender<Inbound>>,
    inbound: mpsc::Receiver<Inbound>,
    reply_senders: HashMap<RoutingId, mpsc::Sender<Vec<u8>>>,
    reply_receivers: HashMap<PartyId, mpsc::Receiver<Vec<u8>>>,
    last_routing_id: Option<RoutingId>,
    stats: MeshStats,
    closed: bool,
}

/// Creates a fully connected in-memory mesh over the given party ids,
/// returning one transport per party in the same order.
pub fn local_mesh(ids: &[PartyId], capacity: usize) -> Vec<LocalMesh> {
    let mut inbound_senders = HashMap::new();
    let mut inbound_receivers = HashMap::new();
    for &id in ids {
        let (sender, receiver) = mpsc::channel(capacity);
        inbound_senders.insert(id, sender);
        inbound_receivers.insert(id, receiver);
    }

    // One reply channel per directed link: the receiver lives with the
    // dealer side (src), the sender with the router side (dst).
    let mut reply_senders: HashMap<PartyId, HashMap<RoutingId, mpsc::Sender<Vec<u8>>>> =
        HashMap::new();
    let mut reply_receivers: HashMap<PartyId, HashMap<PartyId, mpsc::Receiver<Vec<u8>>>> =
        HashMap::new();
    for &src in ids {
        for &dst in ids {
            if src == dst {
                continue;
            }
            let (sender, receiver) = mpsc::channel(capacity);
            reply_senders
                .entry(dst)
                .or_default()
                .insert(RoutingId::new(src, dst), sender);
            reply_receivers.entry(src).or_default().insert(dst, receiver);
        }
    }

    ids.iter()
        .map(|&id| LocalMesh {
            local_id: id,
            routers: inbound_senders
                .iter()
                .filter(|(&peer, _)| peer != id)
                .map(|(&peer, sender)| (peer, sender.clone()))
                .collect(),
            inbound: inbound_receivers
                .remove(&id)
                .expect("every party has an inbound queue"),
            reply_senders: reply_senders.remove(&id).unwrap_or_default(),
            reply_receivers: reply_receivers.remove(&id).unwrap_or_default(),
            last_routing_id: None,
            stats: MeshStats::default(),
            closed: false,
        })
        .collect()
}

impl LocalMesh {
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
impl MeshTransport for LocalMesh {
    fn local_id(&self) -> PartyId {
        self.local_id
    }

    fn peer_ids(&self) -> Vec<PartyId> {
        let mut peers: Vec<PartyId> = self.routers.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    async fn send_to(&mut self, peer: PartyId, payload: &[u8]) -> Result<(), NetworkError> {
        if self.closed {
            return Err(NetworkError::Closed);
        }
        let router = self
            .routers
            .get(&peer)
            .ok_or(NetworkError::UnknownPeer(peer))?;
        let message = Inbound {
            sender: self.local_id,
            routing_id: RoutingId::new(self.local_id, peer),
            payload: payload.to_vec(),
        };
        router
            .send(message)
            .await
            .map_err(|_| NetworkError::Closed)?;
        self.record_sent(payload.len());
        Ok(())
    }

    async fn broadcast(&mut self, payload: &[u8]) -> Result<(), NetworkError> {
        let sends = self.peer_ids().into_iter().map(|peer| {
            let router = self.routers[&peer].clone();
            let message = Inbound {
                sender: self.local_id,
                routing_id: RoutingId::new(self.local_id, peer),
                payload: payload.to_vec(),
            };
            async move { (peer, router.send(message).await) }
        });
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => self.record_sent(payload.len()),
                Err(_) => warn!(
                    party = self.local_id,
                    peer, "broadcast delivery failed; peer queue closed"
                ),
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
        let replies = self
            .reply_receivers
            .get_mut(&peer)
            .ok_or(NetworkError::UnknownPeer(peer))?;
        match tokio::time::timeout(timeout, replies.recv()).await {
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
        let sender = self
            .reply_senders
            .get(&routing_id)
            .ok_or(NetworkError::UnknownRoute(routing_id))?;
        sender
            .send(payload.to_vec())
            .await
            .map_err(|_| NetworkError::Closed)?;
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
        self.routers.clear();
        self.reply_senders.clear();
        self.reply_receivers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RECV_TIMEOUT;

    #[tokio::test]
    async fn test_local_mesh_new() {
        let meshes = local_mesh(&[1, 2, 3], 16);
        assert_eq!(meshes.len(), 3);
        for (mesh, id) in meshes.iter().zip(1..) {
            assert_eq!(mesh.local_id(), id);
            assert_eq!(mesh.peer_ids().len(), 2);
            assert!(!mesh.peer_ids().contains(&id));
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let mut meshes = local_mesh(&[1, 2], 16);
        let mut second = meshes.remove(1);
        let mut first = meshes.remove(0);

        first.send_to(2, b"hello").await.unwrap();
        let message = second.recv_any(RECV_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(message.sender, 1);
        assert_eq!(message.routing_id, RoutingId::new(1, 2));
        assert_eq!(message.payload, b"hello");

        // The other direction stays empty.
        assert!(first.recv_any(RECV_TIMEOUT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reply_follows_the_last_routing_id() {
        let mut meshes = local_mesh(&[1, 2], 16);
        let mut second = meshes.remove(1);
        let mut first = meshes.remove(0);

        first.send_to(2, b"ping").await.unwrap();
        second.recv_any(RECV_TIMEOUT).await.unwrap().unwrap();
        second.reply(b"pong").await.unwrap();

        let reply = first.recv_from(2, RECV_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn test_broadcast_skips_self() {
        let mut meshes = local_mesh(&[1, 2, 3], 16);
        let mut third = meshes.remove(2);
        let mut second = meshes.remove(1);
        let mut first = meshes.remove(0);

        first.broadcast(b"round").await.unwrap();
        assert_eq!(
            second.recv_any(RECV_TIMEOUT).await.unwrap().unwrap().payload,
            b"round"
        );
        assert_eq!(
            third.recv_any(RECV_TIMEOUT).await.unwrap().unwrap().payload,
            b"round"
        );
        assert!(first.recv_any(RECV_TIMEOUT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_per_link_fifo_order() {
        let mut meshes = local_mesh(&[1, 2], 16);
        let mut second = meshes.remove(1);
        let mut first = meshes.remove(0);

        first.send_to(2, b"first").await.unwrap();
        first.send_to(2, b"second").await.unwrap();
        let first_message = second.recv_any(RECV_TIMEOUT).await.unwrap().unwrap();
        let second_message = second.recv_any(RECV_TIMEOUT).await.unwrap().unwrap();
        assert_eq!(first_message.payload, b"first");
        assert_eq!(second_message.payload, b"second");
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_fails() {
        let mut meshes = local_mesh(&[1, 2], 16);
        let mut first = meshes.remove(0);
        let err = first.send_to(9, b"lost").await.unwrap_err();
        assert!(matches!(err, NetworkError::UnknownPeer(9)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut meshes = local_mesh(&[1, 2], 16);
        let mut first = meshes.remove(0);
        first.close().await;
        first.close().await;
        assert!(matches!(
            first.send_to(2, b"late").await.unwrap_err(),
            NetworkError::Closed
        ));
    }
}
