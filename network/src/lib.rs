pub mod framing;
pub mod local;
pub mod tcp;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Type to identify a party in a protocol session.
pub type PartyId = usize;

/// Receive timeout used by event loops so they can periodically re-check
/// their running flag.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(300);

/// Error type for mesh transport issues.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind router endpoint {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("failed to connect to party {peer} at {addr}: {source}")]
    Connect {
        peer: PartyId,
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("no dealer link for party {0}")]
    UnknownPeer(PartyId),
    #[error("malformed routing identity {0:?}")]
    MalformedIdentity(String),
    #[error("no open return link for routing identity {0}")]
    UnknownRoute(RoutingId),
    #[error("no routing identity stored to reply to")]
    NoReplyRoute,
    #[error("frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),
    #[error("the transport has been closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable identity tag of one directed dealer-to-router link.
///
/// Rendered on the wire as `Party{src}_to_{dst}`; a router parses the sender
/// of every inbound message out of this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingId {
    pub src: PartyId,
    pub dst: PartyId,
}

impl RoutingId {
    pub fn new(src: PartyId, dst: PartyId) -> Self {
        Self { src, dst }
    }

    /// Parses an identity string of the exact form `Party{src}_to_{dst}`.
    pub fn parse(identity: &str) -> Result<Self, NetworkError> {
        let malformed = || NetworkError::MalformedIdentity(identity.to_owned());
        let rest = identity.strip_prefix("Party").ok_or_else(malformed)?;
        let (src, dst) = rest.split_once("_to_").ok_or_else(malformed)?;
        let parse_id = |digits: &str| {
            if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(malformed());
            }
            digits.parse::<PartyId>().map_err(|_| malformed())
        };
        Ok(Self {
            src: parse_id(src)?,
            dst: parse_id(dst)?,
        })
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Party{}_to_{}", self.src, self.dst)
    }
}

/// One message taken off the router endpoint.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub sender: PartyId,
    pub routing_id: RoutingId,
    pub payload: Vec<u8>,
}

/// Message and byte counters of one transport instance.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshStats {
    pub messages_sent: u64,
    pub bytes_sent: u64,
    pub messages_received: u64,
    pub bytes_received: u64,
}

/// An n-by-n mesh in which every party owns one inbound router endpoint and
/// one identified outbound dealer link per remote peer.
///
/// Messages are opaque byte payloads. Delivery is best effort; FIFO order is
/// preserved per dealer-to-router link but not across senders.
#[async_trait]
pub trait MeshTransport: Send {
    /// The id of the party this transport belongs to.
    fn local_id(&self) -> PartyId;

    /// The ids of all remote peers, in ascending order.
    fn peer_ids(&self) -> Vec<PartyId>;

    /// Sends a payload on the dealer link for the given peer.
    async fn send_to(&mut self, peer: PartyId, payload: &[u8]) -> Result<(), NetworkError>;

    /// Sends the same payload to every peer. Per-peer failures are logged
    /// and skipped; the broadcast itself never aborts.
    async fn broadcast(&mut self, payload: &[u8]) -> Result<(), NetworkError>;

    /// Sends the same payload to the listed peers, failing on the first
    /// delivery error.
    async fn multicast(&mut self, peers: &[PartyId], payload: &[u8]) -> Result<(), NetworkError>;

    /// Receives one message on the router endpoint, from any sender.
    ///
    /// Returns `None` on timeout. The routing identity of the returned
    /// message is stored for a subsequent [`MeshTransport::reply`].
    async fn recv_any(&mut self, timeout: Duration) -> Result<Option<Inbound>, NetworkError>;

    /// Receives one payload on the dealer return path from a specific peer.
    /// Returns `None` on timeout.
    async fn recv_from(
        &mut self,
        peer: PartyId,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, NetworkError>;

    /// Sends a payload back over the routing identity of the last message
    /// returned by [`MeshTransport::recv_any`].
    async fn reply(&mut self, payload: &[u8]) -> Result<(), NetworkError>;

    /// Sends a payload back over an explicit routing identity, without
    /// relying on stored state.
    async fn reply_to(&mut self, routing_id: RoutingId, payload: &[u8])
        -> Result<(), NetworkError>;

    /// Traffic counters of this transport.
    fn stats(&self) -> MeshStats;

    /// Tears the mesh down immediately. Idempotent.
    async fn close(&mut self);
}

/// Static endpoint assignment of one mesh member.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    pub local_id: PartyId,
    pub endpoints: std::collections::HashMap<PartyId, SocketAddr>,
}

impl MeshConfig {
    pub fn new(
        local_id: PartyId,
        endpoints: std::collections::HashMap<PartyId, SocketAddr>,
    ) -> Self {
        Self {
            local_id,
            endpoints,
        }
    }

    /// Builds the loopback endpoint table used by the reference fixture:
    /// party id `i` listens on `127.0.0.1:(base_port + i - 1)`.
    pub fn loopback(local_id: PartyId, n_members: usize, base_port: u16) -> Self {
        let endpoints = (1..=n_members)
            .map(|id| {
                let port = base_port + (id as u16) - 1;
                (id, SocketAddr::from(([127, 0, 0, 1], port)))
            })
            .collect();
        Self {
            local_id,
            endpoints,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_render_and_parse_routing_ids() {
        let routing_id = RoutingId::new(4, 2);
        assert_eq!(routing_id.to_string(), "Party4_to_2");
        assert_eq!(RoutingId::parse("Party4_to_2").unwrap(), routing_id);
    }

    #[test]
    fn should_reject_malformed_identities() {
        for identity in [
            "Peer5_to_4",
            "Party_to_4",
            "Party5_to_",
            "Party5to4",
            "party5_to_4",
            "Party5_to_4x",
            "",
        ] {
            assert!(
                matches!(
                    RoutingId::parse(identity),
                    Err(NetworkError::MalformedIdentity(_))
                ),
                "identity {identity:?} should be rejected"
            );
        }
    }

    #[test]
    fn loopback_config_derives_ports_from_party_ids() {
        let config = MeshConfig::loopback(2, 4, 5555);
        assert_eq!(config.endpoints.len(), 4);
        assert_eq!(
            config.endpoints[&1],
            SocketAddr::from(([127, 0, 0, 1], 5555))
        );
        assert_eq!(
            config.endpoints[&4],
            SocketAddr::from(([127, 0, 0, 1], 5558))
        );
    }
}
