//! The worker side of the dealer-driven protocol.
//!
//! A worker is a single-threaded event loop: receive one message with a
//! short timeout, dispatch on the command byte, run the handler to
//! completion, maybe reply. All protocol state lives in the loop's task.

use std::collections::VecDeque;

use arithmpc_common::field::Fp;
use arithmpc_common::share::beaver::{self, TripleShare};
use arithmpc_network::{Inbound, MeshTransport, PartyId, RoutingId, RECV_TIMEOUT};
use tracing::{debug, info, warn};

use crate::error::MpcError;
use crate::params::{check_coefficients, ProtocolParams, DESIGNATED_WORKER, RESPONSE_DEADLINE};
use crate::preprocessing::TriplePackage;
use crate::wire::{self, Command, WireError};

pub struct Worker<M: MeshTransport> {
    id: PartyId,
    params: ProtocolParams,
    transport: M,
    /// Messages that arrived out of turn, kept until a handler asks for
    /// their sender. Cross-sender arrival order is unordered, so a fast
    /// peer's partial opening can overtake the dealer's next command.
    pending: VecDeque<Inbound>,
    running: bool,
    received_shares: Vec<Fp>,
    received_mac_shares: Vec<Fp>,
    triple: Option<TripleShare<Fp>>,
    triple_mac: Option<TripleShare<Fp>>,
    key_share: Option<Fp>,
    z_share: Option<Fp>,
    z_mac_share: Option<Fp>,
    epsilon: Option<Fp>,
    rho: Option<Fp>,
    check_coefficients: (Fp, Fp),
}

impl<M: MeshTransport> Worker<M> {
    pub fn new(params: ProtocolParams, transport: M) -> Result<Self, MpcError> {
        let id = transport.local_id();
        if id < 1 || id > params.n_workers {
            return Err(MpcError::Config(format!(
                "worker id {id} is outside 1..={}",
                params.n_workers
            )));
        }
        let check_coefficients = check_coefficients(&params.check_seed);
        Ok(Self {
            id,
            params,
            transport,
            pending: VecDeque::new(),
            running: true,
            received_shares: Vec::new(),
            received_mac_shares: Vec::new(),
            triple: None,
            triple_mac: None,
            key_share: None,
            z_share: None,
            z_mac_share: None,
            epsilon: None,
            rho: None,
            check_coefficients,
        })
    }

    /// Runs the event loop until SHUTDOWN is processed or a fatal error
    /// occurs. Malformed messages are logged and dropped; the loop keeps
    /// running.
    pub async fn run(mut self) -> Result<(), MpcError> {
        info!(worker = self.id, "event loop started");
        while self.running {
            let Some(message) = self.transport.recv_any(RECV_TIMEOUT).await? else {
                continue;
            };
            if message.sender != self.params.dealer_id() {
                debug!(
                    worker = self.id,
                    sender = message.sender,
                    "buffering message that overtook the dealer"
                );
                self.pending.push_back(message);
                continue;
            }
            if let Err(err) = self.dispatch(message).await {
                match err {
                    MpcError::Wire(err) => {
                        warn!(worker = self.id, %err, "dropping malformed message");
                    }
                    fatal => {
                        self.transport.close().await;
                        return Err(fatal);
                    }
                }
            }
        }
        info!(worker = self.id, "event loop stopped");
        self.transport.close().await;
        Ok(())
    }

    async fn dispatch(&mut self, message: Inbound) -> Result<(), MpcError> {
        let command = Command::from_frame(&message.payload)?;
        debug!(worker = self.id, ?command, "dispatching command");
        match command {
            Command::SendShares => self.handle_send_shares().await,
            Command::Addition => self.handle_addition().await,
            Command::Multiplication => self.handle_multiplication().await,
            Command::FetchMultShare => self.handle_fetch_mult_share().await,
            Command::Shutdown => {
                info!(worker = self.id, "shutdown received");
                self.running = false;
                Ok(())
            }
            Command::Success => {
                warn!(worker = self.id, "ignoring stray SUCCESS ack");
                Ok(())
            }
        }
    }

    /// Stores the composite share payload that follows a SEND_SHARES
    /// command and acknowledges it.
    async fn handle_send_shares(&mut self) -> Result<(), MpcError> {
        let payload = self.next_from(self.params.dealer_id(), "secret shares").await?;
        let elements = wire::decode_elements(&payload.payload)?;
        if self.params.malicious {
            if elements.is_empty() || elements.len() % 2 != 0 {
                return Err(WireError::UnpairedMacSegments(elements.len()).into());
            }
            let half = elements.len() / 2;
            self.received_mac_shares = elements[half..].to_vec();
            self.received_shares = elements[..half].to_vec();
        } else {
            self.received_shares = elements;
            self.received_mac_shares.clear();
        }
        info!(
            worker = self.id,
            secrets = self.received_shares.len(),
            "secret shares stored"
        );
        self.transport.reply(&Command::Success.to_frame()).await?;
        Ok(())
    }

    /// Opens this worker's contribution to the sum of all secrets. The
    /// partial sum is computed before the reply goes out, so the dealer's
    /// ack collection doubles as a completion barrier.
    async fn handle_addition(&mut self) -> Result<(), MpcError> {
        let partial_sum: Fp = self.received_shares.iter().sum();
        let mut opening = vec![partial_sum];
        if self.params.malicious {
            opening.push(self.received_mac_shares.iter().sum());
        }
        debug!(worker = self.id, "partial sum opened");
        self.transport.reply(&wire::encode_elements(&opening)).await?;
        Ok(())
    }

    async fn handle_multiplication(&mut self) -> Result<(), MpcError> {
        self.receive_triple().await?;
        let dealer_route = self.dealer_route();
        self.transport
            .reply_to(dealer_route, &Command::Success.to_frame())
            .await?;
        self.evaluate_product_gate().await?;
        // The partial opening rotated the stored routing id, so the second
        // ack names the dealer route explicitly.
        self.transport
            .reply_to(dealer_route, &Command::Success.to_frame())
            .await?;
        Ok(())
    }

    async fn receive_triple(&mut self) -> Result<(), MpcError> {
        let payload = self.next_from(self.params.dealer_id(), "beaver triple").await?;
        let expected = if self.params.malicious {
            TriplePackage::AUTHENTICATED_SEGMENTS
        } else {
            TriplePackage::PLAIN_SEGMENTS
        };
        let elements = wire::decode_exact(&payload.payload, expected)?;
        let package = TriplePackage::from_elements(&elements, self.params.malicious)
            .ok_or_else(|| self.dealer_protocol_error("triple payload shape mismatch"))?;
        self.triple = Some(package.triple);
        self.triple_mac = package.mac;
        if package.key_share.is_some() {
            self.key_share = package.key_share;
        }
        debug!(worker = self.id, "beaver triple stored");
        Ok(())
    }

    /// The local multiplication protocol: open x - a and y - b among the
    /// workers, then evaluate the product share from the totals.
    async fn evaluate_product_gate(&mut self) -> Result<(), MpcError> {
        let (x, y) = match (self.received_shares.first(), self.received_shares.get(1)) {
            (Some(&x), Some(&y)) => (x, y),
            _ => {
                return Err(self.dealer_protocol_error(
                    "multiplication requested with fewer than two stored shares",
                ))
            }
        };
        let triple = self
            .triple
            .take()
            .ok_or_else(|| self.dealer_protocol_error("multiplication before triple delivery"))?;

        let (d_share, e_share) = beaver::masked_pair(x, y, &triple);
        let opening = wire::encode_elements(&[d_share, e_share]);
        let peers: Vec<PartyId> = self
            .params
            .worker_ids()
            .filter(|&peer| peer != self.id)
            .collect();
        self.transport.multicast(&peers, &opening).await?;

        let mut d_total = d_share;
        let mut e_total = e_share;
        for peer in peers {
            let message = self.next_from(peer, "partial opening").await?;
            let pair = wire::decode_exact(&message.payload, 2)?;
            d_total += pair[0];
            e_total += pair[1];
        }
        self.epsilon = Some(d_total);
        self.rho = Some(e_total);

        let product =
            beaver::product_share(&triple, d_total, e_total, self.id == DESIGNATED_WORKER);
        self.z_share = Some(product);

        if self.params.malicious {
            let mac_triple = self
                .triple_mac
                .ok_or_else(|| self.dealer_protocol_error("MAC triple missing"))?;
            let key_share = self
                .key_share
                .ok_or_else(|| self.dealer_protocol_error("key share missing"))?;
            self.z_mac_share = Some(beaver::product_mac_share(
                &mac_triple,
                key_share,
                d_total,
                e_total,
            ));
        }
        info!(worker = self.id, "multiplication gate evaluated");
        Ok(())
    }

    /// Hands the product share (and in malicious mode the MAC share and the
    /// batched zero check share) back to the dealer.
    async fn handle_fetch_mult_share(&mut self) -> Result<(), MpcError> {
        let product = self
            .z_share
            .ok_or_else(|| self.dealer_protocol_error("product share fetched before multiplication"))?;
        self.transport.reply(&Command::Success.to_frame()).await?;
        self.transport
            .reply(&wire::encode_elements(&[product]))
            .await?;
        if self.params.malicious {
            let mac = self
                .z_mac_share
                .ok_or_else(|| self.dealer_protocol_error("product MAC share missing"))?;
            let check = self.opening_check_share()?;
            self.transport.reply(&wire::encode_elements(&[mac])).await?;
            self.transport
                .reply(&wire::encode_elements(&[check]))
                .await?;
        }
        Ok(())
    }

    /// Evaluates this worker's share of the batched zero check over the
    /// retained opening totals. Consumes the MAC triple: it is single-use,
    /// like the triple itself.
    fn opening_check_share(&mut self) -> Result<Fp, MpcError> {
        let mac_triple = self
            .triple_mac
            .take()
            .ok_or_else(|| self.dealer_protocol_error("MAC triple missing for the zero check"))?;
        let key_share = self
            .key_share
            .ok_or_else(|| self.dealer_protocol_error("key share missing for the zero check"))?;
        let (mac_x, mac_y) = match (
            self.received_mac_shares.first(),
            self.received_mac_shares.get(1),
        ) {
            (Some(&mac_x), Some(&mac_y)) => (mac_x, mac_y),
            _ => return Err(self.dealer_protocol_error("MAC shares missing for the zero check")),
        };
        let (epsilon, rho) = match (self.epsilon, self.rho) {
            (Some(epsilon), Some(rho)) => (epsilon, rho),
            _ => return Err(self.dealer_protocol_error("no retained opening to check")),
        };
        Ok(beaver::opening_check_share(
            mac_x,
            mac_y,
            &mac_triple,
            key_share,
            self.check_coefficients,
            epsilon,
            rho,
        ))
    }

    /// Returns the next message from the given peer, buffering messages
    /// from other senders until their turn comes.
    async fn next_from(&mut self, peer: PartyId, what: &'static str) -> Result<Inbound, MpcError> {
        if let Some(position) = self
            .pending
            .iter()
            .position(|message| message.sender == peer)
        {
            if let Some(message) = self.pending.remove(position) {
                return Ok(message);
            }
        }
        let deadline = tokio::time::Instant::now() + RESPONSE_DEADLINE;
        loop {
            if let Some(message) = self.transport.recv_any(RECV_TIMEOUT).await? {
                if message.sender == peer {
                    return Ok(message);
                }
                debug!(
                    worker = self.id,
                    sender = message.sender,
                    "buffering out-of-turn message"
                );
                self.pending.push_back(message);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MpcError::Timeout { peer, what });
            }
        }
    }

    fn dealer_route(&self) -> RoutingId {
        RoutingId::new(self.params.dealer_id(), self.id)
    }

    fn dealer_protocol_error(&self, detail: &str) -> MpcError {
        MpcError::Protocol {
            peer: self.params.dealer_id(),
            detail: detail.to_owned(),
        }
    }
}
