//! The dealer side of the protocol: the party that holds the secrets and
//! drives the command sequence.
//!
//! One session is a fixed circuit: distribute shares, open the sum, run one
//! Beaver multiplication, open the product, shut the workers down. In
//! malicious-security mode every opened value is verified against its SPDZ
//! MAC and any mismatch aborts the session.

use arithmpc_common::field::{self, Fp};
use arithmpc_common::share::additive::{mac_split, mac_verify, reconstruct, split};
use arithmpc_network::{MeshTransport, PartyId, RECV_TIMEOUT};
use ark_ff::{UniformRand, Zero};
use ark_std::rand::Rng;
use tracing::{debug, error, info};

use crate::error::{MacCheck, MpcError};
use crate::params::{ProtocolParams, RESPONSE_DEADLINE};
use crate::preprocessing::{deal_authenticated_triple, deal_triple};
use crate::wire::{self, Command};

/// The two values a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Sum of all dealt secrets.
    pub sum: Fp,
    /// Product of the first two dealt secrets.
    pub product: Fp,
}

pub struct Dealer<M: MeshTransport> {
    params: ProtocolParams,
    transport: M,
}

impl<M: MeshTransport> Dealer<M> {
    pub fn new(params: ProtocolParams, transport: M) -> Result<Self, MpcError> {
        if params.n_workers == 0 {
            return Err(MpcError::Config(
                "a session needs at least one worker".to_owned(),
            ));
        }
        let id = transport.local_id();
        if id != params.dealer_id() {
            return Err(MpcError::Config(format!(
                "dealer id {id} does not match the expected id {}",
                params.dealer_id()
            )));
        }
        Ok(Self { params, transport })
    }

    /// Runs one complete session over the given secrets.
    ///
    /// On an abort the workers are released with a best-effort SHUTDOWN
    /// before the failure surfaces.
    pub async fn run(
        mut self,
        secrets: &[Fp],
        rng: &mut (impl Rng + Send),
    ) -> Result<SessionOutcome, MpcError> {
        let result = self.run_session(secrets, rng).await;
        if result.is_err() {
            let _ = self.transport.broadcast(&Command::Shutdown.to_frame()).await;
        }
        self.transport.close().await;
        result
    }

    async fn run_session(
        &mut self,
        secrets: &[Fp],
        rng: &mut (impl Rng + Send),
    ) -> Result<SessionOutcome, MpcError> {
        if secrets.len() < 2 {
            return Err(MpcError::Config(
                "a session computes over at least two secrets".to_owned(),
            ));
        }

        // Key setup: the global MAC key exists only inside the dealer; the
        // workers only ever see additive shares of it.
        let authentication = if self.params.malicious {
            let key = Fp::rand(rng);
            let key_shares = split(key, self.params.n_workers, rng)?;
            Some((key, key_shares))
        } else {
            None
        };
        let key = authentication.as_ref().map(|(key, _)| *key);

        self.distribute_shares(secrets, key, rng).await?;
        let sum = self.open_addition(key).await?;
        self.run_multiplication(&authentication, rng).await?;
        let product = self.collect_product(key).await?;

        self.transport.broadcast(&Command::Shutdown.to_frame()).await?;
        info!(
            dealer = self.params.dealer_id(),
            sum = %field::to_hex(&sum),
            product = %field::to_hex(&product),
            "session complete"
        );
        Ok(SessionOutcome { sum, product })
    }

    /// Splits every secret (and in malicious mode its MAC) and sends each
    /// worker its column of the share matrix as one composite payload.
    async fn distribute_shares(
        &mut self,
        secrets: &[Fp],
        key: Option<Fp>,
        rng: &mut (impl Rng + Send),
    ) -> Result<(), MpcError> {
        let n_workers = self.params.n_workers;
        let mut share_rows = Vec::with_capacity(secrets.len());
        for &secret in secrets {
            share_rows.push(split(secret, n_workers, rng)?);
        }
        let mut mac_rows = Vec::new();
        if let Some(key) = key {
            for &secret in secrets {
                mac_rows.push(mac_split(secret, key, n_workers, rng)?);
            }
        }

        for worker in self.params.worker_ids() {
            self.transport
                .send_to(worker, &Command::SendShares.to_frame())
                .await?;
            let mut elements: Vec<Fp> = share_rows.iter().map(|row| row[worker - 1]).collect();
            elements.extend(mac_rows.iter().map(|row| row[worker - 1]));
            self.transport
                .send_to(worker, &wire::encode_elements(&elements))
                .await?;
        }
        self.collect_acks("share delivery").await?;
        info!(
            dealer = self.params.dealer_id(),
            secrets = secrets.len(),
            "all workers acknowledged their shares"
        );
        Ok(())
    }

    /// Opens the sum of all secrets from the workers' partial sums and, in
    /// malicious mode, verifies it against the opened MAC.
    async fn open_addition(&mut self, key: Option<Fp>) -> Result<Fp, MpcError> {
        for worker in self.params.worker_ids() {
            self.transport
                .send_to(worker, &Command::Addition.to_frame())
                .await?;
        }

        let mut sum_shares = Vec::with_capacity(self.params.n_workers);
        let mut mac_shares = Vec::with_capacity(self.params.n_workers);
        let expected = if key.is_some() { 2 } else { 1 };
        for worker in self.params.worker_ids() {
            let payload = self.response_from(worker, "addition opening").await?;
            let elements = wire::decode_exact(&payload, expected)?;
            sum_shares.push(elements[0]);
            if key.is_some() {
                mac_shares.push(elements[1]);
            }
        }

        let sum = reconstruct(&sum_shares);
        if let Some(key) = key {
            let mac = reconstruct(&mac_shares);
            if !mac_verify(sum, mac, key) {
                error!(
                    dealer = self.params.dealer_id(),
                    check = %MacCheck::AdditionSum,
                    "aborting: opened sum does not match its MAC"
                );
                return Err(MpcError::MacFailure(MacCheck::AdditionSum));
            }
            debug!(dealer = self.params.dealer_id(), "addition MAC verified");
        }
        info!(
            dealer = self.params.dealer_id(),
            sum = %field::to_hex(&sum),
            "sum of secrets opened"
        );
        Ok(sum)
    }

    /// Issues the multiplication command, deals one fresh Beaver triple and
    /// waits for both completion acks per worker: triple reception first,
    /// then the finished local multiplication protocol.
    async fn run_multiplication(
        &mut self,
        authentication: &Option<(Fp, Vec<Fp>)>,
        rng: &mut (impl Rng + Send),
    ) -> Result<(), MpcError> {
        for worker in self.params.worker_ids() {
            self.transport
                .send_to(worker, &Command::Multiplication.to_frame())
                .await?;
        }

        let packages = match authentication {
            Some((key, key_shares)) => {
                deal_authenticated_triple(*key, key_shares, self.params.n_workers, rng)?
            }
            None => deal_triple(self.params.n_workers, rng)?,
        };
        for (worker, package) in self.params.worker_ids().zip(&packages) {
            self.transport
                .send_to(worker, &wire::encode_elements(&package.to_elements()))
                .await?;
        }

        self.collect_acks("triple delivery").await?;
        self.collect_acks("multiplication round").await?;
        info!(
            dealer = self.params.dealer_id(),
            "every worker finished its multiplication"
        );
        Ok(())
    }

    /// Fetches the product shares and, in malicious mode, verifies the
    /// product MAC and the batched zero check on the partial opening.
    async fn collect_product(&mut self, key: Option<Fp>) -> Result<Fp, MpcError> {
        for worker in self.params.worker_ids() {
            self.transport
                .send_to(worker, &Command::FetchMultShare.to_frame())
                .await?;
        }

        let mut product_shares = Vec::with_capacity(self.params.n_workers);
        let mut mac_shares = Vec::with_capacity(self.params.n_workers);
        let mut check_shares = Vec::with_capacity(self.params.n_workers);
        for worker in self.params.worker_ids() {
            self.expect_ack(worker, "product share fetch").await?;
            let payload = self.response_from(worker, "product share").await?;
            product_shares.push(wire::decode_exact(&payload, 1)?[0]);
            if key.is_some() {
                let payload = self.response_from(worker, "product MAC share").await?;
                mac_shares.push(wire::decode_exact(&payload, 1)?[0]);
                let payload = self.response_from(worker, "zero check share").await?;
                check_shares.push(wire::decode_exact(&payload, 1)?[0]);
            }
        }

        let product = reconstruct(&product_shares);
        if let Some(key) = key {
            let product_mac = reconstruct(&mac_shares);
            if !mac_verify(product, product_mac, key) {
                error!(
                    dealer = self.params.dealer_id(),
                    check = %MacCheck::Product,
                    "aborting: opened product does not match its MAC"
                );
                return Err(MpcError::MacFailure(MacCheck::Product));
            }
            let check = reconstruct(&check_shares);
            if !check.is_zero() {
                error!(
                    dealer = self.params.dealer_id(),
                    check = %MacCheck::PartialOpening,
                    "aborting: partial opening shares do not cancel"
                );
                return Err(MpcError::MacFailure(MacCheck::PartialOpening));
            }
            debug!(
                dealer = self.params.dealer_id(),
                "product MAC and zero check verified"
            );
        }
        info!(
            dealer = self.params.dealer_id(),
            product = %field::to_hex(&product),
            "product opened"
        );
        Ok(product)
    }

    async fn collect_acks(&mut self, what: &'static str) -> Result<(), MpcError> {
        for worker in self.params.worker_ids() {
            self.expect_ack(worker, what).await?;
        }
        Ok(())
    }

    async fn expect_ack(&mut self, worker: PartyId, what: &'static str) -> Result<(), MpcError> {
        let frame = self.response_from(worker, what).await?;
        match Command::from_frame(&frame) {
            Ok(Command::Success) => Ok(()),
            _ => Err(MpcError::Protocol {
                peer: worker,
                detail: format!("expected a SUCCESS ack for {what}"),
            }),
        }
    }

    /// Waits for one frame on the worker's return path, retrying the short
    /// receive window until the response deadline passes.
    async fn response_from(
        &mut self,
        worker: PartyId,
        what: &'static str,
    ) -> Result<Vec<u8>, MpcError> {
        let deadline = tokio::time::Instant::now() + RESPONSE_DEADLINE;
        loop {
            if let Some(payload) = self.transport.recv_from(worker, RECV_TIMEOUT).await? {
                return Ok(payload);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(MpcError::Timeout { peer: worker, what });
            }
        }
    }
}
