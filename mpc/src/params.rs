use std::time::Duration;

use arithmpc_common::field::Fp;
use arithmpc_network::PartyId;
use ark_ff::PrimeField;
use sha2::{Digest, Sha256};

/// Base port of the reference endpoint table; party id `i` listens on
/// `base_port + i - 1`.
pub const BASE_PORT: u16 = 5555;

/// The worker that adds the public cross term D * E during multiplication.
/// Any single distinguished party works; id 1 keeps recorded transcripts
/// reproducible.
pub const DESIGNATED_WORKER: PartyId = 1;

/// How long a party keeps retrying its short receive window before it
/// declares the peer unresponsive.
pub const RESPONSE_DEADLINE: Duration = Duration::from_secs(30);

/// Seed the check coefficients are derived from when no session-specific
/// seed has been committed.
pub const DEFAULT_CHECK_SEED: [u8; 32] = *b"additive-mpc-opening-check-seed0";

/// Session parameters shared by the dealer and every worker.
#[derive(Debug, Clone)]
pub struct ProtocolParams {
    /// Number of worker parties; the dealer has id `n_workers + 1`.
    pub n_workers: usize,
    /// Whether MAC shares are generated, transmitted and verified.
    pub malicious: bool,
    /// Jointly committed seed for the batched zero check coefficients.
    pub check_seed: [u8; 32],
}

impl ProtocolParams {
    pub fn new(n_workers: usize) -> Self {
        Self {
            n_workers,
            malicious: cfg!(feature = "malicious-security"),
            check_seed: DEFAULT_CHECK_SEED,
        }
    }

    pub fn with_malicious(mut self, malicious: bool) -> Self {
        self.malicious = malicious;
        self
    }

    pub fn with_check_seed(mut self, check_seed: [u8; 32]) -> Self {
        self.check_seed = check_seed;
        self
    }

    /// The dealer party is the one past the last worker, by convention.
    pub fn dealer_id(&self) -> PartyId {
        self.n_workers + 1
    }

    pub fn worker_ids(&self) -> impl Iterator<Item = PartyId> {
        1..=self.n_workers
    }

    /// All ids in the ensemble, workers first, dealer last.
    pub fn member_ids(&self) -> impl Iterator<Item = PartyId> {
        1..=self.n_workers + 1
    }
}

/// Derives the two random coefficients of the batched zero check from the
/// committed seed.
///
/// Every party must evaluate this on the same seed; the check is only sound
/// if the coefficients are unpredictable to whoever opened the masked
/// differences, which the joint commitment guarantees.
pub fn check_coefficients(seed: &[u8; 32]) -> (Fp, Fp) {
    (derive_coefficient(seed, 0), derive_coefficient(seed, 1))
}

fn derive_coefficient(seed: &[u8; 32], index: u8) -> Fp {
    let mut hasher = Sha256::new();
    hasher.update(b"opening-check-coefficient");
    hasher.update(seed);
    hasher.update([index]);
    Fp::from_be_bytes_mod_order(&hasher.finalize())
}
