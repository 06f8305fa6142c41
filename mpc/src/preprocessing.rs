//! Dealer-side generation of Beaver triples and their MAC material.
//!
//! Triples are sampled fresh for every multiplication gate and are
//! single-use: opening x - a and y - b consumes the masks.

use arithmpc_common::field::Fp;
use arithmpc_common::share::additive::{mac_split, split};
use arithmpc_common::share::beaver::TripleShare;
use arithmpc_common::share::ShareError;
use ark_ff::UniformRand;
use ark_std::rand::Rng;
use itertools::izip;

/// Everything one worker receives for a single multiplication gate.
///
/// In malicious-security mode the package also carries the MAC slices of
/// (a, b, c) and the worker's share of the global MAC key.
#[derive(Debug, Clone)]
pub struct TriplePackage {
    pub triple: TripleShare<Fp>,
    pub mac: Option<TripleShare<Fp>>,
    pub key_share: Option<Fp>,
}

impl TriplePackage {
    /// Payload segments of a plain package: a, b, c.
    pub const PLAIN_SEGMENTS: usize = 3;
    /// Payload segments of an authenticated package: a, b, c, their MAC
    /// slices, and the key share.
    pub const AUTHENTICATED_SEGMENTS: usize = 7;

    /// Flattens the package into the wire order.
    pub fn to_elements(&self) -> Vec<Fp> {
        let mut elements = vec![self.triple.a, self.triple.b, self.triple.c];
        if let Some(mac) = &self.mac {
            elements.extend([mac.a, mac.b, mac.c]);
        }
        if let Some(key_share) = self.key_share {
            elements.push(key_share);
        }
        elements
    }

    /// Rebuilds a package from wire order; `None` if the segment count does
    /// not match the expected mode.
    pub fn from_elements(elements: &[Fp], malicious: bool) -> Option<Self> {
        match (elements, malicious) {
            ([a, b, c], false) => Some(Self {
                triple: TripleShare::new(*a, *b, *c),
                mac: None,
                key_share: None,
            }),
            ([a, b, c, mac_a, mac_b, mac_c, key_share], true) => Some(Self {
                triple: TripleShare::new(*a, *b, *c),
                mac: Some(TripleShare::new(*mac_a, *mac_b, *mac_c)),
                key_share: Some(*key_share),
            }),
            _ => None,
        }
    }
}

/// Samples one Beaver triple and splits it into per-worker packages.
pub fn deal_triple(
    n_workers: usize,
    rng: &mut impl Rng,
) -> Result<Vec<TriplePackage>, ShareError> {
    let a = Fp::rand(rng);
    let b = Fp::rand(rng);
    let c = a * b;
    let packages = izip!(
        split(a, n_workers, rng)?,
        split(b, n_workers, rng)?,
        split(c, n_workers, rng)?
    )
    .map(|(a, b, c)| TriplePackage {
        triple: TripleShare::new(a, b, c),
        mac: None,
        key_share: None,
    })
    .collect();
    Ok(packages)
}

/// Samples one Beaver triple together with MAC shares of all three values
/// under the global key, and attaches each worker's key share.
pub fn deal_authenticated_triple(
    key: Fp,
    key_shares: &[Fp],
    n_workers: usize,
    rng: &mut impl Rng,
) -> Result<Vec<TriplePackage>, ShareError> {
    if key_shares.len() != n_workers {
        return Err(ShareError::LengthMismatch);
    }
    let a = Fp::rand(rng);
    let b = Fp::rand(rng);
    let c = a * b;
    let packages = izip!(
        split(a, n_workers, rng)?,
        split(b, n_workers, rng)?,
        split(c, n_workers, rng)?,
        mac_split(a, key, n_workers, rng)?,
        mac_split(b, key, n_workers, rng)?,
        mac_split(c, key, n_workers, rng)?,
        key_shares.iter().copied()
    )
    .map(|(a, b, c, mac_a, mac_b, mac_c, key_share)| TriplePackage {
        triple: TripleShare::new(a, b, c),
        mac: Some(TripleShare::new(mac_a, mac_b, mac_c)),
        key_share: Some(key_share),
    })
    .collect();
    Ok(packages)
}
