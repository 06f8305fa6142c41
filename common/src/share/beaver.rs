use ark_ff::PrimeField;

/// One party's additive slice of a Beaver triple (a, b, c) with c = a * b.
///
/// The same container carries the MAC slices (alpha * a, alpha * b,
/// alpha * c) when malicious security is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleShare<F: PrimeField> {
    pub a: F,
    pub b: F,
    pub c: F,
}

impl<F: PrimeField> TripleShare<F> {
    pub fn new(a: F, b: F, c: F) -> Self {
        Self { a, b, c }
    }
}

/// Computes the masked differences (x - a, y - b) this party contributes to
/// the partial opening of a multiplication gate.
pub fn masked_pair<F: PrimeField>(x: F, y: F, triple: &TripleShare<F>) -> (F, F) {
    (x - triple.a, y - triple.b)
}

/// Evaluates this party's share of the product from the opened differences
/// D = x - a and E = y - b.
///
/// Exactly one party in the ensemble must be designated to add the public
/// cross term D * E; the shares then sum to x * y.
pub fn product_share<F: PrimeField>(
    triple: &TripleShare<F>,
    d_total: F,
    e_total: F,
    designated: bool,
) -> F {
    let mut share = triple.c + triple.a * e_total + triple.b * d_total;
    if designated {
        share += d_total * e_total;
    }
    share
}

/// Evaluates this party's share of the MAC on the product.
///
/// Every party adds its key-share multiple of the public cross term, so the
/// shares sum to alpha * x * y without any party being designated.
pub fn product_mac_share<F: PrimeField>(
    mac_triple: &TripleShare<F>,
    key_share: F,
    d_total: F,
    e_total: F,
) -> F {
    mac_triple.c
        + d_total * mac_triple.b
        + e_total * mac_triple.a
        + d_total * e_total * key_share
}

/// Computes this party's share of the batched zero check on the partial
/// opening.
///
/// The shares sum to r_d * alpha * (x - a - D) + r_e * alpha * (y - b - E),
/// which is zero exactly when the opened differences match the held shares.
/// The random coefficients (r_d, r_e) must be identical across parties.
pub fn opening_check_share<F: PrimeField>(
    mac_x: F,
    mac_y: F,
    mac_triple: &TripleShare<F>,
    key_share: F,
    coefficients: (F, F),
    d_total: F,
    e_total: F,
) -> F {
    let (r_d, r_e) = coefficients;
    r_d * (mac_x - mac_triple.a) + r_e * (mac_y - mac_triple.b)
        - (r_d * d_total + r_e * e_total) * key_share
}
