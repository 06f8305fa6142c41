/// Definition of the prime field every secret, share and MAC lives in, together
/// with the canonical hex codec used on the wire.
pub mod field;

/// Additive secret sharing, SPDZ-style MAC shares and the local Beaver
/// multiplication kernel.
pub mod share;
