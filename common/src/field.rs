use ark_ff::fields::{Fp192, MontBackend, MontConfig};
use ark_ff::{BigInteger, PrimeField};
use thiserror::Error;

/// Montgomery configuration of the 129-bit prime field used by the whole
/// workspace.
///
/// The modulus is p = 2^128 + 51 = 340282366920938463463374607431768211507,
/// carried on three 64-bit limbs. 2 is the smallest primitive root modulo p.
#[derive(MontConfig)]
#[modulus = "340282366920938463463374607431768211507"]
#[generator = "2"]
pub struct FieldMontConfig;

/// An element of Z_p in canonical form, i.e. a representative in [0, p).
pub type Fp = Fp192<MontBackend<FieldMontConfig, 3>>;

/// Error type for the canonical hex codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldCodecError {
    /// The encoded element is the empty string.
    #[error("empty hex string")]
    Empty,
    /// The encoding contains a character outside `[0-9A-Fa-f]`.
    #[error("invalid hex digit {0:?}")]
    InvalidDigit(char),
}

/// Encodes a field element as uppercase hex without a `0x` prefix.
///
/// The encoding has no leading zeros; the zero element encodes as `"0"`.
pub fn to_hex(value: &Fp) -> String {
    const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let bytes = value.into_bigint().to_bytes_be();
    let mut digits = String::with_capacity(2 * bytes.len());
    for byte in bytes {
        digits.push(HEX_DIGITS[usize::from(byte >> 4)] as char);
        digits.push(HEX_DIGITS[usize::from(byte & 0x0F)] as char);
    }
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Decodes a hex string into a canonical field element.
///
/// Both uppercase and lowercase digits are accepted; values at or above the
/// modulus are reduced. Rejects the empty string and any character outside
/// `[0-9A-Fa-f]`.
pub fn from_hex(encoded: &str) -> Result<Fp, FieldCodecError> {
    if encoded.is_empty() {
        return Err(FieldCodecError::Empty);
    }
    let sixteen = Fp::from(16u64);
    let mut value = Fp::from(0u64);
    for character in encoded.chars() {
        let digit = character
            .to_digit(16)
            .ok_or(FieldCodecError::InvalidDigit(character))?;
        value = value * sixteen + Fp::from(u64::from(digit));
    }
    Ok(value)
}
