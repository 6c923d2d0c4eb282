//! Threshold secret sharing over GF(257)
//!
//! A `MasterSecret` is split byte-by-byte: for every position we build a random
//! polynomial of degree `k - 1` whose constant term is the secret byte, and hand
//! out its evaluations at `x = 1..=n`. Any `k` evaluations pin the polynomial
//! down again (Lagrange interpolation at `x = 0`); fewer reveal nothing.
//!
//! # Field and encoding
//!
//! The field is the integers modulo 257, the smallest prime above the byte
//! range. Evaluations therefore live in `[0, 257)` and a share value of `256`
//! is perfectly legal. Shares keep those values unreduced all the way through
//! split, storage and combine: every value is carried as a big-endian `u16` on
//! the wire. Reducing them to bytes would silently corrupt roughly one secret
//! byte in every 257.
//!
//! # Wire Format
//!
//! ```text
//! [ x: 1 byte ][ k: 1 byte ][ n: 1 byte ][ y_0 .. y_31: 2 bytes each ]
//! ```
//!
//! Shares are exchanged as the lowercase hex encoding of those 67 bytes.
//!
//! # Below threshold
//!
//! Combining fewer than `k` shares is not an error. Interpolating too few
//! points still produces *a* value per byte, it just has nothing to do with the
//! secret. That outcome is surfaced as [`Reconstruction::BelowThreshold`] so it
//! can never be mistaken for a recovered key.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::secret::{MasterSecret, SECRET_SIZE};

/// The prime modulus of the share field
pub const FIELD_PRIME: u16 = 257;
/// Total number of shares issued per secret
pub const SHARE_COUNT: u8 = 5;
/// Minimum number of shares needed to reconstruct
pub const THRESHOLD: u8 = 3;
/// Size of the `x || k || n` share header
const SHARE_HEADER_SIZE: usize = 3;
/// Size of an encoded share in bytes
pub const SHARE_WIRE_SIZE: usize = SHARE_HEADER_SIZE + 2 * SECRET_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ShamirError {
    /// Duplicate, out-of-range or otherwise inconsistent share indices/values
    #[error("invalid share set: {0}")]
    InvalidShareSet(String),
    #[error("invalid split parameters: n={n}, k={k}")]
    InvalidParameters { n: u8, k: u8 },
    #[error("{supplied} shares supplied but {threshold} are required")]
    BelowThreshold { supplied: usize, threshold: u8 },
    #[error("invalid share encoding: {0}")]
    Encoding(String),
    #[error("random source failure: {0}")]
    Rng(String),
}

/// One fragment of a split secret
///
/// Holds the evaluation point `x` (the share index, `1..=n`), the `(k, n)`
/// policy it was produced under, and one field element per secret byte.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    index: u8,
    threshold: u8,
    total: u8,
    values: [u16; SECRET_SIZE],
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("threshold", &self.threshold)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl Share {
    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn total(&self) -> u8 {
        self.total
    }

    pub fn values(&self) -> &[u16; SECRET_SIZE] {
        &self.values
    }

    /// Encode the share into its 67-byte wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_WIRE_SIZE);
        out.push(self.index);
        out.push(self.threshold);
        out.push(self.total);
        for value in self.values.iter() {
            out.extend_from_slice(&value.to_be_bytes());
        }
        out
    }

    /// Decode a share from its wire form, validating every field
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        if bytes.len() != SHARE_WIRE_SIZE {
            return Err(ShamirError::Encoding(format!(
                "expected {} bytes, got {}",
                SHARE_WIRE_SIZE,
                bytes.len()
            )));
        }

        let (index, threshold, total) = (bytes[0], bytes[1], bytes[2]);
        if index == 0 {
            return Err(ShamirError::Encoding("share index cannot be 0".to_string()));
        }
        if threshold == 0 || threshold > total || index > total {
            return Err(ShamirError::Encoding(format!(
                "inconsistent share header: x={}, k={}, n={}",
                index, threshold, total
            )));
        }

        let mut values = [0u16; SECRET_SIZE];
        for (value, chunk) in values
            .iter_mut()
            .zip(bytes[SHARE_HEADER_SIZE..].chunks_exact(2))
        {
            let v = u16::from_be_bytes([chunk[0], chunk[1]]);
            if v >= FIELD_PRIME {
                return Err(ShamirError::Encoding(format!(
                    "share value {} is outside the field",
                    v
                )));
            }
            *value = v;
        }

        Ok(Self {
            index,
            threshold,
            total,
            values,
        })
    }

    /// Convert share to hexadecimal string
    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse a share from a hexadecimal string
    ///
    /// Surrounding whitespace and a "0x" prefix are tolerated, since shares are
    /// frequently pasted back in by hand.
    pub fn from_hex(hex: &str) -> Result<Self, ShamirError> {
        let hex = hex.trim();
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = zeroize::Zeroizing::new(
            hex::decode(hex).map_err(|e| ShamirError::Encoding(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }
}

impl FromStr for Share {
    type Err = ShamirError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Share::from_hex(s)
    }
}

impl Serialize for Share {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Share {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let hex = String::deserialize(deserializer)?;
        Share::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// The outcome of combining a set of shares
pub enum Reconstruction {
    /// At least `k` consistent shares were supplied; this is the secret
    Complete(MasterSecret),
    /// Fewer than `k` shares were supplied. The bytes are the interpolation of
    /// whatever was provided and are unrelated to the secret.
    BelowThreshold {
        supplied: usize,
        threshold: u8,
        bytes: zeroize::Zeroizing<Vec<u8>>,
    },
}

impl fmt::Debug for Reconstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reconstruction::Complete(secret) => f.debug_tuple("Complete").field(secret).finish(),
            Reconstruction::BelowThreshold {
                supplied,
                threshold,
                ..
            } => f
                .debug_struct("BelowThreshold")
                .field("supplied", supplied)
                .field("threshold", threshold)
                .finish_non_exhaustive(),
        }
    }
}

impl Reconstruction {
    pub fn is_complete(&self) -> bool {
        matches!(self, Reconstruction::Complete(_))
    }

    /// The interpolated bytes, whether or not they are meaningful
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Reconstruction::Complete(secret) => secret.bytes(),
            Reconstruction::BelowThreshold { bytes, .. } => bytes.as_slice(),
        }
    }

    /// Take the recovered secret, refusing a below-threshold result
    pub fn into_secret(self) -> Result<MasterSecret, ShamirError> {
        match self {
            Reconstruction::Complete(secret) => Ok(secret),
            Reconstruction::BelowThreshold {
                supplied,
                threshold,
                ..
            } => Err(ShamirError::BelowThreshold {
                supplied,
                threshold,
            }),
        }
    }
}

/// Split `secret` into `n` shares, any `k` of which reconstruct it
pub fn split(secret: &MasterSecret, n: u8, k: u8) -> Result<Vec<Share>, ShamirError> {
    if k == 0 || n == 0 || k > n {
        return Err(ShamirError::InvalidParameters { n, k });
    }

    let mut sampler = FieldSampler::new();
    let mut shares: Vec<Share> = (1..=n)
        .map(|index| Share {
            index,
            threshold: k,
            total: n,
            values: [0; SECRET_SIZE],
        })
        .collect();

    let mut coefficients = zeroize::Zeroizing::new(vec![0u16; k as usize]);
    for (position, secret_byte) in secret.iter().enumerate() {
        coefficients[0] = *secret_byte as u16;
        for coefficient in coefficients.iter_mut().skip(1) {
            *coefficient = sampler.next()?;
        }
        for share in shares.iter_mut() {
            share.values[position] = evaluate(&coefficients, share.index as u16);
        }
    }

    Ok(shares)
}

/// Reconstruct a secret from shares produced under threshold `k`
///
/// All supplied shares take part in the interpolation. Supplying more than
/// `k` is fine; supplying fewer yields [`Reconstruction::BelowThreshold`].
pub fn combine(shares: &[Share], k: u8) -> Result<Reconstruction, ShamirError> {
    let first = shares
        .first()
        .ok_or_else(|| ShamirError::InvalidShareSet("no shares supplied".to_string()))?;

    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.threshold != first.threshold || share.total != first.total {
            return Err(ShamirError::InvalidShareSet(format!(
                "share {} was issued under ({}, {}), expected ({}, {})",
                share.index, share.threshold, share.total, first.threshold, first.total
            )));
        }
        if share.threshold != k {
            return Err(ShamirError::InvalidShareSet(format!(
                "shares were issued with threshold {}, not {}",
                share.threshold, k
            )));
        }
        if share.index == 0 || share.index > share.total {
            return Err(ShamirError::InvalidShareSet(format!(
                "share index {} is out of range",
                share.index
            )));
        }
        if share.values.iter().any(|v| *v >= FIELD_PRIME) {
            return Err(ShamirError::InvalidShareSet(format!(
                "share {} holds a value outside the field",
                share.index
            )));
        }
        if !seen.insert(share.index) {
            return Err(ShamirError::InvalidShareSet(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }

    // the basis coefficients only depend on the x coordinates
    let xs: Vec<i64> = shares.iter().map(|s| s.index as i64).collect();
    let basis: Vec<i64> = (0..xs.len())
        .map(|i| lagrange_basis_at_zero(&xs, i))
        .collect::<Result<_, _>>()?;

    let mut field_values = zeroize::Zeroizing::new([0u16; SECRET_SIZE]);
    for (position, out) in field_values.iter_mut().enumerate() {
        let mut acc: i64 = 0;
        for (share, coefficient) in shares.iter().zip(basis.iter()) {
            acc = normalize(acc + share.values[position] as i64 * coefficient);
        }
        *out = acc as u16;
    }

    if shares.len() < k as usize {
        let bytes = field_values.iter().map(|v| (*v % 256) as u8).collect();
        return Ok(Reconstruction::BelowThreshold {
            supplied: shares.len(),
            threshold: k,
            bytes: zeroize::Zeroizing::new(bytes),
        });
    }

    let mut secret = [0u8; SECRET_SIZE];
    for (byte, value) in secret.iter_mut().zip(field_values.iter()) {
        // a genuine split can only interpolate back to a byte
        if *value > u8::MAX as u16 {
            secret.zeroize();
            return Err(ShamirError::InvalidShareSet(
                "shares do not belong to the same split".to_string(),
            ));
        }
        *byte = *value as u8;
    }
    let recovered = MasterSecret::from(secret);
    secret.zeroize();
    Ok(Reconstruction::Complete(recovered))
}

/// Evaluate a polynomial at `x` using Horner's method
fn evaluate(coefficients: &[u16], x: u16) -> u16 {
    let prime = FIELD_PRIME as u32;
    let x = x as u32 % prime;
    coefficients
        .iter()
        .rev()
        .fold(0u32, |acc, c| (acc * x + *c as u32) % prime) as u16
}

/// `Π_{j≠i} (0 - x_j) / (x_i - x_j)` over the field
fn lagrange_basis_at_zero(xs: &[i64], i: usize) -> Result<i64, ShamirError> {
    let mut numerator = 1i64;
    let mut denominator = 1i64;
    for (j, x_j) in xs.iter().enumerate() {
        if i == j {
            continue;
        }
        numerator = normalize(numerator * normalize(-x_j));
        denominator = normalize(denominator * normalize(xs[i] - x_j));
    }
    let inverse = mod_inverse(denominator).ok_or_else(|| {
        ShamirError::InvalidShareSet("share indices make interpolation singular".to_string())
    })?;
    Ok(normalize(numerator * inverse))
}

/// Reduce into `[0, p)`; `%` on a negative operand stays negative
fn normalize(value: i64) -> i64 {
    value.rem_euclid(FIELD_PRIME as i64)
}

/// Modular inverse by the extended Euclidean algorithm
fn mod_inverse(a: i64) -> Option<i64> {
    let m = FIELD_PRIME as i64;
    let (mut old_r, mut r) = (normalize(a), m);
    let (mut old_s, mut s) = (1i64, 0i64);
    while r != 0 {
        let quotient = old_r / r;
        (old_r, r) = (r, old_r - quotient * r);
        (old_s, s) = (s, old_s - quotient * s);
    }
    if old_r != 1 {
        return None;
    }
    Some(normalize(old_s))
}

/// Draws uniform field elements by rejection sampling OS randomness
struct FieldSampler {
    buf: [u8; 64],
    pos: usize,
}

impl FieldSampler {
    fn new() -> Self {
        Self {
            buf: [0; 64],
            pos: 64,
        }
    }

    fn next(&mut self) -> Result<u16, ShamirError> {
        loop {
            if self.pos + 2 > self.buf.len() {
                getrandom::getrandom(&mut self.buf).map_err(|e| ShamirError::Rng(e.to_string()))?;
                self.pos = 0;
            }
            // 9 bits covers [0, 512); keep only the values inside the field
            let candidate = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]) & 0x01ff;
            self.pos += 2;
            if candidate < FIELD_PRIME {
                return Ok(candidate);
            }
        }
    }
}

impl Drop for FieldSampler {
    fn drop(&mut self) {
        self.buf.zeroize();
    }
}
