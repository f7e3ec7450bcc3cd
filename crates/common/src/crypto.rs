//! # CoSi Crypto Adapter
//!
//! Module ini membungkus primitive Schnorr collective signing di atas
//! Ristretto group:
//!
//! - `commit`: generate secret nonce `v` dan commitment `V = v·G`
//! - `challenge`: scalar `c = H(V̄ ‖ P̄ ‖ proposal)`
//! - `response`: scalar `r = v − c·x`
//! - `aggregate_commitments` / `aggregate_responses`: kombinasi additive
//! - `sign` / `verify`: assembly dan verifikasi byte signature final
//!
//! # Signature Layout
//!
//! ```text
//! ┌──────────────────┬────────────────┬──────────────┐
//! │ commitment (32B) │ response (32B) │ mask (⌈n/8⌉) │
//! └──────────────────┴────────────────┴──────────────┘
//! ```
//!
//! Panjang total deterministik untuk `n` signer. Mask menutup struktur
//! dan menentukan aggregate public key yang dipakai verifier.
//!
//! # Keamanan
//!
//! - Secret nonce dibungkus `RoundSecret` dan di-zeroize saat drop
//! - Challenge hash memakai domain separation + SHA3-512 wide reduction
//! - Semua fungsi pure: tidak ada state tersembunyi selain RNG caller

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use sha3::{Digest, Sha3_512};
use thiserror::Error;
use zeroize::Zeroize;

use crate::mask::{Mask, Policy};

// ════════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════════

/// Ukuran encoded point (compressed Ristretto).
pub const POINT_SIZE: usize = 32;

/// Ukuran encoded scalar.
pub const SCALAR_SIZE: usize = 32;

/// Domain separation tag untuk challenge hash.
const CHALLENGE_DOMAIN: &[u8] = b"dcsn-cosi-challenge-v1";

/// Panjang signature final untuk `n` signer.
#[must_use]
pub const fn signature_len(n: usize) -> usize {
    POINT_SIZE + SCALAR_SIZE + Mask::mask_len(n)
}

// ════════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error untuk operasi kriptografis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("invalid point encoding")]
    InvalidPoint,

    #[error("invalid scalar encoding")]
    InvalidScalar,

    #[error("signature length mismatch: expected {expected}, found {found}")]
    SignatureLength { expected: usize, found: usize },

    #[error("mask length mismatch: expected {expected}, found {found}")]
    MaskLength { expected: usize, found: usize },

    #[error("mask bit {index} set outside the roster")]
    StrayMaskBit { index: usize },

    #[error("signer index {index} out of range for {len} publics")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("signer public key not present in the roster")]
    UnknownSigner,

    #[error("signature does not satisfy policy: required {required}, got {got}")]
    PolicyNotSatisfied { required: usize, got: usize },

    #[error("schnorr verification failed")]
    VerifyFailed,
}

// ════════════════════════════════════════════════════════════════════════════════
// ROUND SECRET
// ════════════════════════════════════════════════════════════════════════════════

/// Secret nonce `v` untuk satu round, di-zeroize saat drop.
///
/// Nonce ini HANYA valid untuk satu round dan tidak boleh di-reuse:
/// dua response dengan nonce sama membocorkan private key. Tipe ini
/// sengaja tidak meng-implement `Clone`, `Debug`, maupun serde.
pub struct RoundSecret(Scalar);

impl RoundSecret {
    /// Reference ke scalar di dalam. Jangan disimpan melebihi round.
    #[must_use]
    pub fn expose(&self) -> &Scalar {
        &self.0
    }
}

impl Drop for RoundSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// KEY GENERATION
// ════════════════════════════════════════════════════════════════════════════════

/// Generate keypair Schnorr: private scalar `x` dan public point `X = x·G`.
#[must_use]
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Scalar, RistrettoPoint) {
    let private = Scalar::random(rng);
    let public = RistrettoPoint::mul_base(&private);
    (private, public)
}

// ════════════════════════════════════════════════════════════════════════════════
// COSI PRIMITIVES
// ════════════════════════════════════════════════════════════════════════════════

/// Generate secret nonce dan commitment untuk satu round.
///
/// Mengembalikan `(v, V)` dengan `V = v·G`. Nonce selalu fresh dari RNG
/// yang diberikan; tidak ada jalur untuk menyuplai stream deterministik.
#[must_use]
pub fn commit<R: RngCore + CryptoRng>(rng: &mut R) -> (RoundSecret, RistrettoPoint) {
    let v = Scalar::random(rng);
    let commitment = RistrettoPoint::mul_base(&v);
    (RoundSecret(v), commitment)
}

/// Hitung collective challenge `c = H(V̄ ‖ P̄ ‖ proposal)`.
///
/// `commitment` adalah aggregate commitment dan `aggregate_public` adalah
/// aggregate public key dari mask partisipasi. Hash memakai SHA3-512
/// dengan wide reduction ke scalar field, plus domain separation tag.
#[must_use]
pub fn challenge(
    commitment: &RistrettoPoint,
    aggregate_public: &RistrettoPoint,
    proposal: &[u8],
) -> Scalar {
    let mut hasher = Sha3_512::new();
    hasher.update(CHALLENGE_DOMAIN);
    hasher.update(commitment.compress().as_bytes());
    hasher.update(aggregate_public.compress().as_bytes());
    hasher.update(proposal);
    Scalar::from_hash(hasher)
}

/// Hitung response pribadi `r = v − c·x`.
#[must_use]
pub fn response(private: &Scalar, secret: &RoundSecret, challenge: &Scalar) -> Scalar {
    secret.expose() - challenge * private
}

/// Aggregate commitments dengan group addition.
#[must_use]
pub fn aggregate_commitments(commitments: &[RistrettoPoint]) -> RistrettoPoint {
    commitments
        .iter()
        .fold(RistrettoPoint::identity(), |acc, c| acc + c)
}

/// Aggregate responses dengan scalar addition.
#[must_use]
pub fn aggregate_responses(responses: &[Scalar]) -> Scalar {
    responses.iter().fold(Scalar::ZERO, |acc, r| acc + r)
}

// ════════════════════════════════════════════════════════════════════════════════
// SIGN & VERIFY
// ════════════════════════════════════════════════════════════════════════════════

/// Assembly signature final: `commitment ‖ response ‖ mask`.
#[must_use]
pub fn sign(commitment: &RistrettoPoint, response: &Scalar, mask: &Mask) -> Vec<u8> {
    let mut out = Vec::with_capacity(signature_len(mask.len()));
    out.extend_from_slice(commitment.compress().as_bytes());
    out.extend_from_slice(response.as_bytes());
    out.extend_from_slice(mask.bytes());
    out
}

/// Verifikasi collective signature terhadap daftar publics dan policy.
///
/// Langkah:
/// 1. Parse layout `V̄ ‖ r̄ ‖ mask` dan validasi panjang
/// 2. Rekonstruksi mask, cek policy
/// 3. Recompute challenge dari aggregate public milik mask
/// 4. Cek persamaan Schnorr `r̄·G + c·P̄ == V̄`
///
/// # Errors
///
/// - `SignatureLength` / `InvalidPoint` / `InvalidScalar` untuk encoding
/// - `PolicyNotSatisfied` jika jumlah bit di bawah tuntutan policy
/// - `VerifyFailed` jika persamaan Schnorr tidak terpenuhi
pub fn verify(
    publics: &[RistrettoPoint],
    proposal: &[u8],
    signature: &[u8],
    policy: &Policy,
) -> Result<(), CryptoError> {
    let expected = signature_len(publics.len());
    if signature.len() != expected {
        return Err(CryptoError::SignatureLength {
            expected,
            found: signature.len(),
        });
    }

    let commitment = point_from_bytes(&signature[..POINT_SIZE])?;
    let resp = scalar_from_bytes(&signature[POINT_SIZE..POINT_SIZE + SCALAR_SIZE])?;
    let mask = Mask::from_bytes(publics, &signature[POINT_SIZE + SCALAR_SIZE..])?;

    if !policy.check(&mask) {
        return Err(CryptoError::PolicyNotSatisfied {
            required: policy.required(publics.len()),
            got: mask.count_enabled(),
        });
    }

    let c = challenge(&commitment, mask.aggregate_public(), proposal);
    let reconstructed = RistrettoPoint::mul_base(&resp) + mask.aggregate_public() * c;
    if reconstructed != commitment {
        return Err(CryptoError::VerifyFailed);
    }
    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// ENCODING HELPERS
// ════════════════════════════════════════════════════════════════════════════════

/// Decode compressed Ristretto point dari bytes.
pub fn point_from_bytes(bytes: &[u8]) -> Result<RistrettoPoint, CryptoError> {
    CompressedRistretto::from_slice(bytes)
        .map_err(|_| CryptoError::InvalidPoint)?
        .decompress()
        .ok_or(CryptoError::InvalidPoint)
}

/// Decode canonical scalar dari bytes.
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar, CryptoError> {
    let arr: [u8; SCALAR_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidScalar)?;
    Option::from(Scalar::from_canonical_bytes(arr)).ok_or(CryptoError::InvalidScalar)
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(n: usize) -> (Vec<Scalar>, Vec<RistrettoPoint>) {
        let mut rng = rand::thread_rng();
        let pairs: Vec<_> = (0..n).map(|_| generate_keypair(&mut rng)).collect();
        (
            pairs.iter().map(|p| p.0).collect(),
            pairs.iter().map(|p| p.1).collect(),
        )
    }

    /// Jalankan satu round CoSi penuh secara lokal untuk subset signer.
    fn run_round(
        privates: &[Scalar],
        publics: &[RistrettoPoint],
        participants: &[usize],
        proposal: &[u8],
    ) -> Vec<u8> {
        let mut rng = rand::thread_rng();

        let mut secrets = Vec::new();
        let mut commitments = Vec::new();
        let mut mask = Mask::new(publics);
        for &i in participants {
            let (v, big_v) = commit(&mut rng);
            secrets.push(v);
            commitments.push(big_v);
            mask.set_bit(i, true).unwrap();
        }

        let agg_commit = aggregate_commitments(&commitments);
        let c = challenge(&agg_commit, mask.aggregate_public(), proposal);

        let responses: Vec<Scalar> = participants
            .iter()
            .zip(secrets.iter())
            .map(|(&i, v)| response(&privates[i], v, &c))
            .collect();
        let agg_response = aggregate_responses(&responses);

        sign(&agg_commit, &agg_response, &mask)
    }

    // ────────────────────────────────────────────────────────────────────────────
    // PRIMITIVES
    // ────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_commit_fresh_per_call() {
        let mut rng = rand::thread_rng();
        let (_, v1) = commit(&mut rng);
        let (_, v2) = commit(&mut rng);
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_challenge_binds_all_inputs() {
        let (_, publics) = make_keys(2);
        let c1 = challenge(&publics[0], &publics[1], b"proposal");
        let c2 = challenge(&publics[0], &publics[1], b"other");
        let c3 = challenge(&publics[1], &publics[1], b"proposal");
        let c4 = challenge(&publics[0], &publics[0], b"proposal");
        assert_ne!(c1, c2);
        assert_ne!(c1, c3);
        assert_ne!(c1, c4);
        // Deterministik untuk input identik
        assert_eq!(c1, challenge(&publics[0], &publics[1], b"proposal"));
    }

    #[test]
    fn test_single_signer_schnorr_equation() {
        let mut rng = rand::thread_rng();
        let (x, public) = generate_keypair(&mut rng);
        let (v, big_v) = commit(&mut rng);

        let c = challenge(&big_v, &public, b"msg");
        let r = response(&x, &v, &c);

        // V == r·G + c·X
        assert_eq!(big_v, RistrettoPoint::mul_base(&r) + public * c);
    }

    #[test]
    fn test_aggregate_commitments_empty_is_identity() {
        assert_eq!(aggregate_commitments(&[]), RistrettoPoint::identity());
    }

    #[test]
    fn test_aggregate_responses_sum() {
        let a = Scalar::from(3u64);
        let b = Scalar::from(7u64);
        assert_eq!(aggregate_responses(&[a, b]), Scalar::from(10u64));
    }

    // ────────────────────────────────────────────────────────────────────────────
    // SIGN & VERIFY
    // ────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_full_round_all_signers_complete_policy() {
        let (privates, publics) = make_keys(5);
        let sig = run_round(&privates, &publics, &[0, 1, 2, 3, 4], b"proposal");

        assert_eq!(sig.len(), signature_len(5));
        verify(&publics, b"proposal", &sig, &Policy::Complete).unwrap();
    }

    #[test]
    fn test_partial_round_threshold_policy() {
        let (privates, publics) = make_keys(5);
        let sig = run_round(&privates, &publics, &[0, 1, 3], b"proposal");

        verify(&publics, b"proposal", &sig, &Policy::Threshold(3)).unwrap();
        verify(&publics, b"proposal", &sig, &Policy::Threshold(2)).unwrap();

        let err = verify(&publics, b"proposal", &sig, &Policy::Complete).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::PolicyNotSatisfied {
                required: 5,
                got: 3
            }
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_proposal() {
        let (privates, publics) = make_keys(3);
        let sig = run_round(&privates, &publics, &[0, 1, 2], b"proposal");

        let err = verify(&publics, b"tampered", &sig, &Policy::Complete).unwrap_err();
        assert_eq!(err, CryptoError::VerifyFailed);
    }

    #[test]
    fn test_verify_rejects_tampered_response() {
        let (privates, publics) = make_keys(3);
        let mut sig = run_round(&privates, &publics, &[0, 1, 2], b"proposal");

        // Flip satu bit di response
        sig[POINT_SIZE] ^= 0x01;
        let err = verify(&publics, b"proposal", &sig, &Policy::Complete).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::VerifyFailed | CryptoError::InvalidScalar
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_mask() {
        let (privates, publics) = make_keys(3);
        let mut sig = run_round(&privates, &publics, &[0, 1], b"proposal");

        // Set bit signer ke-3 yang tidak pernah ikut
        let mask_offset = POINT_SIZE + SCALAR_SIZE;
        sig[mask_offset] |= 0b100;
        let err = verify(&publics, b"proposal", &sig, &Policy::Threshold(2)).unwrap_err();
        assert_eq!(err, CryptoError::VerifyFailed);
    }

    #[test]
    fn test_verify_rejects_wrong_length() {
        let (_, publics) = make_keys(3);
        let err = verify(&publics, b"proposal", &[0u8; 10], &Policy::Complete).unwrap_err();
        assert!(matches!(err, CryptoError::SignatureLength { .. }));
    }

    #[test]
    fn test_two_rounds_differ_but_both_verify() {
        let (privates, publics) = make_keys(4);
        let sig1 = run_round(&privates, &publics, &[0, 1, 2, 3], b"proposal");
        let sig2 = run_round(&privates, &publics, &[0, 1, 2, 3], b"proposal");

        assert_ne!(sig1, sig2);
        verify(&publics, b"proposal", &sig1, &Policy::Complete).unwrap();
        verify(&publics, b"proposal", &sig2, &Policy::Complete).unwrap();
    }

    #[test]
    fn test_signature_len_deterministic() {
        assert_eq!(signature_len(1), 65);
        assert_eq!(signature_len(8), 65);
        assert_eq!(signature_len(9), 66);
        assert_eq!(signature_len(24), 67);
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ENCODING
    // ────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_point_roundtrip() {
        let (_, publics) = make_keys(1);
        let bytes = publics[0].compress();
        let decoded = point_from_bytes(bytes.as_bytes()).unwrap();
        assert_eq!(decoded, publics[0]);
    }

    #[test]
    fn test_point_invalid_encoding() {
        let result = point_from_bytes(&[0xFF; 32]);
        assert!(matches!(result, Err(CryptoError::InvalidPoint)));
    }

    #[test]
    fn test_scalar_invalid_length() {
        let result = scalar_from_bytes(&[0u8; 5]);
        assert!(matches!(result, Err(CryptoError::InvalidScalar)));
    }

    #[test]
    fn test_error_display() {
        let err = CryptoError::SignatureLength {
            expected: 65,
            found: 10,
        };
        assert!(err.to_string().contains("65"));
        assert!(err.to_string().contains("10"));
    }
}
