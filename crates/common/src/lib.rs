//! # DCSN Common Crate
//!
//! Tipe dasar dan crypto adapter untuk DCSN (Distributed Collective
//! Signing Network).
//!
//! ## Overview
//!
//! Crate ini menyediakan:
//! - **Identifier types**: `ServerId` untuk anggota roster
//! - **Crypto adapter**: primitive Schnorr collective signing di atas
//!   Ristretto (commit, challenge, response, aggregate, sign, verify)
//! - **Participation mask**: bitmap + aggregate public key
//! - **Verification policies**: `Complete` dan `Threshold(t)`
//!
//! ## Protocol Flow
//!
//! ```text
//! Signer i                                  Verifier
//!    │                                         │
//!    │ (v_i, V_i) = commit()                   │
//!    │ V̄ = Σ V_i   (group addition)            │
//!    │ c  = H(V̄ ‖ P̄ ‖ proposal)               │
//!    │ r_i = v_i − c·x_i                       │
//!    │ r̄  = Σ r_i  (scalar addition)           │
//!    │                                         │
//!    │ ── signature = V̄ ‖ r̄ ‖ mask ──────────► │
//!    │                                         │ cek policy(mask)
//!    │                                         │ cek r̄·G + c·P̄ == V̄
//! ```
//!
//! `P̄` adalah jumlah public key seluruh signer yang bit-nya di-set pada
//! mask; signer yang tidak merespons tepat waktu tetap tertinggal di
//! luar signature tanpa membatalkan round.
//!
//! ## Modules
//!
//! | Module | Deskripsi |
//! |--------|-----------|
//! | [`types`] | Identifier types (`ServerId`) |
//! | [`crypto`] | Primitive CoSi Schnorr + `CryptoError` |
//! | [`mask`] | Participation mask + verification policies |

// ════════════════════════════════════════════════════════════════════════════════
// MODULE DECLARATIONS
// ════════════════════════════════════════════════════════════════════════════════

/// Identifier types untuk anggota roster.
pub mod types;

/// Primitive CoSi Schnorr di atas Ristretto group.
pub mod crypto;

/// Participation mask dan verification policies.
pub mod mask;

// ════════════════════════════════════════════════════════════════════════════════
// PUBLIC API EXPORTS
// ════════════════════════════════════════════════════════════════════════════════

pub use types::{ServerId, IDENTIFIER_SIZE};

pub use crypto::{
    aggregate_commitments, aggregate_responses, challenge, commit, generate_keypair,
    point_from_bytes, response, scalar_from_bytes, sign, signature_len, verify, CryptoError,
    RoundSecret, POINT_SIZE, SCALAR_SIZE,
};

pub use mask::{Mask, Policy};

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_re_exports_available() {
        let _id = ServerId::new();
        let mut rng = rand::thread_rng();
        let (_private, public) = generate_keypair(&mut rng);
        let mask = Mask::new(&[public]);
        assert_eq!(mask.len(), 1);
    }

    #[test]
    fn test_size_constants_consistent() {
        assert_eq!(IDENTIFIER_SIZE, 32);
        assert_eq!(signature_len(1), POINT_SIZE + SCALAR_SIZE + 1);
    }
}
