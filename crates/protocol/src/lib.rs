//! # DCSN Protocol Crate
//!
//! Implementasi protocol collective signing dua tingkat dengan fault
//! recovery untuk DCSN (Distributed Collective Signing Network).
//!
//! ## Overview
//!
//! Satu root mengkoordinasikan K subtree independen (subleader +
//! leaves), meng-aggregate partial commitment dan response mereka
//! menjadi SATU signature Schnorr compact, dan secara transparan:
//! - mengganti subleader yang diam melebihi deadline (failover), dan
//! - meninggalkan leaf yang diam di luar mask (exclusion),
//! tanpa membatalkan round.
//!
//! ## Arsitektur
//!
//! ```text
//!                      ┌──────────────┐
//!                      │ SigningRound │  (orchestrator, roster[0])
//!                      └──────┬───────┘
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!     subtree 0          subtree 1     ...  subtree K'-1
//!    root──subleader    root──subleader
//!          ├─leaf             ├─leaf
//!          └─leaf             └─leaf
//! ```
//!
//! Empat pesan mengalir per subtree: Announcement turun, Commitment
//! naik, Challenge turun, Response naik; Stop menghentikan subtree yang
//! sedang failover.
//!
//! ## Modules
//!
//! | Module | Deskripsi |
//! |--------|-----------|
//! | [`roster`] | `ServerIdentity` + `Roster` terurut |
//! | [`tree`] | Partisi roster menjadi K subtree seimbang |
//! | [`message`] | Lima pesan protocol + envelope + addressing |
//! | [`transport`] | Typed-channel router in-process + fault injection |
//! | [`subprotocol`] | State machine per participant |
//! | [`orchestrator`] | Round driver: failover, aggregate, Sign |
//!
//! ## Concurrency Model
//!
//! Satu tokio task per participant per round; orchestrator menjalankan
//! K'+1 task. Dalam satu participant penanganan pesan sekuensial: empat
//! suspension point (receive Announcement, Commitment, Challenge,
//! Response), masing-masing di-select terhadap Stop dan deadline.
//! Roster dan tree immutable sepanjang round (di-share via `Arc`);
//! channel dimiliki eksklusif oleh instance-nya.

// ════════════════════════════════════════════════════════════════════════════════
// MODULE DECLARATIONS
// ════════════════════════════════════════════════════════════════════════════════

/// Identitas server dan roster terurut.
pub mod roster;

/// Tree builder: partisi roster menjadi subtree seimbang.
pub mod tree;

/// Pesan protocol, envelope wire, dan tree-node addressing.
pub mod message;

/// Transport adapter dengan typed registry.
pub mod transport;

/// State machine subprotocol per participant.
pub mod subprotocol;

/// Orchestrator round di sisi root.
pub mod orchestrator;

// ════════════════════════════════════════════════════════════════════════════════
// PUBLIC API EXPORTS
// ════════════════════════════════════════════════════════════════════════════════

pub use roster::{generate_local_roster, Roster, RosterError, ServerIdentity};

pub use tree::{gen_subtree, gen_trees, leaf_ids, subleader_ids, Tree, TreeError, TreeNode};

pub use message::{
    Announcement, Challenge, Commitment, Envelope, MessageDecodeError, ProtocolMessage, Response,
    TreeNodeId,
};

pub use transport::{FaultFilter, LocalRouter, NodeChannels, Transport, TransportError};

pub use subprotocol::{
    LocalProtocolFactory, NodeState, SubProtocolError, SubProtocolNode, SubtreeHandle,
};

pub use orchestrator::{
    CreateProtocol, RoundConfig, RoundError, RoundShutdown, SigningRound, SubtreeSpec,
    DEFAULT_PROTOCOL_TIMEOUT, LEAVES_TIMEOUT_DIVISOR, MIN_TIMEOUT, SUBLEADER_TIMEOUT_DIVISOR,
};

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_re_exports_available() {
        let (roster, _secrets) = generate_local_roster(3).unwrap();
        let trees = gen_trees(&roster, 3, 1).unwrap();
        assert_eq!(trees.len(), 1);
        let _router = LocalRouter::new();
    }

    #[test]
    fn test_timeout_constants_sane() {
        assert!(DEFAULT_PROTOCOL_TIMEOUT > MIN_TIMEOUT);
        assert!(SUBLEADER_TIMEOUT_DIVISOR >= 1);
        assert!(LEAVES_TIMEOUT_DIVISOR >= SUBLEADER_TIMEOUT_DIVISOR);
    }
}
