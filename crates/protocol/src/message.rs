//! # Protocol Messages
//!
//! Module ini menyediakan lima pesan protocol beserta framing-nya.
//!
//! # Message Types
//!
//! | Variant | message_type() | Arah |
//! |---------|----------------|------|
//! | Announcement | "announcement" | turun (root → subleader → leaves) |
//! | Commitment | "commitment" | naik (leaves → subleader → root) |
//! | Challenge | "challenge" | turun |
//! | Response | "response" | naik |
//! | Stop | "stop" | broadcast dari subtree root |
//!
//! # Encoding
//!
//! | Property | Value |
//! |----------|-------|
//! | Format | bincode |
//! | Serialization | Deterministic |
//!
//! Setiap pesan di wire dibungkus `Envelope` yang membawa `TreeNodeId`
//! pengirim, sehingga penerima dapat memvalidasi arah edge.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::{Deserialize, Serialize};
use std::fmt;

use dcsn_common::ServerId;

// ════════════════════════════════════════════════════════════════════════════════
// TREE NODE ID
// ════════════════════════════════════════════════════════════════════════════════

/// Alamat satu tree node untuk satu attempt subtree.
///
/// Server yang sama dapat menempati node berbeda (root hadir di setiap
/// subtree; subleader yang gagal lahir kembali sebagai leaf saat
/// failover), sehingga addressing memakai triple (subtree, attempt,
/// server) dan bukan `ServerId` telanjang.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeNodeId {
    /// Index subtree dalam round.
    pub subtree: u32,
    /// Nomor attempt subtree (naik satu setiap failover).
    pub attempt: u32,
    /// Server yang menempati node ini.
    pub server: ServerId,
}

impl TreeNodeId {
    /// Membuat tree node id baru.
    #[must_use]
    pub const fn new(subtree: u32, attempt: u32, server: ServerId) -> Self {
        Self {
            subtree,
            attempt,
            server,
        }
    }
}

impl fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}a{}/{}", self.subtree, self.attempt, self.server)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MESSAGE PAYLOADS
// ════════════════════════════════════════════════════════════════════════════════

/// Pesan pembuka round: proposal + daftar public key roster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    /// Bytes yang akan di-sign, opaque bagi protocol.
    pub proposal: Vec<u8>,
    /// Public key seluruh roster, urutan roster.
    pub publics: Vec<RistrettoPoint>,
}

/// Commitment ter-aggregate dari satu cabang.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    /// Aggregate commitment point `V`.
    pub commitment: RistrettoPoint,
    /// Bitmap partisipasi cabang, panjang `⌈n/8⌉`.
    pub mask: Vec<u8>,
}

/// Collective challenge dari orchestrator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    /// Scalar challenge `c`.
    pub challenge: Scalar,
}

/// Response ter-aggregate dari satu cabang.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Aggregate response scalar `r`.
    pub response: Scalar,
}

// ════════════════════════════════════════════════════════════════════════════════
// PROTOCOL MESSAGE
// ════════════════════════════════════════════════════════════════════════════════

/// Tagged union seluruh pesan protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProtocolMessage {
    /// Proposal + publics, mengalir ke bawah.
    Announcement(Announcement),
    /// Aggregate commitment, mengalir ke atas.
    Commitment(Commitment),
    /// Challenge, mengalir ke bawah.
    Challenge(Challenge),
    /// Aggregate response, mengalir ke atas.
    Response(Response),
    /// Teardown subtree; idempotent.
    Stop,
}

impl ProtocolMessage {
    /// String discriminator unik per variant.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            ProtocolMessage::Announcement(_) => "announcement",
            ProtocolMessage::Commitment(_) => "commitment",
            ProtocolMessage::Challenge(_) => "challenge",
            ProtocolMessage::Response(_) => "response",
            ProtocolMessage::Stop => "stop",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// ENVELOPE
// ════════════════════════════════════════════════════════════════════════════════

/// Frame wire: pesan + identitas tree node pengirim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Tree node pengirim.
    pub from: TreeNodeId,
    /// Pesan yang dibawa.
    pub message: ProtocolMessage,
}

impl Envelope {
    /// Membuat envelope baru.
    #[must_use]
    pub const fn new(from: TreeNodeId, message: ProtocolMessage) -> Self {
        Self { from, message }
    }

    /// Encode envelope ke bytes menggunakan bincode.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        bincode::serde::encode_to_vec(self, bincode::config::standard()).unwrap_or_default()
    }

    /// Decode bytes ke envelope.
    ///
    /// # Errors
    ///
    /// - `MessageDecodeError::EmptyData` untuk input kosong
    /// - `MessageDecodeError::DeserializationFailed` jika bincode gagal
    pub fn decode(bytes: &[u8]) -> Result<Self, MessageDecodeError> {
        if bytes.is_empty() {
            return Err(MessageDecodeError::EmptyData);
        }
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(envelope, _)| envelope)
            .map_err(|e| MessageDecodeError::DeserializationFailed {
                reason: e.to_string(),
            })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MESSAGE DECODE ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error untuk decode failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDecodeError {
    /// Bincode deserialization gagal.
    DeserializationFailed {
        /// Error message dari bincode.
        reason: String,
    },
    /// Data kosong.
    EmptyData,
}

impl fmt::Display for MessageDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageDecodeError::DeserializationFailed { reason } => {
                write!(f, "envelope decode failed: {}", reason)
            }
            MessageDecodeError::EmptyData => {
                write!(f, "envelope decode failed: empty data")
            }
        }
    }
}

impl std::error::Error for MessageDecodeError {}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use dcsn_common::generate_keypair;

    fn make_node_id(seed: u8) -> TreeNodeId {
        TreeNodeId::new(0, 0, ServerId::from_bytes([seed; 32]))
    }

    fn make_point() -> RistrettoPoint {
        generate_keypair(&mut rand::thread_rng()).1
    }

    #[test]
    fn test_message_type_discriminators() {
        let announcement = ProtocolMessage::Announcement(Announcement {
            proposal: vec![0xFF],
            publics: vec![],
        });
        assert_eq!(announcement.message_type(), "announcement");
        assert_eq!(ProtocolMessage::Stop.message_type(), "stop");

        let challenge = ProtocolMessage::Challenge(Challenge {
            challenge: Scalar::from(7u64),
        });
        assert_eq!(challenge.message_type(), "challenge");
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope::new(
            make_node_id(0x01),
            ProtocolMessage::Commitment(Commitment {
                commitment: make_point(),
                mask: vec![0b0000_0111],
            }),
        );

        let bytes = envelope.encode();
        assert!(!bytes.is_empty());
        let decoded = Envelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_roundtrip_announcement() {
        let envelope = Envelope::new(
            make_node_id(0x02),
            ProtocolMessage::Announcement(Announcement {
                proposal: b"proposal".to_vec(),
                publics: vec![make_point(), make_point()],
            }),
        );
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_empty_data() {
        let result = Envelope::decode(&[]);
        assert!(matches!(result, Err(MessageDecodeError::EmptyData)));
    }

    #[test]
    fn test_decode_garbage() {
        let result = Envelope::decode(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(
            result,
            Err(MessageDecodeError::DeserializationFailed { .. })
        ));
    }

    #[test]
    fn test_tree_node_id_display() {
        let id = TreeNodeId::new(2, 1, ServerId::from_bytes([0xAB; 32]));
        assert_eq!(id.to_string(), "s2a1/abababab");
    }

    #[test]
    fn test_tree_node_id_distinguishes_attempts() {
        let server = ServerId::from_bytes([0x01; 32]);
        let a = TreeNodeId::new(0, 0, server.clone());
        let b = TreeNodeId::new(0, 1, server);
        assert_ne!(a, b);
    }

    #[test]
    fn test_decode_error_display() {
        let err = MessageDecodeError::EmptyData;
        assert!(err.to_string().contains("empty"));
    }
}
