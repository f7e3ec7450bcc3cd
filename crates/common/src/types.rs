//! # Identifier Types
//!
//! Module ini menyediakan identifier types untuk DCSN:
//! - `ServerId`: Identifier stabil untuk satu server dalam roster
//!
//! ## Karakteristik
//!
//! - Ukuran tetap 32 bytes
//! - Opaque (inner value tidak dapat diakses secara mutable)
//! - Deterministic serialization (via serde)
//! - Hashable untuk penggunaan dalam HashMap/HashSet
//!
//! ## Keamanan
//!
//! Identifier baru dibuat menggunakan cryptographically secure random
//! number generator dari crate `rand`.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

// ════════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════════

/// Ukuran identifier dalam bytes.
pub const IDENTIFIER_SIZE: usize = 32;

// ════════════════════════════════════════════════════════════════════════════════
// SERVER ID
// ════════════════════════════════════════════════════════════════════════════════

/// Identifier stabil untuk satu server dalam roster.
///
/// `ServerId` mengidentifikasi setiap signer secara unik, independen dari
/// network address. Identifier ini dipakai untuk routing messages dan untuk
/// menandai peran (subleader, leaf) dalam satu signing round.
///
/// ## Contoh
///
/// ```
/// use dcsn_common::ServerId;
///
/// // Buat server ID baru dengan random bytes
/// let id = ServerId::new();
///
/// // Konversi ke hex untuk logging
/// let hex_str = id.to_hex();
/// assert_eq!(hex_str.len(), 64); // 32 bytes = 64 hex chars
///
/// // Buat dari bytes yang diketahui
/// let id = ServerId::from_bytes([0u8; 32]);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerId([u8; IDENTIFIER_SIZE]);

impl ServerId {
    /// Membuat `ServerId` baru dengan random bytes.
    ///
    /// Menggunakan `rand::thread_rng()` sebagai sumber entropi.
    #[must_use]
    pub fn new() -> Self {
        let mut bytes = [0u8; IDENTIFIER_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Membuat `ServerId` dari bytes yang sudah ada.
    ///
    /// Tidak ada validasi dilakukan - caller bertanggung jawab
    /// memastikan bytes merepresentasikan identifier yang valid.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_SIZE]) -> Self {
        Self(bytes)
    }

    /// Mengembalikan reference ke inner bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; IDENTIFIER_SIZE] {
        &self.0
    }

    /// Mengkonversi identifier ke lowercase hexadecimal string.
    ///
    /// Output selalu 64 karakter, deterministik.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ServerId {
    /// Default menghasilkan identifier baru dengan random bytes.
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tampilkan 8 karakter pertama hex untuk readability
        let hex = self.to_hex();
        write!(f, "ServerId({}...)", &hex[..8])
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

impl PartialEq for ServerId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for ServerId {}

impl Hash for ServerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_is_random() {
        let a = ServerId::new();
        let b = ServerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let bytes = [0x42u8; IDENTIFIER_SIZE];
        let id = ServerId::from_bytes(bytes);
        assert_eq!(id.as_bytes(), &bytes);
    }

    #[test]
    fn test_to_hex_length_and_determinism() {
        let id = ServerId::from_bytes([0xAB; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, id.to_hex());
        assert!(hex.starts_with("abab"));
    }

    #[test]
    fn test_debug_truncated() {
        let id = ServerId::from_bytes([0xCD; 32]);
        let debug = format!("{:?}", id);
        assert!(debug.starts_with("ServerId(cdcdcdcd"));
        assert!(debug.len() < 30);
    }

    #[test]
    fn test_usable_in_hashset() {
        let mut set = HashSet::new();
        let id = ServerId::from_bytes([0x01; 32]);
        set.insert(id.clone());
        set.insert(id.clone());
        assert_eq!(set.len(), 1);
        assert!(set.contains(&id));
    }

    #[test]
    fn test_display_is_short_hex() {
        let id = ServerId::from_bytes([0xEF; 32]);
        assert_eq!(format!("{}", id), "efefefef");
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ServerId>();
    }
}
