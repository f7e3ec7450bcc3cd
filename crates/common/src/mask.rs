//! # Participation Mask & Verification Policies
//!
//! Module ini menyediakan `Mask`, bitmap partisipasi untuk collective
//! signature, beserta `Policy` yang menentukan kapan sebuah signature
//! dianggap valid oleh verifier.
//!
//! # Invariants
//!
//! - Aggregate public point SELALU sama dengan jumlah (group sum) public
//!   keys yang bit-nya di-set
//! - Mask di-combine dengan OR saat partial signatures di-aggregate
//! - Tidak ada bit yang di-set di luar daftar publics
//!
//! # Encoding
//!
//! Bitmap di-pack per byte: bit `i` berada di byte `i / 8`, posisi
//! `i % 8` (LSB-first). Panjang bitmap = `⌈n/8⌉` bytes untuk `n` signers.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::traits::Identity;
use std::fmt;

use crate::crypto::CryptoError;

// ════════════════════════════════════════════════════════════════════════════════
// MASK
// ════════════════════════════════════════════════════════════════════════════════

/// Bitmap partisipasi dengan aggregate public key.
///
/// Setiap bit merepresentasikan satu signer dalam daftar publics (urutan
/// roster). Bit bernilai 1 berarti "berpartisipasi"; 0 berarti "tidak
/// termasuk dalam signature ini". Aggregate public point di-maintain
/// secara incremental setiap kali bit berubah.
#[derive(Clone)]
pub struct Mask {
    /// Bitmap ter-pack, panjang `⌈publics.len()/8⌉`.
    bits: Vec<u8>,

    /// Public keys seluruh roster, urutan tetap.
    publics: Vec<RistrettoPoint>,

    /// Jumlah group dari publics yang bit-nya di-set.
    aggregate: RistrettoPoint,
}

impl Mask {
    /// Membuat mask kosong (semua bit 0) untuk daftar publics.
    #[must_use]
    pub fn new(publics: &[RistrettoPoint]) -> Self {
        Self {
            bits: vec![0u8; Self::mask_len(publics.len())],
            publics: publics.to_vec(),
            aggregate: RistrettoPoint::identity(),
        }
    }

    /// Membuat mask dengan satu bit di-set untuk `enabled`.
    ///
    /// # Errors
    ///
    /// `CryptoError::UnknownSigner` jika `enabled` tidak ada dalam publics.
    pub fn with_enabled(
        publics: &[RistrettoPoint],
        enabled: &RistrettoPoint,
    ) -> Result<Self, CryptoError> {
        let index = publics
            .iter()
            .position(|p| p == enabled)
            .ok_or(CryptoError::UnknownSigner)?;
        let mut mask = Self::new(publics);
        mask.set_bit(index, true)?;
        Ok(mask)
    }

    /// Rekonstruksi mask dari bitmap bytes.
    ///
    /// # Errors
    ///
    /// - `CryptoError::MaskLength` jika panjang bytes tidak sesuai
    /// - `CryptoError::StrayMaskBit` jika ada bit di luar range publics
    pub fn from_bytes(publics: &[RistrettoPoint], bytes: &[u8]) -> Result<Self, CryptoError> {
        let expected = Self::mask_len(publics.len());
        if bytes.len() != expected {
            return Err(CryptoError::MaskLength {
                expected,
                found: bytes.len(),
            });
        }

        let mut mask = Self::new(publics);
        for index in 0..bytes.len() * 8 {
            if bytes[index / 8] & (1 << (index % 8)) == 0 {
                continue;
            }
            if index >= publics.len() {
                return Err(CryptoError::StrayMaskBit { index });
            }
            mask.set_bit(index, true)?;
        }
        Ok(mask)
    }

    /// Panjang bitmap dalam bytes untuk `n` signers.
    #[must_use]
    pub const fn mask_len(n: usize) -> usize {
        (n + 7) / 8
    }

    // ────────────────────────────────────────────────────────────────────────────
    // QUERIES
    // ────────────────────────────────────────────────────────────────────────────

    /// Jumlah signer yang direpresentasikan mask ini.
    #[must_use]
    pub fn len(&self) -> usize {
        self.publics.len()
    }

    /// `true` jika mask tidak merepresentasikan signer sama sekali.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publics.is_empty()
    }

    /// Nilai bit untuk signer `index`.
    #[must_use]
    pub fn bit(&self, index: usize) -> bool {
        if index >= self.publics.len() {
            return false;
        }
        self.bits[index / 8] & (1 << (index % 8)) != 0
    }

    /// Jumlah bit yang di-set.
    #[must_use]
    pub fn count_enabled(&self) -> usize {
        (0..self.publics.len()).filter(|i| self.bit(*i)).count()
    }

    /// Bitmap ter-pack.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Aggregate public point dari seluruh signer yang di-set.
    #[must_use]
    pub fn aggregate_public(&self) -> &RistrettoPoint {
        &self.aggregate
    }

    // ────────────────────────────────────────────────────────────────────────────
    // MUTATIONS
    // ────────────────────────────────────────────────────────────────────────────

    /// Set atau clear bit untuk signer `index`.
    ///
    /// Aggregate public di-update secara incremental: menambah public key
    /// saat bit naik, mengurangi saat bit turun. No-op jika nilai tidak
    /// berubah.
    ///
    /// # Errors
    ///
    /// `CryptoError::IndexOutOfRange` jika `index >= len()`.
    pub fn set_bit(&mut self, index: usize, enabled: bool) -> Result<(), CryptoError> {
        if index >= self.publics.len() {
            return Err(CryptoError::IndexOutOfRange {
                index,
                len: self.publics.len(),
            });
        }
        if self.bit(index) == enabled {
            return Ok(());
        }
        if enabled {
            self.bits[index / 8] |= 1 << (index % 8);
            self.aggregate += self.publics[index];
        } else {
            self.bits[index / 8] &= !(1 << (index % 8));
            self.aggregate -= self.publics[index];
        }
        Ok(())
    }

    /// OR-combine bitmap lain ke mask ini.
    ///
    /// Dipakai saat meng-aggregate commitment anak: mask anak di-merge ke
    /// mask lokal. Bit yang sudah di-set tidak berubah.
    ///
    /// # Errors
    ///
    /// - `CryptoError::MaskLength` jika panjang bitmap berbeda
    /// - `CryptoError::StrayMaskBit` jika bitmap lain membawa bit liar
    pub fn merge(&mut self, other: &[u8]) -> Result<(), CryptoError> {
        if other.len() != self.bits.len() {
            return Err(CryptoError::MaskLength {
                expected: self.bits.len(),
                found: other.len(),
            });
        }
        for index in 0..other.len() * 8 {
            if other[index / 8] & (1 << (index % 8)) == 0 {
                continue;
            }
            if index >= self.publics.len() {
                return Err(CryptoError::StrayMaskBit { index });
            }
            self.set_bit(index, true)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("len", &self.publics.len())
            .field("enabled", &self.count_enabled())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// POLICY
// ════════════════════════════════════════════════════════════════════════════════

/// Predicate verifikasi atas participation mask.
///
/// Protocol tidak meng-enforce policy apapun; protocol hanya berusaha
/// memasukkan sebanyak mungkin signer yang merespons tepat waktu. Verifier
/// memilih policy saat memverifikasi signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Policy {
    /// Valid hanya jika SEMUA bit di-set.
    Complete,

    /// Valid jika minimal `t` bit di-set.
    Threshold(usize),
}

impl Policy {
    /// Evaluasi policy terhadap sebuah mask.
    #[must_use]
    pub fn check(&self, mask: &Mask) -> bool {
        match self {
            Policy::Complete => mask.count_enabled() == mask.len(),
            Policy::Threshold(t) => mask.count_enabled() >= *t,
        }
    }

    /// Jumlah bit minimum yang dituntut policy untuk `n` signers.
    #[must_use]
    pub const fn required(&self, n: usize) -> usize {
        match self {
            Policy::Complete => n,
            Policy::Threshold(t) => *t,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Policy::Complete => write!(f, "complete"),
            Policy::Threshold(t) => write!(f, "threshold({})", t),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════
