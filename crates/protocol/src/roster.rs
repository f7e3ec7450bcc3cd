//! # Roster
//!
//! Module ini menyediakan `ServerIdentity` dan `Roster`: daftar terurut
//! seluruh signer yang dikenal untuk satu signing round.
//!
//! # Invariants
//!
//! - Roster tidak pernah kosong
//! - Setiap `ServerId` muncul paling banyak sekali
//! - Urutan roster stabil; index 0 adalah root dari SEMUA subtree

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;

use dcsn_common::{generate_keypair, ServerId};

// ════════════════════════════════════════════════════════════════════════════════
// ROSTER ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error validasi pembentukan roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterError {
    /// Deskripsi penyebab kegagalan validasi.
    pub reason: String,
}

impl fmt::Display for RosterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "roster validation failed: {}", self.reason)
    }
}

impl std::error::Error for RosterError {}

// ════════════════════════════════════════════════════════════════════════════════
// SERVER IDENTITY
// ════════════════════════════════════════════════════════════════════════════════

/// Identitas publik satu server: id stabil, network address, dan
/// long-term public key.
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    id: ServerId,
    address: String,
    public: RistrettoPoint,
}

impl ServerIdentity {
    /// Membuat identitas server baru.
    #[must_use]
    pub fn new(id: ServerId, address: impl Into<String>, public: RistrettoPoint) -> Self {
        Self {
            id,
            address: address.into(),
            public,
        }
    }

    /// Identifier stabil server.
    #[must_use]
    pub const fn id(&self) -> &ServerId {
        &self.id
    }

    /// Network address server.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Long-term public key server.
    #[must_use]
    pub const fn public(&self) -> &RistrettoPoint {
        &self.public
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("id", &self.id)
            .field("address", &self.address)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// ROSTER
// ════════════════════════════════════════════════════════════════════════════════

/// Daftar terurut seluruh signer untuk satu round.
///
/// Roster bersifat immutable selama round berjalan; di-share antar task
/// via `Arc`. Index 0 adalah root dari setiap subtree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Roster {
    servers: Vec<ServerIdentity>,
}

impl Roster {
    /// Membuat roster dari daftar identitas, dengan validasi.
    ///
    /// # Errors
    ///
    /// `RosterError` jika daftar kosong atau mengandung `ServerId`
    /// duplikat.
    pub fn new(servers: Vec<ServerIdentity>) -> Result<Self, RosterError> {
        if servers.is_empty() {
            return Err(RosterError {
                reason: "roster is empty".to_string(),
            });
        }
        for (i, server) in servers.iter().enumerate() {
            if servers[..i].iter().any(|s| s.id() == server.id()) {
                return Err(RosterError {
                    reason: format!("duplicate server id {}", server.id()),
                });
            }
        }
        Ok(Self { servers })
    }

    /// Jumlah server dalam roster.
    #[must_use]
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// `true` jika roster kosong. Selalu `false` untuk roster yang lolos
    /// validasi; disediakan untuk kelengkapan API.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Identitas server pada index `i`.
    #[must_use]
    pub fn get(&self, i: usize) -> Option<&ServerIdentity> {
        self.servers.get(i)
    }

    /// Index roster untuk `ServerId` yang diberikan.
    #[must_use]
    pub fn index_of(&self, id: &ServerId) -> Option<usize> {
        self.servers.iter().position(|s| s.id() == id)
    }

    /// Seluruh identitas, urutan roster.
    #[must_use]
    pub fn servers(&self) -> &[ServerIdentity] {
        &self.servers
    }

    /// Seluruh public key, urutan roster.
    #[must_use]
    pub fn publics(&self) -> Vec<RistrettoPoint> {
        self.servers.iter().map(|s| *s.public()).collect()
    }

    /// Seluruh `ServerId`, urutan roster.
    #[must_use]
    pub fn ids(&self) -> Vec<ServerId> {
        self.servers.iter().map(|s| s.id().clone()).collect()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// LOCAL ROSTER GENERATION
// ════════════════════════════════════════════════════════════════════════════════

/// Generate roster lokal berukuran `n` beserta private keys-nya.
///
/// Dipakai oleh service in-process dan test harness: setiap server
/// mendapat keypair fresh dari `OsRng` dan address sintetis
/// `local://node-{i}`. Vector scalar yang dikembalikan sejajar dengan
/// urutan roster.
pub fn generate_local_roster(n: usize) -> Result<(Roster, Vec<Scalar>), RosterError> {
    if n == 0 {
        return Err(RosterError {
            reason: "cannot generate an empty roster".to_string(),
        });
    }
    let mut rng = OsRng;
    let mut servers = Vec::with_capacity(n);
    let mut secrets = Vec::with_capacity(n);
    for i in 0..n {
        let (private, public) = generate_keypair(&mut rng);
        servers.push(ServerIdentity::new(
            ServerId::new(),
            format!("local://node-{}", i),
            public,
        ));
        secrets.push(private);
    }
    let roster = Roster::new(servers)?;
    Ok((roster, secrets))
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn make_identity(seed: u8) -> ServerIdentity {
        let mut rng = rand::thread_rng();
        let (_, public) = generate_keypair(&mut rng);
        ServerIdentity::new(
            ServerId::from_bytes([seed; 32]),
            format!("local://node-{}", seed),
            public,
        )
    }

    #[test]
    fn test_roster_new_valid() {
        let roster = Roster::new(vec![make_identity(1), make_identity(2)]).unwrap();
        assert_eq!(roster.len(), 2);
        assert!(!roster.is_empty());
    }

    #[test]
    fn test_roster_rejects_empty() {
        let result = Roster::new(vec![]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_roster_rejects_duplicate_ids() {
        let result = Roster::new(vec![make_identity(1), make_identity(1)]);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("duplicate"));
    }

    #[test]
    fn test_index_of() {
        let roster = Roster::new(vec![make_identity(1), make_identity(2)]).unwrap();
        let id = ServerId::from_bytes([2; 32]);
        assert_eq!(roster.index_of(&id), Some(1));

        let unknown = ServerId::from_bytes([9; 32]);
        assert_eq!(roster.index_of(&unknown), None);
    }

    #[test]
    fn test_publics_order_matches_roster() {
        let servers = vec![make_identity(1), make_identity(2), make_identity(3)];
        let expected: Vec<_> = servers.iter().map(|s| *s.public()).collect();
        let roster = Roster::new(servers).unwrap();
        assert_eq!(roster.publics(), expected);
    }

    #[test]
    fn test_generate_local_roster() {
        let (roster, secrets) = generate_local_roster(5).unwrap();
        assert_eq!(roster.len(), 5);
        assert_eq!(secrets.len(), 5);

        // Secret dan public harus berpasangan per index
        for (i, secret) in secrets.iter().enumerate() {
            let expected = RistrettoPoint::mul_base(secret);
            assert_eq!(roster.get(i).unwrap().public(), &expected);
        }
    }

    #[test]
    fn test_generate_local_roster_zero() {
        assert!(generate_local_roster(0).is_err());
    }

    #[test]
    fn test_identity_debug_omits_key() {
        let identity = make_identity(7);
        let debug = format!("{:?}", identity);
        assert!(debug.contains("address"));
        assert!(!debug.contains("public"));
    }
}
