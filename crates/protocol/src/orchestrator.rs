//! # Root Orchestrator
//!
//! Module ini menggerakkan satu signing round penuh dari sisi root:
//! membangun K' subtree, menjalankan subprotocol-nya secara concurrent,
//! menangani failover subleader, lalu merakit signature Schnorr final.
//!
//! # Sequence
//!
//! ```text
//! ┌────────────┐   start K' subtree   ┌─────────────┐
//! │ SigningRound│ ───────────────────► │ subprotocols │
//! └─────┬──────┘                      └──────┬──────┘
//!       │  ◄── commitment │ not-responding │ deadline ──┤
//!       │      (failover: Stop + rotate + rebuild)      │
//!       │  aggregate commitments + mask                 │
//!       │  challenge = H(V̄ ‖ P̄ ‖ proposal)             │
//!       │ ───────────── challenge ──────────────────────►
//!       │  ◄──────────── responses ──────────────────────
//!       │  aggregate responses, Sign
//!       ▼
//!   signature
//! ```
//!
//! # Failover
//!
//! Subleader yang diam melebihi `subleader_timeout` diganti: subtree
//! di-Stop, peran subleader dirotasi ke anggota berikutnya menurut
//! urutan roster, subtree dibangun ulang dengan attempt baru. Rotasi
//! yang habis membuat subtree DIKECUALIKAN dari round; round tetap
//! berjalan dengan sisa participant. Setelah fase commit TIDAK ada
//! failover: commitment yang sudah ter-aggregate tidak bisa dikeluarkan
//! tanpa membatalkan aggregate, sehingga subtree yang diam setelah
//! commit menggagalkan round.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use curve25519_dalek::scalar::Scalar;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use dcsn_common::{
    aggregate_commitments, aggregate_responses, challenge as cosi_challenge, commit,
    response as cosi_response, sign as cosi_sign, CryptoError, Mask,
};

use crate::message::{Challenge, Commitment};
use crate::roster::Roster;
use crate::subprotocol::{SubProtocolError, SubtreeHandle};
use crate::tree::{gen_subtree, gen_trees, Tree, TreeError};

// ════════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════════

/// Default deadline untuk seluruh round.
pub const DEFAULT_PROTOCOL_TIMEOUT: Duration = Duration::from_secs(20);

/// Subleader timeout default = protocol timeout / divisor ini.
pub const SUBLEADER_TIMEOUT_DIVISOR: u32 = 4;

/// Leaves timeout default = protocol timeout / divisor ini.
pub const LEAVES_TIMEOUT_DIVISOR: u32 = 10;

/// Floor: timeout di bawah nilai ini diganti default-nya.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

// ════════════════════════════════════════════════════════════════════════════════
// ROUND ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error untuk kegagalan satu signing round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundError {
    /// Round di-start tanpa proposal.
    MissingProposal,

    /// Round di-start tanpa factory subprotocol.
    MissingFactory,

    /// Kegagalan pembentukan tree.
    Tree(TreeError),

    /// Kegagalan kriptografis; fatal.
    Crypto(CryptoError),

    /// Kegagalan subprotocol yang tidak bisa dipulihkan failover.
    SubProtocol(SubProtocolError),

    /// Deadline round terlampaui pada fase tertentu.
    Timeout {
        /// Fase yang sedang berjalan saat deadline lewat.
        phase: &'static str,
    },

    /// Round dihentikan lewat shutdown.
    Stopped,
}

impl fmt::Display for RoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundError::MissingProposal => write!(f, "round started without a proposal"),
            RoundError::MissingFactory => {
                write!(f, "round started without a subprotocol factory")
            }
            RoundError::Tree(e) => write!(f, "tree construction failed: {}", e),
            RoundError::Crypto(e) => write!(f, "crypto failure: {}", e),
            RoundError::SubProtocol(e) => write!(f, "subprotocol failure: {}", e),
            RoundError::Timeout { phase } => {
                write!(f, "round deadline exceeded during the {} phase", phase)
            }
            RoundError::Stopped => write!(f, "round was stopped"),
        }
    }
}

impl std::error::Error for RoundError {}

impl From<TreeError> for RoundError {
    fn from(e: TreeError) -> Self {
        RoundError::Tree(e)
    }
}

impl From<CryptoError> for RoundError {
    fn from(e: CryptoError) -> Self {
        RoundError::Crypto(e)
    }
}

impl From<SubProtocolError> for RoundError {
    fn from(e: SubProtocolError) -> Self {
        RoundError::SubProtocol(e)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SUBTREE SPEC & FACTORY
// ════════════════════════════════════════════════════════════════════════════════

/// Deskripsi satu subtree attempt yang diminta orchestrator dari
/// factory.
#[derive(Clone, Debug)]
pub struct SubtreeSpec {
    /// Tree yang akan dijalankan.
    pub tree: Arc<Tree>,
    /// Index subtree dalam round.
    pub subtree: u32,
    /// Nomor attempt; naik satu setiap failover.
    pub attempt: u32,
    /// Deadline seluruh round; backstop untuk receive yang menunggu
    /// orchestrator.
    pub protocol_timeout: Duration,
    /// Deadline commit subleader.
    pub subleader_timeout: Duration,
    /// Deadline kontribusi leaves.
    pub leaves_timeout: Duration,
}

/// Factory callback untuk men-spawn subprotocol di atas sebuah subtree.
///
/// Test dapat menyuplai factory sendiri; deployment in-process memakai
/// `LocalProtocolFactory`.
pub type CreateProtocol =
    Arc<dyn Fn(SubtreeSpec) -> Result<SubtreeHandle, SubProtocolError> + Send + Sync>;

// ════════════════════════════════════════════════════════════════════════════════
// ROUND CONFIG
// ════════════════════════════════════════════════════════════════════════════════

/// Konfigurasi satu signing round.
///
/// Timeout bernilai nol (atau di bawah floor) diganti default saat round
/// berjalan: protocol timeout memakai `DEFAULT_PROTOCOL_TIMEOUT`,
/// subleader timeout seperempat protocol timeout, leaves timeout
/// sepersepuluhnya.
#[derive(Clone)]
pub struct RoundConfig {
    /// Bytes yang akan di-sign. Wajib non-kosong.
    pub proposal: Vec<u8>,
    /// Fan-out K yang diminta; di-clamp ke [1, N−1].
    pub n_subtrees: usize,
    /// Deadline seluruh round.
    pub protocol_timeout: Duration,
    /// Deadline commit per subleader sebelum failover.
    pub subleader_timeout: Duration,
    /// Deadline kontribusi per leaf sebelum dikecualikan.
    pub leaves_timeout: Duration,
    /// Factory subprotocol. Wajib ada.
    pub create_protocol: Option<CreateProtocol>,
}

impl RoundConfig {
    /// Konfigurasi dengan seluruh timeout memakai default.
    #[must_use]
    pub fn new(proposal: Vec<u8>, n_subtrees: usize, create_protocol: CreateProtocol) -> Self {
        Self {
            proposal,
            n_subtrees,
            protocol_timeout: Duration::ZERO,
            subleader_timeout: Duration::ZERO,
            leaves_timeout: Duration::ZERO,
            create_protocol: Some(create_protocol),
        }
    }

    /// Terapkan clamp dan default.
    fn normalized(mut self) -> Self {
        if self.n_subtrees < 1 {
            self.n_subtrees = 1;
        }
        if self.protocol_timeout < MIN_TIMEOUT {
            self.protocol_timeout = DEFAULT_PROTOCOL_TIMEOUT;
        }
        if self.subleader_timeout < MIN_TIMEOUT {
            self.subleader_timeout = self.protocol_timeout / SUBLEADER_TIMEOUT_DIVISOR;
        }
        if self.leaves_timeout < MIN_TIMEOUT {
            self.leaves_timeout = self.protocol_timeout / LEAVES_TIMEOUT_DIVISOR;
        }
        self
    }
}

impl fmt::Debug for RoundConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundConfig")
            .field("proposal_len", &self.proposal.len())
            .field("n_subtrees", &self.n_subtrees)
            .field("protocol_timeout", &self.protocol_timeout)
            .field("subleader_timeout", &self.subleader_timeout)
            .field("leaves_timeout", &self.leaves_timeout)
            .field("has_factory", &self.create_protocol.is_some())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// ROUND SHUTDOWN
// ════════════════════════════════════════════════════════════════════════════════

/// Handle shutdown idempotent untuk satu round.
///
/// Pemanggilan `shutdown()` pertama menutup round; pemanggilan
/// berikutnya no-op.
pub struct RoundShutdown {
    notify: Notify,
    stopped: AtomicBool,
    stop_senders: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

impl RoundShutdown {
    fn new() -> Self {
        Self {
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
            stop_senders: Mutex::new(Vec::new()),
        }
    }

    /// Hentikan round. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.fire_stops();
        self.notify.notify_one();
    }

    /// `true` jika round sudah dihentikan.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Daftarkan stop sender sebuah subtree. Jika round sudah berhenti,
    /// Stop langsung dikirim.
    fn register(&self, sender: mpsc::UnboundedSender<()>) {
        if self.is_stopped() {
            let _ = sender.send(());
            return;
        }
        self.stop_senders.lock().push(sender);
    }

    /// Kirim Stop ke seluruh subtree yang terdaftar.
    fn fire_stops(&self) {
        for sender in self.stop_senders.lock().iter() {
            let _ = sender.send(());
        }
    }
}

impl fmt::Debug for RoundShutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundShutdown")
            .field("stopped", &self.is_stopped())
            .field("subtrees", &self.stop_senders.lock().len())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// COMMIT PHASE DRIVER
// ════════════════════════════════════════════════════════════════════════════════

/// Hasil fase commit untuk satu subtree.
enum CommitOutcome {
    /// Subtree menyumbangkan commitment.
    Committed {
        handle: SubtreeHandle,
        commitment: Commitment,
    },
    /// Rotasi subleader habis; subtree dikecualikan dari round.
    Excluded { members: Vec<usize> },
}

/// Driver per subtree untuk fase commit, termasuk failover loop.
struct CommitDriver {
    roster: Arc<Roster>,
    factory: CreateProtocol,
    proposal: Vec<u8>,
    publics: Vec<curve25519_dalek::ristretto::RistrettoPoint>,
    shutdown: Arc<RoundShutdown>,
    deadline: Instant,
}

enum CommitEvent {
    Commitment(Option<Commitment>),
    NotResponding(Option<()>),
    Deadline,
}

impl CommitDriver {
    async fn run(self, initial: SubtreeSpec) -> Result<CommitOutcome, RoundError> {
        let members = initial.tree.members();
        // Kandidat subleader: anggota non-root menurut urutan roster
        let candidates: Vec<usize> = members[1..].to_vec();
        let mut tried: Vec<usize> = vec![members[1]];
        let mut spec = initial;

        loop {
            let mut handle = (self.factory)(spec.clone())?;
            self.shutdown.register(handle.stop_sender());
            handle.start(&self.proposal, &self.publics)?;

            let event = tokio::select! {
                maybe = handle.sub_commitment.recv() => CommitEvent::Commitment(maybe),
                maybe = handle.subleader_not_responding.recv() => CommitEvent::NotResponding(maybe),
                _ = tokio::time::sleep_until(self.deadline) => CommitEvent::Deadline,
            };

            match event {
                CommitEvent::Commitment(Some(commitment)) => {
                    debug!(subtree = spec.subtree, attempt = spec.attempt, "subtree committed");
                    return Ok(CommitOutcome::Committed { handle, commitment });
                }
                CommitEvent::Commitment(None) => {
                    if self.shutdown.is_stopped() {
                        return Err(RoundError::Stopped);
                    }
                    return Err(RoundError::SubProtocol(SubProtocolError::ChannelClosed));
                }
                CommitEvent::NotResponding(_) => {
                    handle.stop();
                    let next = candidates.iter().find(|c| !tried.contains(c)).copied();
                    match next {
                        Some(next) => {
                            warn!(
                                subtree = spec.subtree,
                                attempt = spec.attempt,
                                replacement = next,
                                "subleader unresponsive, rotating"
                            );
                            tried.push(next);
                            let tree = gen_subtree(&self.roster, &members, next)?;
                            spec = SubtreeSpec {
                                tree: Arc::new(tree),
                                subtree: spec.subtree,
                                attempt: spec.attempt + 1,
                                protocol_timeout: spec.protocol_timeout,
                                subleader_timeout: spec.subleader_timeout,
                                leaves_timeout: spec.leaves_timeout,
                            };
                        }
                        None => {
                            warn!(
                                subtree = spec.subtree,
                                "subleader rotation exhausted, excluding subtree"
                            );
                            return Ok(CommitOutcome::Excluded { members });
                        }
                    }
                }
                CommitEvent::Deadline => {
                    return Err(RoundError::Timeout {
                        phase: "commitment",
                    });
                }
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SIGNING ROUND
// ════════════════════════════════════════════════════════════════════════════════

/// Orchestrator satu signing round.
///
/// Instance ini di-consume oleh `run()`; satu instance satu round.
/// Orchestrator memegang handle seluruh subtree miliknya dan tidak
/// membagi mutable state dengan subprotocol manapun.
pub struct SigningRound {
    roster: Arc<Roster>,
    private: Scalar,
    config: RoundConfig,
    shutdown: Arc<RoundShutdown>,
}

impl SigningRound {
    /// Membuat round baru untuk roster dan private key root.
    #[must_use]
    pub fn new(roster: Arc<Roster>, private: Scalar, config: RoundConfig) -> Self {
        Self {
            roster,
            private,
            config,
            shutdown: Arc::new(RoundShutdown::new()),
        }
    }

    /// Handle shutdown idempotent; dapat dipanggil dari task lain.
    #[must_use]
    pub fn shutdown_handle(&self) -> Arc<RoundShutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Jalankan round sampai selesai dan kembalikan signature bytes.
    ///
    /// # Errors
    ///
    /// - `MissingProposal` / `MissingFactory` untuk konfigurasi invalid
    /// - `Tree` / `Crypto` / `SubProtocol` diteruskan dari komponen
    /// - `Timeout` saat deadline round terlampaui
    /// - `Stopped` saat `shutdown()` dipanggil
    pub async fn run(self) -> Result<Vec<u8>, RoundError> {
        let config = self.config.clone().normalized();
        if config.proposal.is_empty() {
            return Err(RoundError::MissingProposal);
        }
        let factory = config.create_protocol.clone().ok_or(RoundError::MissingFactory)?;

        if self.shutdown.is_stopped() {
            return Err(RoundError::Stopped);
        }

        let deadline = Instant::now() + config.protocol_timeout;
        let shutdown = Arc::clone(&self.shutdown);
        let result = tokio::select! {
            result = self.execute(&config, factory, deadline) => result,
            _ = shutdown.notify.notified() => Err(RoundError::Stopped),
        };

        // Teardown: subtree yang masih hidup di-Stop, apapun hasilnya
        shutdown.fire_stops();
        match &result {
            Ok(signature) => info!(bytes = signature.len(), "round produced a signature"),
            Err(e) => warn!(error = %e, "round failed"),
        }
        result
    }

    /// Spawn round sebagai task dan terima hasilnya lewat channel
    /// sekali-pakai.
    #[must_use]
    pub fn spawn(self) -> (Arc<RoundShutdown>, oneshot::Receiver<Result<Vec<u8>, RoundError>>) {
        let shutdown = self.shutdown_handle();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let _ = tx.send(self.run().await);
        });
        (shutdown, rx)
    }

    async fn execute(
        &self,
        config: &RoundConfig,
        factory: CreateProtocol,
        deadline: Instant,
    ) -> Result<Vec<u8>, RoundError> {
        let n = self.roster.len();
        let publics = self.roster.publics();
        let mut rng = OsRng;

        // Kontribusi root sendiri
        let (own_secret, own_commitment) = commit(&mut rng);
        let mut final_mask = Mask::new(&publics);
        final_mask.set_bit(0, true)?;

        // Satu signer: tidak ada subtree, root sign sendirian
        if n == 1 {
            info!("single-server roster, signing alone");
            let c = cosi_challenge(
                &own_commitment,
                final_mask.aggregate_public(),
                &config.proposal,
            );
            let r = cosi_response(&self.private, &own_secret, &c);
            return Ok(cosi_sign(&own_commitment, &r, &final_mask));
        }

        // ----- Fase commit (dengan failover per subtree) -----
        let trees = gen_trees(&self.roster, n, config.n_subtrees)?;
        info!(
            signers = n,
            subtrees = trees.len(),
            "starting collective signing round"
        );

        let mut drivers = Vec::with_capacity(trees.len());
        for (i, tree) in trees.into_iter().enumerate() {
            let spec = SubtreeSpec {
                tree: Arc::new(tree),
                subtree: i as u32,
                attempt: 0,
                protocol_timeout: config.protocol_timeout,
                subleader_timeout: config.subleader_timeout,
                leaves_timeout: config.leaves_timeout,
            };
            let driver = CommitDriver {
                roster: Arc::clone(&self.roster),
                factory: Arc::clone(&factory),
                proposal: config.proposal.clone(),
                publics: publics.clone(),
                shutdown: Arc::clone(&self.shutdown),
                deadline,
            };
            drivers.push(tokio::spawn(driver.run(spec)));
        }

        let mut committed: Vec<(SubtreeHandle, Commitment)> = Vec::new();
        for driver in drivers {
            let outcome = driver
                .await
                .map_err(|_| RoundError::SubProtocol(SubProtocolError::ChannelClosed))??;
            match outcome {
                CommitOutcome::Committed { handle, commitment } => {
                    committed.push((handle, commitment));
                }
                CommitOutcome::Excluded { members } => {
                    warn!(?members, "subtree excluded from the round");
                }
            }
        }

        // ----- Aggregate commitments + mask -----
        let mut commitments = vec![own_commitment];
        for (_, commitment) in &committed {
            commitments.push(commitment.commitment);
            final_mask.merge(&commitment.mask)?;
        }
        let agg_commitment = aggregate_commitments(&commitments);

        // ----- Challenge -----
        let c = cosi_challenge(
            &agg_commitment,
            final_mask.aggregate_public(),
            &config.proposal,
        );
        info!(
            participants = final_mask.count_enabled(),
            total = n,
            "issuing challenge"
        );
        for (handle, _) in &committed {
            handle.challenge(Challenge { challenge: c })?;
        }

        // ----- Fase response (tanpa failover) -----
        let mut responses = vec![cosi_response(&self.private, &own_secret, &c)];
        for (handle, _) in committed.iter_mut() {
            tokio::select! {
                maybe = handle.sub_response.recv() => match maybe {
                    Some(response) => responses.push(response.response),
                    None => return Err(RoundError::SubProtocol(SubProtocolError::ChannelClosed)),
                },
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(RoundError::Timeout { phase: "response" });
                }
            }
        }
        let agg_response = aggregate_responses(&responses);

        // ----- Assembly -----
        let signature = cosi_sign(&agg_commitment, &agg_response, &final_mask);

        // Tunggu task subtree selesai; semua sudah merespons
        for (handle, _) in committed {
            for state in handle.join().await {
                if let Err(e) = state {
                    debug!(error = %e, "subtree task ended with an error after responding");
                }
            }
        }

        Ok(signature)
    }
}

impl fmt::Debug for SigningRound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningRound")
            .field("roster_len", &self.roster.len())
            .field("config", &self.config)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::generate_local_roster;
    use crate::subprotocol::LocalProtocolFactory;
    use crate::transport::LocalRouter;
    use dcsn_common::{verify, Policy};

    fn noop_factory() -> CreateProtocol {
        Arc::new(|_| Err(SubProtocolError::ChannelClosed))
    }

    /// Roster lokal + factory in-process siap pakai.
    fn make_local_round(
        n: usize,
        proposal: &[u8],
        n_subtrees: usize,
    ) -> (SigningRound, Arc<Roster>, Arc<LocalRouter>) {
        let (roster, secrets) = generate_local_roster(n).unwrap();
        let roster = Arc::new(roster);
        let router = Arc::new(LocalRouter::new());
        let private = secrets[0];
        let factory = Arc::new(
            LocalProtocolFactory::new(Arc::clone(&router), Arc::clone(&roster), secrets).unwrap(),
        );
        let create: CreateProtocol = Arc::new(move |spec| factory.spawn_subtree(&spec));
        let config = RoundConfig::new(proposal.to_vec(), n_subtrees, create);
        (
            SigningRound::new(Arc::clone(&roster), private, config),
            roster,
            router,
        )
    }

    // ────────────────────────────────────────────────────────────────────────────
    // CONFIG
    // ────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_config_defaults_applied() {
        let config = RoundConfig::new(b"p".to_vec(), 0, noop_factory()).normalized();
        assert_eq!(config.n_subtrees, 1);
        assert_eq!(config.protocol_timeout, DEFAULT_PROTOCOL_TIMEOUT);
        assert_eq!(
            config.subleader_timeout,
            DEFAULT_PROTOCOL_TIMEOUT / SUBLEADER_TIMEOUT_DIVISOR
        );
        assert_eq!(
            config.leaves_timeout,
            DEFAULT_PROTOCOL_TIMEOUT / LEAVES_TIMEOUT_DIVISOR
        );
    }

    #[test]
    fn test_config_explicit_timeouts_kept() {
        let mut config = RoundConfig::new(b"p".to_vec(), 2, noop_factory());
        config.protocol_timeout = Duration::from_secs(5);
        config.subleader_timeout = Duration::from_millis(100);
        config.leaves_timeout = Duration::from_millis(50);
        let config = config.normalized();
        assert_eq!(config.protocol_timeout, Duration::from_secs(5));
        assert_eq!(config.subleader_timeout, Duration::from_millis(100));
        assert_eq!(config.leaves_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_config_debug_omits_factory() {
        let config = RoundConfig::new(b"p".to_vec(), 2, noop_factory());
        let debug = format!("{:?}", config);
        assert!(debug.contains("has_factory"));
        assert!(debug.contains("proposal_len"));
    }

    // ────────────────────────────────────────────────────────────────────────────
    // VALIDATION
    // ────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_rejects_empty_proposal() {
        let (round, _, _) = make_local_round(3, b"", 1);
        let result = round.run().await;
        assert_eq!(result.unwrap_err(), RoundError::MissingProposal);
    }

    #[tokio::test]
    async fn test_run_rejects_missing_factory() {
        let (roster, secrets) = generate_local_roster(3).unwrap();
        let config = RoundConfig {
            proposal: b"proposal".to_vec(),
            n_subtrees: 1,
            protocol_timeout: Duration::ZERO,
            subleader_timeout: Duration::ZERO,
            leaves_timeout: Duration::ZERO,
            create_protocol: None,
        };
        let round = SigningRound::new(Arc::new(roster), secrets[0], config);
        assert_eq!(round.run().await.unwrap_err(), RoundError::MissingFactory);
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ROUNDS
    // ────────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_single_server_signs_alone() {
        let (round, roster, _) = make_local_round(1, b"proposal", 1);
        let signature = round.run().await.unwrap();
        verify(&roster.publics(), b"proposal", &signature, &Policy::Complete).unwrap();
    }

    #[tokio::test]
    async fn test_happy_path_two_subtrees() {
        let (round, roster, router) = make_local_round(7, b"proposal", 2);
        let signature = round.run().await.unwrap();
        verify(&roster.publics(), b"proposal", &signature, &Policy::Complete).unwrap();
        router.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let (round, _, _) = make_local_round(3, b"proposal", 1);
        round.shutdown_handle().shutdown();
        assert_eq!(round.run().await.unwrap_err(), RoundError::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_idempotent() {
        let (round, _, _) = make_local_round(3, b"proposal", 1);
        let shutdown = round.shutdown_handle();
        shutdown.shutdown();
        shutdown.shutdown();
        shutdown.shutdown();
        assert!(shutdown.is_stopped());
    }

    #[tokio::test]
    async fn test_spawn_delivers_result_once() {
        let (round, roster, _) = make_local_round(5, b"proposal", 2);
        let (_shutdown, rx) = round.spawn();
        let signature = rx.await.unwrap().unwrap();
        verify(&roster.publics(), b"proposal", &signature, &Policy::Complete).unwrap();
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ERROR DISPLAY
    // ────────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_error_display() {
        assert!(RoundError::MissingProposal.to_string().contains("proposal"));
        assert!(RoundError::Timeout { phase: "response" }
            .to_string()
            .contains("response"));
        assert!(RoundError::Stopped.to_string().contains("stopped"));
    }
}
