//! # Subprotocol Node
//!
//! Module ini menyediakan state machine yang berjalan di SETIAP
//! participant satu subtree. Code path-nya sama untuk semua peran;
//! behavior hanya bercabang pada cek `is_root` / `is_leaf`.
//!
//! # Lifecycle
//!
//! ```text
//! Init ──► Announced ──► Committed ──► Challenged ──► Responded ──► Done
//!   │          │             │             │              │
//!   └──────────┴─────────────┴─────────────┴──────────────┴──► Aborted
//!                    (Stop broadcast atau timeout)
//! ```
//!
//! Transisi satu arah, tanpa loop. Satu instance menangani TEPAT satu
//! round; setelah `run()` selesai seluruh state (termasuk secret nonce)
//! dibuang.
//!
//! # Peran
//!
//! - **Subtree root**: pure forwarder antara orchestrator dan subleader.
//!   Commitment dari subleader diteruskan ke channel `sub_commitment`;
//!   jika subleader diam melebihi `subleader_timeout`, root menyiarkan
//!   Stop, memberi sinyal `subleader_not_responding`, lalu Aborted.
//! - **Subleader**: meneruskan Announcement ke leaves, mengumpulkan
//!   commitment/response mereka dengan deadline `leaves_timeout`,
//!   meng-aggregate bersama kontribusinya sendiri.
//! - **Leaf**: langsung mengirim commitment setelah Announcement
//!   (himpunan anak kosong), lalu response setelah Challenge.
//!
//! # Suspension Points
//!
//! Tepat empat, semuanya receive channel: menunggu Announcement,
//! Commitment(s), Challenge, Response(s). SETIAP receive di-select
//! terhadap Stop dan sebuah deadline timer: koleksi commitment/response
//! anak memakai `leaves_timeout`, commit subleader memakai
//! `subleader_timeout`, penantian Announcement memakai
//! `subleader_timeout` (attempt yang announcement-nya tidak kunjung
//! datang sudah ditinggalkan root), dan penantian Challenge/Response
//! memakai deadline round sebagai backstop. Deadline yang lewat membawa
//! node ke Aborted sehingga tidak ada task yang parkir selamanya.
//! Operasi crypto berjalan sampai selesai tanpa suspension.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::rngs::OsRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use dcsn_common::{
    aggregate_commitments, aggregate_responses, commit, response as cosi_response, CryptoError,
    Mask,
};

use crate::message::{
    Announcement, Challenge, Commitment, ProtocolMessage, Response, TreeNodeId,
};
use crate::orchestrator::SubtreeSpec;
use crate::roster::Roster;
use crate::transport::{LocalRouter, NodeChannels, Transport, TransportError};
use crate::tree::Tree;

// ════════════════════════════════════════════════════════════════════════════════
// NODE STATE
// ════════════════════════════════════════════════════════════════════════════════

/// State dalam lifecycle satu participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Belum menerima apa-apa.
    Init,
    /// Announcement diterima dan diteruskan.
    Announced,
    /// Commitment ter-aggregate sudah dikirim ke atas.
    Committed,
    /// Challenge diterima dan diteruskan.
    Challenged,
    /// Response ter-aggregate sudah dikirim ke atas.
    Responded,
    /// Round selesai untuk node ini.
    Done,
    /// Dihentikan oleh Stop atau timeout. Terminal.
    Aborted,
}

impl NodeState {
    /// Nama state sebagai string.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            NodeState::Init => "Init",
            NodeState::Announced => "Announced",
            NodeState::Committed => "Committed",
            NodeState::Challenged => "Challenged",
            NodeState::Responded => "Responded",
            NodeState::Done => "Done",
            NodeState::Aborted => "Aborted",
        }
    }

    /// `true` untuk state terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done | NodeState::Aborted)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SUBPROTOCOL ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error untuk kegagalan subprotocol.
#[derive(Debug, Clone, PartialEq)]
pub enum SubProtocolError {
    /// Subprotocol di-start tanpa proposal.
    MissingProposal,

    /// Subprotocol di-start dengan daftar public key kosong.
    EmptyPublics,

    /// Channel lawan bicara tertutup sebelum round selesai.
    ChannelClosed,

    /// Kegagalan transport; peer diperlakukan seperti tidak merespons.
    Transport(TransportError),

    /// Kegagalan kriptografis; fatal untuk round.
    Crypto(CryptoError),

    /// Anak yang sudah commit tidak mengirim response.
    MissingResponses {
        /// Jumlah response yang diharapkan.
        expected: usize,
        /// Jumlah response yang diterima.
        got: usize,
    },

    /// Jumlah secret tidak sejajar dengan roster.
    SecretCountMismatch {
        /// Ukuran roster.
        servers: usize,
        /// Jumlah secret yang diberikan.
        secrets: usize,
    },

    /// Local index menunjuk ke luar tree atau roster.
    UnknownMember {
        /// Index yang bermasalah.
        index: usize,
    },
}

impl fmt::Display for SubProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubProtocolError::MissingProposal => {
                write!(f, "subprotocol started without a proposal")
            }
            SubProtocolError::EmptyPublics => {
                write!(f, "subprotocol started with an empty public key list")
            }
            SubProtocolError::ChannelClosed => {
                write!(f, "channel closed before the round completed")
            }
            SubProtocolError::Transport(e) => write!(f, "transport failure: {}", e),
            SubProtocolError::Crypto(e) => write!(f, "crypto failure: {}", e),
            SubProtocolError::MissingResponses { expected, got } => {
                write!(
                    f,
                    "committed children stopped responding: expected {}, got {}",
                    expected, got
                )
            }
            SubProtocolError::SecretCountMismatch { servers, secrets } => {
                write!(
                    f,
                    "secret count {} does not match roster size {}",
                    secrets, servers
                )
            }
            SubProtocolError::UnknownMember { index } => {
                write!(f, "local index {} is not a tree member", index)
            }
        }
    }
}

impl std::error::Error for SubProtocolError {}

impl From<TransportError> for SubProtocolError {
    fn from(e: TransportError) -> Self {
        SubProtocolError::Transport(e)
    }
}

impl From<CryptoError> for SubProtocolError {
    fn from(e: CryptoError) -> Self {
        SubProtocolError::Crypto(e)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// ROOT LINK
// ════════════════════════════════════════════════════════════════════════════════

/// Channel set yang menghubungkan subtree root dengan orchestrator.
///
/// Hanya instance root yang memilikinya; arah orchestrator → root untuk
/// Announcement/Challenge/Stop, arah root → orchestrator untuk hasil.
struct RootLink {
    announcement_rx: mpsc::UnboundedReceiver<Announcement>,
    challenge_rx: mpsc::UnboundedReceiver<Challenge>,
    stop_rx: mpsc::UnboundedReceiver<()>,
    sub_commitment: mpsc::UnboundedSender<Commitment>,
    subleader_not_responding: mpsc::UnboundedSender<()>,
    sub_response: mpsc::UnboundedSender<Response>,
}

// ════════════════════════════════════════════════════════════════════════════════
// SUBTREE HANDLE
// ════════════════════════════════════════════════════════════════════════════════

/// Handle orchestrator atas satu subtree yang sedang berjalan.
///
/// Dibuat oleh factory; memegang sisi kirim untuk menggerakkan root dan
/// sisi terima untuk hasil subtree.
pub struct SubtreeHandle {
    /// Index subtree dalam round.
    pub subtree: u32,
    /// Nomor attempt (naik setiap failover).
    pub attempt: u32,
    /// Commitment ter-aggregate dari subtree.
    pub sub_commitment: mpsc::UnboundedReceiver<Commitment>,
    /// Sinyal subleader diam melebihi deadline.
    pub subleader_not_responding: mpsc::UnboundedReceiver<()>,
    /// Response ter-aggregate dari subtree.
    pub sub_response: mpsc::UnboundedReceiver<Response>,

    announcement_tx: mpsc::UnboundedSender<Announcement>,
    challenge_tx: mpsc::UnboundedSender<Challenge>,
    stop_tx: mpsc::UnboundedSender<()>,
    tasks: Vec<JoinHandle<Result<NodeState, SubProtocolError>>>,
}

impl SubtreeHandle {
    /// Mulai subtree dengan menyuntik Announcement ke root-nya.
    ///
    /// # Errors
    ///
    /// - `MissingProposal` untuk proposal kosong
    /// - `EmptyPublics` untuk daftar public key kosong
    /// - `ChannelClosed` jika root sudah berhenti
    pub fn start(
        &self,
        proposal: &[u8],
        publics: &[RistrettoPoint],
    ) -> Result<(), SubProtocolError> {
        if proposal.is_empty() {
            return Err(SubProtocolError::MissingProposal);
        }
        if publics.is_empty() {
            return Err(SubProtocolError::EmptyPublics);
        }
        self.announcement_tx
            .send(Announcement {
                proposal: proposal.to_vec(),
                publics: publics.to_vec(),
            })
            .map_err(|_| SubProtocolError::ChannelClosed)
    }

    /// Kirim Challenge ke subtree.
    pub fn challenge(&self, challenge: Challenge) -> Result<(), SubProtocolError> {
        self.challenge_tx
            .send(challenge)
            .map_err(|_| SubProtocolError::ChannelClosed)
    }

    /// Hentikan subtree. Idempotent: pemanggilan berulang tidak
    /// menimbulkan efek tambahan, dan mengirim ke root yang sudah
    /// berhenti bukan error.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// Clone sisi kirim Stop, untuk shutdown terpusat.
    #[must_use]
    pub fn stop_sender(&self) -> mpsc::UnboundedSender<()> {
        self.stop_tx.clone()
    }

    /// Tunggu seluruh task subtree selesai dan kumpulkan state akhirnya.
    pub async fn join(self) -> Vec<Result<NodeState, SubProtocolError>> {
        let mut states = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            match task.await {
                Ok(result) => states.push(result),
                Err(_) => states.push(Err(SubProtocolError::ChannelClosed)),
            }
        }
        states
    }
}

impl fmt::Debug for SubtreeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubtreeHandle")
            .field("subtree", &self.subtree)
            .field("attempt", &self.attempt)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SUBPROTOCOL NODE
// ════════════════════════════════════════════════════════════════════════════════

/// State machine satu participant dalam satu subtree attempt.
pub struct SubProtocolNode {
    tree: Arc<Tree>,
    roster: Arc<Roster>,
    subtree: u32,
    attempt: u32,
    local_index: usize,
    private: Scalar,
    transport: Arc<dyn Transport>,
    channels: NodeChannels,
    subleader_timeout: Duration,
    leaves_timeout: Duration,
    round_timeout: Duration,
    state: NodeState,
    link: Option<RootLink>,
}

impl SubProtocolNode {
    /// `true` jika node ini root subtree (local index 0).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.local_index == 0
    }

    /// `true` jika node ini leaf (tidak punya anak).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.tree
            .node(self.local_index)
            .map(|n| n.children.is_empty())
            .unwrap_or(true)
    }

    /// State saat ini.
    #[must_use]
    pub const fn state(&self) -> NodeState {
        self.state
    }

    /// Jalankan state machine sampai terminal, lalu lepaskan registrasi
    /// transport. Mengkonsumsi node: satu instance satu round.
    pub async fn run(mut self) -> Result<NodeState, SubProtocolError> {
        let id = self.node_id()?;
        let result = match self.link.take() {
            Some(link) => self.run_root(link).await,
            None => self.run_member().await,
        };
        self.transport.deregister(&id);
        match &result {
            Ok(state) => debug!(node = %id, state = state.name(), "subprotocol node finished"),
            Err(e) => warn!(node = %id, error = %e, "subprotocol node failed"),
        }
        result
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ADDRESSING
    // ────────────────────────────────────────────────────────────────────────────

    fn tree_node_id(&self, local: usize) -> Result<TreeNodeId, SubProtocolError> {
        let roster_index = self
            .tree
            .member(local)
            .ok_or(SubProtocolError::UnknownMember { index: local })?;
        let identity = self
            .roster
            .get(roster_index)
            .ok_or(SubProtocolError::UnknownMember { index: local })?;
        Ok(TreeNodeId::new(
            self.subtree,
            self.attempt,
            identity.id().clone(),
        ))
    }

    fn node_id(&self) -> Result<TreeNodeId, SubProtocolError> {
        self.tree_node_id(self.local_index)
    }

    fn children(&self) -> Vec<usize> {
        self.tree
            .node(self.local_index)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn parent(&self) -> Option<usize> {
        self.tree.node(self.local_index).and_then(|n| n.parent)
    }

    /// Roster index global milik node ini, untuk bit mask.
    fn roster_index(&self) -> Result<usize, SubProtocolError> {
        self.tree
            .member(self.local_index)
            .ok_or(SubProtocolError::UnknownMember {
                index: self.local_index,
            })
    }

    async fn send(
        &self,
        to_local: usize,
        message: ProtocolMessage,
    ) -> Result<(), SubProtocolError> {
        let from = self.node_id()?;
        let to = self.tree_node_id(to_local)?;
        self.transport.send_to(&from, &to, message).await?;
        Ok(())
    }

    /// Kirim ke arah anak: kegagalan diperlakukan seperti anak yang
    /// tidak merespons (deadline yang menanganinya), bukan error fatal.
    async fn send_to_child(&self, to_local: usize, message: ProtocolMessage) {
        if let Err(e) = self.send(to_local, message).await {
            warn!(child = to_local, error = %e, "send to child failed, treating it as unresponsive");
        }
    }

    /// Siarkan Stop ke seluruh anggota subtree. Best-effort: kegagalan
    /// per peer hanya dicatat.
    async fn broadcast_stop(&self) {
        let Ok(from) = self.node_id() else { return };
        for local in 1..self.tree.node_count() {
            if local == self.local_index {
                continue;
            }
            if let Ok(to) = self.tree_node_id(local) {
                if let Err(e) = self
                    .transport
                    .send_to(&from, &to, ProtocolMessage::Stop)
                    .await
                {
                    debug!(node = %from, peer = %to, error = %e, "stop broadcast failed");
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ROOT PATH (forwarder orchestrator ↔ subleader)
    // ────────────────────────────────────────────────────────────────────────────

    async fn run_root(&mut self, mut link: RootLink) -> Result<NodeState, SubProtocolError> {
        // ----- Announcement -----
        let round_deadline = Instant::now() + self.round_timeout;
        let announcement = tokio::select! {
            maybe = link.announcement_rx.recv() => match maybe {
                Some(a) => a,
                None => return Err(SubProtocolError::ChannelClosed),
            },
            _ = link.stop_rx.recv() => {
                self.broadcast_stop().await;
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
            _ = tokio::time::sleep_until(round_deadline) => {
                warn!(subtree = self.subtree, "round deadline expired before start");
                self.broadcast_stop().await;
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
        };
        self.state = NodeState::Announced;

        let children = self.children();
        if children.is_empty() {
            // Subtree degenerate tanpa anak: node ini satu-satunya
            // participant dan mengirim kontribusinya sendiri langsung.
            return self.run_degenerate_root(&mut link, &announcement).await;
        }

        let subleader = children[0];
        let subleader_id = self.tree_node_id(subleader)?;
        self.send_to_child(
            subleader,
            ProtocolMessage::Announcement(announcement.clone()),
        )
        .await;

        // ----- Commitment (deadline subleader) -----
        let deadline = Instant::now() + self.subleader_timeout;
        let commitment = loop {
            tokio::select! {
                maybe = self.channels.commitment.recv() => match maybe {
                    Some((from, c)) => {
                        if from == subleader_id {
                            break c;
                        }
                        warn!(peer = %from, "ignoring commitment from unexpected sender");
                    }
                    None => return Err(SubProtocolError::ChannelClosed),
                },
                _ = link.stop_rx.recv() => {
                    self.broadcast_stop().await;
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(subtree = self.subtree, attempt = self.attempt,
                        "subleader did not commit in time");
                    self.broadcast_stop().await;
                    let _ = link.subleader_not_responding.send(());
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
            }
        };
        self.state = NodeState::Committed;
        link.sub_commitment
            .send(commitment)
            .map_err(|_| SubProtocolError::ChannelClosed)?;

        // ----- Challenge -----
        // Backstop deadline round: failover subtree lain boleh memakan
        // waktu, tetapi melewati deadline round berarti round sudah mati
        let challenge = tokio::select! {
            maybe = link.challenge_rx.recv() => match maybe {
                Some(c) => c,
                None => return Err(SubProtocolError::ChannelClosed),
            },
            _ = link.stop_rx.recv() => {
                self.broadcast_stop().await;
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
            _ = tokio::time::sleep_until(round_deadline) => {
                warn!(subtree = self.subtree, "round deadline expired awaiting the challenge");
                self.broadcast_stop().await;
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
        };
        self.send_to_child(subleader, ProtocolMessage::Challenge(challenge))
            .await;
        self.state = NodeState::Challenged;

        // ----- Response -----
        // Setelah commit, subtree yang diam adalah kegagalan round yang
        // ditangani orchestrator; deadline round hanya backstop
        let response = loop {
            tokio::select! {
                maybe = self.channels.response.recv() => match maybe {
                    Some((from, r)) => {
                        if from == subleader_id {
                            break r;
                        }
                        warn!(peer = %from, "ignoring response from unexpected sender");
                    }
                    None => return Err(SubProtocolError::ChannelClosed),
                },
                _ = link.stop_rx.recv() => {
                    self.broadcast_stop().await;
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
                _ = tokio::time::sleep_until(round_deadline) => {
                    warn!(subtree = self.subtree, "round deadline expired awaiting the response");
                    self.broadcast_stop().await;
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
            }
        };
        self.state = NodeState::Responded;
        link.sub_response
            .send(response)
            .map_err(|_| SubProtocolError::ChannelClosed)?;

        // Bangunkan anggota yang tertinggal di luar mask (leaf yang tidak
        // sempat commit masih parkir menunggu announcement); idempotent
        self.broadcast_stop().await;

        self.state = NodeState::Done;
        Ok(NodeState::Done)
    }

    /// Root tanpa anak: berlaku sebagai participant tunggal subtree.
    async fn run_degenerate_root(
        &mut self,
        link: &mut RootLink,
        announcement: &Announcement,
    ) -> Result<NodeState, SubProtocolError> {
        let mut rng = OsRng;
        let (secret, own_commitment) = commit(&mut rng);
        let mut mask = Mask::new(&announcement.publics);
        mask.set_bit(self.roster_index()?, true)?;

        link.sub_commitment
            .send(Commitment {
                commitment: own_commitment,
                mask: mask.bytes().to_vec(),
            })
            .map_err(|_| SubProtocolError::ChannelClosed)?;
        self.state = NodeState::Committed;

        let round_deadline = Instant::now() + self.round_timeout;
        let challenge = tokio::select! {
            maybe = link.challenge_rx.recv() => match maybe {
                Some(c) => c,
                None => return Err(SubProtocolError::ChannelClosed),
            },
            _ = link.stop_rx.recv() => {
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
            _ = tokio::time::sleep_until(round_deadline) => {
                warn!(subtree = self.subtree, "round deadline expired awaiting the challenge");
                self.state = NodeState::Aborted;
                return Ok(NodeState::Aborted);
            }
        };
        self.state = NodeState::Challenged;

        let own_response = cosi_response(&self.private, &secret, &challenge.challenge);
        link.sub_response
            .send(Response {
                response: own_response,
            })
            .map_err(|_| SubProtocolError::ChannelClosed)?;
        self.state = NodeState::Responded;

        self.state = NodeState::Done;
        Ok(NodeState::Done)
    }

    // ────────────────────────────────────────────────────────────────────────────
    // MEMBER PATH (subleader & leaves)
    // ────────────────────────────────────────────────────────────────────────────

    async fn run_member(&mut self) -> Result<NodeState, SubProtocolError> {
        let Some(parent) = self.parent() else {
            return Err(SubProtocolError::UnknownMember {
                index: self.local_index,
            });
        };
        let parent_id = self.tree_node_id(parent)?;

        // ----- Announcement -----
        // Announcement yang tidak kunjung datang dalam window subleader
        // berarti attempt ini sudah ditinggalkan root
        let announce_deadline = Instant::now() + self.subleader_timeout;
        let announcement = loop {
            tokio::select! {
                maybe = self.channels.announcement.recv() => match maybe {
                    Some((from, a)) => {
                        if from == parent_id {
                            break a;
                        }
                        warn!(peer = %from, "ignoring announcement from unexpected sender");
                    }
                    None => return Err(SubProtocolError::ChannelClosed),
                },
                _ = self.channels.stop.recv() => {
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
                _ = tokio::time::sleep_until(announce_deadline) => {
                    debug!(
                        subtree = self.subtree,
                        local = self.local_index,
                        "no announcement before the deadline"
                    );
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
            }
        };
        self.state = NodeState::Announced;
        debug!(subtree = self.subtree, local = self.local_index, "received announcement");

        let children = self.children();
        for &child in &children {
            self.send_to_child(child, ProtocolMessage::Announcement(announcement.clone()))
                .await;
        }

        // ----- Commitment collection (deadline leaves) -----
        let mut child_ids = Vec::with_capacity(children.len());
        for &child in &children {
            child_ids.push((child, self.tree_node_id(child)?));
        }

        let mut child_commitments: Vec<(usize, Commitment)> = Vec::new();
        if !children.is_empty() {
            let deadline = Instant::now() + self.leaves_timeout;
            let mut seen: HashSet<usize> = HashSet::new();
            while seen.len() < children.len() {
                tokio::select! {
                    maybe = self.channels.commitment.recv() => match maybe {
                        Some((from, c)) => {
                            match child_ids.iter().find(|(_, id)| *id == from) {
                                Some((local, _)) if !seen.contains(local) => {
                                    seen.insert(*local);
                                    child_commitments.push((*local, c));
                                }
                                _ => warn!(peer = %from, "ignoring commitment from unexpected sender"),
                            }
                        }
                        None => return Err(SubProtocolError::ChannelClosed),
                    },
                    _ = self.channels.stop.recv() => {
                        self.state = NodeState::Aborted;
                        return Ok(NodeState::Aborted);
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        // Anak yang diam tertinggal di luar mask
                        warn!(
                            subtree = self.subtree,
                            missing = children.len() - seen.len(),
                            "leaf commitment deadline expired"
                        );
                        break;
                    }
                }
            }
        }

        // ----- Aggregate & kirim ke parent -----
        let mut rng = OsRng;
        let (secret, own_commitment) = commit(&mut rng);

        let mut mask = Mask::new(&announcement.publics);
        mask.set_bit(self.roster_index()?, true)?;

        let mut commitments = vec![own_commitment];
        for (_, c) in &child_commitments {
            commitments.push(c.commitment);
            mask.merge(&c.mask)?;
        }
        let aggregate = aggregate_commitments(&commitments);

        self.send(
            parent,
            ProtocolMessage::Commitment(Commitment {
                commitment: aggregate,
                mask: mask.bytes().to_vec(),
            }),
        )
        .await?;
        self.state = NodeState::Committed;

        // ----- Challenge -----
        // Backstop deadline round: challenge boleh datang terlambat
        // selama failover subtree lain, tetapi tidak melewati round
        let challenge_deadline = Instant::now() + self.round_timeout;
        let challenge = loop {
            tokio::select! {
                maybe = self.channels.challenge.recv() => match maybe {
                    Some((from, c)) => {
                        if from == parent_id {
                            break c;
                        }
                        warn!(peer = %from, "ignoring challenge from unexpected sender");
                    }
                    None => return Err(SubProtocolError::ChannelClosed),
                },
                _ = self.channels.stop.recv() => {
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
                _ = tokio::time::sleep_until(challenge_deadline) => {
                    warn!(
                        subtree = self.subtree,
                        local = self.local_index,
                        "round deadline expired awaiting the challenge"
                    );
                    self.state = NodeState::Aborted;
                    return Ok(NodeState::Aborted);
                }
            }
        };
        self.state = NodeState::Challenged;

        // Commitment yang datang setelah challenge tidak diterima lagi
        while let Ok((from, _)) = self.channels.commitment.try_recv() {
            warn!(peer = %from, "dropping commitment that arrived after the challenge");
        }

        // Challenge hanya diteruskan ke anak yang commit
        let committed: Vec<usize> = child_commitments.iter().map(|(local, _)| *local).collect();
        for &child in &committed {
            self.send_to_child(child, ProtocolMessage::Challenge(challenge.clone()))
                .await;
        }

        // ----- Response collection (deadline leaves) -----
        let mut child_responses: Vec<Response> = Vec::new();
        if !committed.is_empty() {
            let deadline = Instant::now() + self.leaves_timeout;
            let mut seen: HashSet<usize> = HashSet::new();
            while seen.len() < committed.len() {
                tokio::select! {
                    maybe = self.channels.response.recv() => match maybe {
                        Some((from, r)) => {
                            match child_ids.iter().find(|(_, id)| *id == from) {
                                Some((local, _))
                                    if committed.contains(local) && !seen.contains(local) =>
                                {
                                    seen.insert(*local);
                                    child_responses.push(r);
                                }
                                _ => warn!(peer = %from, "ignoring response from unexpected sender"),
                            }
                        }
                        None => return Err(SubProtocolError::ChannelClosed),
                    },
                    _ = self.channels.stop.recv() => {
                        self.state = NodeState::Aborted;
                        return Ok(NodeState::Aborted);
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        // Anak yang sudah commit WAJIB merespons; commitment-nya
                        // sudah ter-aggregate dan tidak bisa dikeluarkan lagi
                        return Err(SubProtocolError::MissingResponses {
                            expected: committed.len(),
                            got: seen.len(),
                        });
                    }
                }
            }
        }

        // ----- Aggregate response & kirim ke parent -----
        let own_response = cosi_response(&self.private, &secret, &challenge.challenge);
        let mut responses = vec![own_response];
        responses.extend(child_responses.iter().map(|r| r.response));
        let aggregate = aggregate_responses(&responses);

        self.send(
            parent,
            ProtocolMessage::Response(Response {
                response: aggregate,
            }),
        )
        .await?;
        self.state = NodeState::Responded;

        self.state = NodeState::Done;
        Ok(NodeState::Done)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// LOCAL PROTOCOL FACTORY
// ════════════════════════════════════════════════════════════════════════════════

/// Factory in-process: men-spawn seluruh participant satu subtree
/// sebagai tokio task di atas satu `LocalRouter`.
///
/// Dipakai service dan test harness; deployment multi-host tinggal
/// mengganti factory dengan implementasi yang hanya men-spawn node
/// lokal masing-masing host.
pub struct LocalProtocolFactory {
    router: Arc<LocalRouter>,
    roster: Arc<Roster>,
    secrets: Vec<Scalar>,
}

impl LocalProtocolFactory {
    /// Membuat factory baru.
    ///
    /// # Errors
    ///
    /// `SecretCountMismatch` jika jumlah secret tidak sama dengan ukuran
    /// roster.
    pub fn new(
        router: Arc<LocalRouter>,
        roster: Arc<Roster>,
        secrets: Vec<Scalar>,
    ) -> Result<Self, SubProtocolError> {
        if secrets.len() != roster.len() {
            return Err(SubProtocolError::SecretCountMismatch {
                servers: roster.len(),
                secrets: secrets.len(),
            });
        }
        Ok(Self {
            router,
            roster,
            secrets,
        })
    }

    /// Spawn seluruh participant untuk satu subtree attempt dan
    /// kembalikan handle root-nya.
    ///
    /// # Errors
    ///
    /// - `Transport` jika registrasi router gagal
    /// - `UnknownMember` jika tree menunjuk ke luar roster
    pub fn spawn_subtree(&self, spec: &SubtreeSpec) -> Result<SubtreeHandle, SubProtocolError> {
        let tree = Arc::clone(&spec.tree);

        let (announcement_tx, announcement_rx) = mpsc::unbounded_channel();
        let (challenge_tx, challenge_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();
        let (sub_commitment_tx, sub_commitment_rx) = mpsc::unbounded_channel();
        let (not_responding_tx, not_responding_rx) = mpsc::unbounded_channel();
        let (sub_response_tx, sub_response_rx) = mpsc::unbounded_channel();

        let mut link = Some(RootLink {
            announcement_rx,
            challenge_rx,
            stop_rx,
            sub_commitment: sub_commitment_tx,
            subleader_not_responding: not_responding_tx,
            sub_response: sub_response_tx,
        });

        let mut tasks = Vec::with_capacity(tree.node_count());
        for local in 0..tree.node_count() {
            let roster_index = tree
                .member(local)
                .ok_or(SubProtocolError::UnknownMember { index: local })?;
            let identity =
                self.roster
                    .get(roster_index)
                    .ok_or(SubProtocolError::UnknownMember {
                        index: roster_index,
                    })?;
            let id = TreeNodeId::new(spec.subtree, spec.attempt, identity.id().clone());
            let channels = self.router.register(id)?;

            let node = SubProtocolNode {
                tree: Arc::clone(&tree),
                roster: Arc::clone(&self.roster),
                subtree: spec.subtree,
                attempt: spec.attempt,
                local_index: local,
                private: self.secrets[roster_index],
                transport: Arc::clone(&self.router) as Arc<dyn Transport>,
                channels,
                subleader_timeout: spec.subleader_timeout,
                leaves_timeout: spec.leaves_timeout,
                round_timeout: spec.protocol_timeout,
                state: NodeState::Init,
                link: if local == 0 { link.take() } else { None },
            };
            tasks.push(tokio::spawn(node.run()));
        }

        Ok(SubtreeHandle {
            subtree: spec.subtree,
            attempt: spec.attempt,
            sub_commitment: sub_commitment_rx,
            subleader_not_responding: not_responding_rx,
            sub_response: sub_response_rx,
            announcement_tx,
            challenge_tx,
            stop_tx,
            tasks,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════
