//! # Transport Adapter
//!
//! Module ini menyediakan abstraction layer untuk komunikasi antar tree
//! node dalam satu process.
//!
//! # Types
//!
//! | Type | Fungsi |
//! |------|--------|
//! | `Transport` | Async trait untuk pengiriman pesan point-to-point |
//! | `TransportError` | Error type untuk kegagalan transport |
//! | `LocalRouter` | In-memory router dengan typed channels |
//! | `NodeChannels` | Set receiver ber-tipe milik satu node |
//! | `FaultFilter` | Hook untuk menjatuhkan pesan dalam testing |
//!
//! # Registry
//!
//! Router memegang typed registry eksplisit: registrasi sebuah
//! `TreeNodeId` menghasilkan `NodeChannels` (satu unbounded mpsc per
//! jenis pesan), dan router men-demultiplex `ProtocolMessage` ke channel
//! yang sesuai berdasarkan discriminator-nya. Tidak ada registry global
//! process-wide.
//!
//! # Guarantees
//!
//! - FIFO per edge (jaminan ordering mpsc)
//! - Send ke node tak terdaftar = `PeerNotFound`; caller memperlakukan
//!   kegagalan kirim sama seperti peer yang tidak merespons
//! - `shutdown()` menjatuhkan seluruh sender sehingga setiap receiver
//!   yang menunggu langsung terbangun

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::message::{
    Announcement, Challenge, Commitment, ProtocolMessage, Response, TreeNodeId,
};

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error untuk operasi transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Node tujuan tidak terdaftar.
    PeerNotFound {
        /// Node yang tidak ditemukan.
        peer: TreeNodeId,
    },

    /// Channel node tujuan sudah ditutup.
    ChannelClosed {
        /// Node yang channel-nya tertutup.
        peer: TreeNodeId,
    },

    /// Node sudah terdaftar sebelumnya.
    AlreadyRegistered {
        /// Node yang duplikat.
        peer: TreeNodeId,
    },

    /// Router sudah shutdown.
    Shutdown,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::PeerNotFound { peer } => {
                write!(f, "peer not found: {}", peer)
            }
            TransportError::ChannelClosed { peer } => {
                write!(f, "channel closed for peer: {}", peer)
            }
            TransportError::AlreadyRegistered { peer } => {
                write!(f, "peer already registered: {}", peer)
            }
            TransportError::Shutdown => {
                write!(f, "router has been shut down")
            }
        }
    }
}

impl std::error::Error for TransportError {}

// ════════════════════════════════════════════════════════════════════════════════
// NODE CHANNELS
// ════════════════════════════════════════════════════════════════════════════════

/// Set receiver ber-tipe milik satu tree node.
///
/// Satu channel per jenis pesan; state machine node membaca channel yang
/// relevan sesuai fase sehingga pesan fase lain tidak tercampur.
pub struct NodeChannels {
    /// Announcement dari parent.
    pub announcement: mpsc::UnboundedReceiver<(TreeNodeId, Announcement)>,
    /// Commitment dari children.
    pub commitment: mpsc::UnboundedReceiver<(TreeNodeId, Commitment)>,
    /// Challenge dari parent.
    pub challenge: mpsc::UnboundedReceiver<(TreeNodeId, Challenge)>,
    /// Response dari children.
    pub response: mpsc::UnboundedReceiver<(TreeNodeId, Response)>,
    /// Stop broadcast dari subtree root.
    pub stop: mpsc::UnboundedReceiver<TreeNodeId>,
}

/// Sisi sender dari `NodeChannels`, dipegang router.
struct NodeSenders {
    announcement: mpsc::UnboundedSender<(TreeNodeId, Announcement)>,
    commitment: mpsc::UnboundedSender<(TreeNodeId, Commitment)>,
    challenge: mpsc::UnboundedSender<(TreeNodeId, Challenge)>,
    response: mpsc::UnboundedSender<(TreeNodeId, Response)>,
    stop: mpsc::UnboundedSender<TreeNodeId>,
}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════════

/// Async trait untuk pengiriman pesan antar tree node.
///
/// Object-safe; node memegang `Arc<dyn Transport>`. Implementasi HARUS
/// `Send + Sync` dengan interior mutability.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Kirim pesan ke node tujuan.
    ///
    /// # Errors
    ///
    /// - `PeerNotFound` jika tujuan tidak terdaftar
    /// - `ChannelClosed` jika tujuan sudah menutup channel
    /// - `Shutdown` jika router sudah shutdown
    async fn send_to(
        &self,
        from: &TreeNodeId,
        to: &TreeNodeId,
        message: ProtocolMessage,
    ) -> Result<(), TransportError>;

    /// Lepaskan registrasi sebuah node. Idempotent.
    fn deregister(&self, id: &TreeNodeId);

    /// `true` jika transport sudah shutdown.
    fn is_shutdown(&self) -> bool;
}

// ════════════════════════════════════════════════════════════════════════════════
// FAULT FILTER
// ════════════════════════════════════════════════════════════════════════════════

/// Hook testing: `(from, to, message_type)` → `true` berarti pesan
/// dijatuhkan diam-diam, seolah hilang di network.
pub type FaultFilter = Arc<dyn Fn(&TreeNodeId, &TreeNodeId, &'static str) -> bool + Send + Sync>;

// ════════════════════════════════════════════════════════════════════════════════
// LOCAL ROUTER
// ════════════════════════════════════════════════════════════════════════════════

/// In-memory router untuk deployment satu process dan testing.
///
/// # Thread Safety
///
/// - Registry dilindungi `parking_lot::RwLock`
/// - Flag shutdown adalah `AtomicBool`
/// - Send bersifat non-blocking (unbounded channels)
pub struct LocalRouter {
    nodes: RwLock<HashMap<TreeNodeId, NodeSenders>>,
    filter: RwLock<Option<FaultFilter>>,
    shutdown: AtomicBool,
}

impl LocalRouter {
    /// Membuat router kosong.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            filter: RwLock::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Daftarkan sebuah tree node dan terima channel set-nya.
    ///
    /// # Errors
    ///
    /// - `AlreadyRegistered` jika id sudah terdaftar
    /// - `Shutdown` jika router sudah shutdown
    pub fn register(&self, id: TreeNodeId) -> Result<NodeChannels, TransportError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        let (announcement_tx, announcement_rx) = mpsc::unbounded_channel();
        let (commitment_tx, commitment_rx) = mpsc::unbounded_channel();
        let (challenge_tx, challenge_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = mpsc::unbounded_channel();

        let mut nodes = self.nodes.write();
        if nodes.contains_key(&id) {
            return Err(TransportError::AlreadyRegistered { peer: id });
        }
        nodes.insert(
            id,
            NodeSenders {
                announcement: announcement_tx,
                commitment: commitment_tx,
                challenge: challenge_tx,
                response: response_tx,
                stop: stop_tx,
            },
        );

        Ok(NodeChannels {
            announcement: announcement_rx,
            commitment: commitment_rx,
            challenge: challenge_rx,
            response: response_rx,
            stop: stop_rx,
        })
    }

    /// Pasang fault filter untuk testing.
    pub fn set_fault_filter(&self, filter: FaultFilter) {
        *self.filter.write() = Some(filter);
    }

    /// Lepas fault filter.
    pub fn clear_fault_filter(&self) {
        *self.filter.write() = None;
    }

    /// Jumlah node yang terdaftar saat ini.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Suntik pesan langsung ke inbox sebuah node, melewati fault
    /// filter. Dipakai orchestrator untuk self-injection announcement
    /// dan oleh test.
    pub fn inject(
        &self,
        to: &TreeNodeId,
        from: TreeNodeId,
        message: ProtocolMessage,
    ) -> Result<(), TransportError> {
        self.deliver(from, to, message, false)
    }

    /// Shutdown router: seluruh sender dijatuhkan sehingga receiver yang
    /// menunggu langsung terbangun dengan `None`.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.nodes.write().clear();
    }

    fn deliver(
        &self,
        from: TreeNodeId,
        to: &TreeNodeId,
        message: ProtocolMessage,
        apply_filter: bool,
    ) -> Result<(), TransportError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(TransportError::Shutdown);
        }

        if apply_filter {
            let filter = self.filter.read();
            if let Some(filter) = filter.as_ref() {
                if filter(&from, to, message.message_type()) {
                    // Pesan "hilang di network": sukses dari sisi pengirim
                    return Ok(());
                }
            }
        }

        let nodes = self.nodes.read();
        let senders = nodes.get(to).ok_or_else(|| TransportError::PeerNotFound {
            peer: to.clone(),
        })?;

        let closed = match message {
            ProtocolMessage::Announcement(a) => senders.announcement.send((from, a)).is_err(),
            ProtocolMessage::Commitment(c) => senders.commitment.send((from, c)).is_err(),
            ProtocolMessage::Challenge(c) => senders.challenge.send((from, c)).is_err(),
            ProtocolMessage::Response(r) => senders.response.send((from, r)).is_err(),
            ProtocolMessage::Stop => senders.stop.send(from).is_err(),
        };
        if closed {
            return Err(TransportError::ChannelClosed { peer: to.clone() });
        }
        Ok(())
    }
}

impl Default for LocalRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalRouter")
            .field("registered", &self.registered_count())
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl Transport for LocalRouter {
    async fn send_to(
        &self,
        from: &TreeNodeId,
        to: &TreeNodeId,
        message: ProtocolMessage,
    ) -> Result<(), TransportError> {
        self.deliver(from.clone(), to, message, true)
    }

    fn deregister(&self, id: &TreeNodeId) {
        self.nodes.write().remove(id);
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use dcsn_common::ServerId;

    fn make_id(seed: u8) -> TreeNodeId {
        TreeNodeId::new(0, 0, ServerId::from_bytes([seed; 32]))
    }

    fn make_challenge() -> ProtocolMessage {
        ProtocolMessage::Challenge(Challenge {
            challenge: curve25519_dalek::scalar::Scalar::from(7u64),
        })
    }

    #[tokio::test]
    async fn test_register_send_receive() {
        let router = LocalRouter::new();
        let sender = make_id(0x01);
        let receiver = make_id(0x02);
        let mut channels = router.register(receiver.clone()).unwrap();

        router
            .send_to(&sender, &receiver, make_challenge())
            .await
            .unwrap();

        let (from, challenge) = channels.challenge.recv().await.unwrap();
        assert_eq!(from, sender);
        assert_eq!(
            challenge.challenge,
            curve25519_dalek::scalar::Scalar::from(7u64)
        );
    }

    #[tokio::test]
    async fn test_demux_by_message_type() {
        let router = LocalRouter::new();
        let sender = make_id(0x01);
        let receiver = make_id(0x02);
        let mut channels = router.register(receiver.clone()).unwrap();

        router
            .send_to(&sender, &receiver, ProtocolMessage::Stop)
            .await
            .unwrap();
        router
            .send_to(&sender, &receiver, make_challenge())
            .await
            .unwrap();

        // Stop dan Challenge mendarat di channel berbeda
        assert_eq!(channels.stop.recv().await.unwrap(), sender);
        assert!(channels.challenge.recv().await.is_some());
        assert!(channels.announcement.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fifo_per_edge() {
        let router = LocalRouter::new();
        let sender = make_id(0x01);
        let receiver = make_id(0x02);
        let mut channels = router.register(receiver.clone()).unwrap();

        for i in 0..5u64 {
            let msg = ProtocolMessage::Challenge(Challenge {
                challenge: curve25519_dalek::scalar::Scalar::from(i),
            });
            router.send_to(&sender, &receiver, msg).await.unwrap();
        }
        for i in 0..5u64 {
            let (_, challenge) = channels.challenge.recv().await.unwrap();
            assert_eq!(
                challenge.challenge,
                curve25519_dalek::scalar::Scalar::from(i)
            );
        }
    }

    #[tokio::test]
    async fn test_send_to_unregistered_peer() {
        let router = LocalRouter::new();
        let result = router
            .send_to(&make_id(0x01), &make_id(0x09), make_challenge())
            .await;
        assert!(matches!(result, Err(TransportError::PeerNotFound { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let router = LocalRouter::new();
        let id = make_id(0x01);
        let _channels = router.register(id.clone()).unwrap();
        let result = router.register(id);
        assert!(matches!(
            result,
            Err(TransportError::AlreadyRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_deregister_idempotent() {
        let router = LocalRouter::new();
        let id = make_id(0x01);
        let _channels = router.register(id.clone()).unwrap();
        assert_eq!(router.registered_count(), 1);

        router.deregister(&id);
        router.deregister(&id);
        assert_eq!(router.registered_count(), 0);
    }

    #[tokio::test]
    async fn test_fault_filter_drops_silently() {
        let router = LocalRouter::new();
        let sender = make_id(0x01);
        let receiver = make_id(0x02);
        let mut channels = router.register(receiver.clone()).unwrap();

        let blocked = sender.server.clone();
        router.set_fault_filter(Arc::new(move |from, _to, _kind| from.server == blocked));

        // Drop terlihat sukses dari sisi pengirim
        router
            .send_to(&sender, &receiver, make_challenge())
            .await
            .unwrap();
        assert!(channels.challenge.try_recv().is_err());

        // Setelah filter dilepas pesan mengalir lagi
        router.clear_fault_filter();
        router
            .send_to(&sender, &receiver, make_challenge())
            .await
            .unwrap();
        assert!(channels.challenge.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_inject_bypasses_filter() {
        let router = LocalRouter::new();
        let sender = make_id(0x01);
        let receiver = make_id(0x02);
        let mut channels = router.register(receiver.clone()).unwrap();

        router.set_fault_filter(Arc::new(|_, _, _| true));
        router
            .inject(&receiver, sender.clone(), make_challenge())
            .unwrap();

        let (from, _) = channels.challenge.recv().await.unwrap();
        assert_eq!(from, sender);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiting_receivers() {
        let router = Arc::new(LocalRouter::new());
        let mut channels = router.register(make_id(0x01)).unwrap();

        let waiter = tokio::spawn(async move { channels.announcement.recv().await });

        router.shutdown();
        let received = waiter.await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_operations() {
        let router = LocalRouter::new();
        router.shutdown();
        assert!(router.is_shutdown());

        assert!(matches!(
            router.register(make_id(0x01)),
            Err(TransportError::Shutdown)
        ));
        let result = router
            .send_to(&make_id(0x01), &make_id(0x02), ProtocolMessage::Stop)
            .await;
        assert!(matches!(result, Err(TransportError::Shutdown)));
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::PeerNotFound {
            peer: make_id(0xAA),
        };
        assert!(err.to_string().contains("peer not found"));
        assert!(TransportError::Shutdown.to_string().contains("shut down"));
    }

    #[test]
    fn test_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LocalRouter>();
        assert_send_sync::<TransportError>();
    }
}
