//! # Tree Builder
//!
//! Module ini membangun subtree set untuk satu signing round: roster
//! berukuran N dipartisi menjadi K subtree seimbang yang berbagi root
//! yang sama (roster index 0).
//!
//! # Shape
//!
//! ```text
//!                 root (roster[0])
//!                   │
//!               subleader
//!              ┌────┼────┐
//!            leaf  leaf  leaf
//! ```
//!
//! Setiap subtree berkedalaman maksimal 2. Node di-alokasi dalam arena:
//! parent adalah `Option<usize>` ke index arena, sehingga tree trivially
//! serializable dan mudah diuji.
//!
//! # Partition
//!
//! Leaves dibagi serata mungkin: `⌊(N−1)/K'⌋` per subtree, dengan
//! `(N−1) mod K'` subtree pertama menerima satu leaf ekstra. Penugasan
//! deterministik: anggota diambil berurutan dari roster index 1 ke atas.

use serde::{Deserialize, Serialize};
use std::fmt;

use dcsn_common::ServerId;

use crate::roster::Roster;

// ════════════════════════════════════════════════════════════════════════════════
// TREE ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Error pembentukan tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Roster lebih pendek dari jumlah node yang diminta.
    RosterTooSmall {
        /// Jumlah node yang diminta.
        required: usize,
        /// Ukuran roster yang tersedia.
        available: usize,
    },

    /// Jumlah node tidak valid (harus >= 1).
    InvalidNodeCount {
        /// Nilai yang diminta.
        count: usize,
    },

    /// Jumlah subtree tidak valid (harus >= 1).
    InvalidSubtreeCount {
        /// Nilai yang diminta.
        count: usize,
    },

    /// Kandidat subleader bukan anggota subtree, atau adalah root.
    InvalidSubleader {
        /// Roster index yang diminta.
        index: usize,
    },

    /// Roster index berada di luar roster.
    NotInRoster {
        /// Roster index yang diminta.
        index: usize,
    },

    /// Subtree membutuhkan minimal root + satu anggota.
    TooFewMembers {
        /// Jumlah anggota yang diberikan.
        count: usize,
    },

    /// Subtree tidak memiliki subleader (single-node tree).
    MissingSubleader,
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::RosterTooSmall {
                required,
                available,
            } => write!(
                f,
                "tree needs {} nodes but the roster only has {}",
                required, available
            ),
            TreeError::InvalidNodeCount { count } => {
                write!(f, "node count must be at least 1, got {}", count)
            }
            TreeError::InvalidSubtreeCount { count } => {
                write!(f, "subtree count must be at least 1, got {}", count)
            }
            TreeError::InvalidSubleader { index } => {
                write!(f, "roster index {} cannot take the subleader role", index)
            }
            TreeError::NotInRoster { index } => {
                write!(f, "roster index {} is out of range", index)
            }
            TreeError::TooFewMembers { count } => {
                write!(f, "a subtree needs at least 2 members, got {}", count)
            }
            TreeError::MissingSubleader => {
                write!(f, "expected a subtree with a subleader, but found none")
            }
        }
    }
}

impl std::error::Error for TreeError {}

// ════════════════════════════════════════════════════════════════════════════════
// TREE NODE
// ════════════════════════════════════════════════════════════════════════════════

/// Satu node dalam arena tree.
///
/// `roster_index` menunjuk ke roster global; `parent` dan `children`
/// menunjuk ke index arena lokal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Index server ini dalam roster global.
    pub roster_index: usize,
    /// Index arena parent; `None` untuk root.
    pub parent: Option<usize>,
    /// Index arena anak-anak, terurut.
    pub children: Vec<usize>,
}

// ════════════════════════════════════════════════════════════════════════════════
// TREE
// ════════════════════════════════════════════════════════════════════════════════

/// Satu subtree: root + subleader + leaves, arena-allocated.
///
/// Local index 0 adalah root, index 1 subleader (jika ada), index 2..M
/// leaves. Urutan local index sekaligus menjadi "local roster" subtree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    /// Bangun tree dari daftar roster index; `members[0]` menjadi root,
    /// `members[1]` subleader, sisanya leaves.
    fn build(members: &[usize]) -> Self {
        let mut nodes = Vec::with_capacity(members.len());
        nodes.push(TreeNode {
            roster_index: members[0],
            parent: None,
            children: if members.len() > 1 { vec![1] } else { vec![] },
        });
        if members.len() > 1 {
            nodes.push(TreeNode {
                roster_index: members[1],
                parent: Some(0),
                children: (2..members.len()).collect(),
            });
            for &roster_index in &members[2..] {
                nodes.push(TreeNode {
                    roster_index,
                    parent: Some(1),
                    children: vec![],
                });
            }
        }
        Self { nodes }
    }

    // ────────────────────────────────────────────────────────────────────────────
    // ACCESSORS
    // ────────────────────────────────────────────────────────────────────────────

    /// Node root (local index 0).
    #[must_use]
    pub fn root(&self) -> &TreeNode {
        &self.nodes[0]
    }

    /// Node pada local index.
    #[must_use]
    pub fn node(&self, local: usize) -> Option<&TreeNode> {
        self.nodes.get(local)
    }

    /// Jumlah node dalam subtree (termasuk root).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Node subleader (local index 1), jika ada.
    #[must_use]
    pub fn subleader(&self) -> Option<&TreeNode> {
        self.nodes.get(1)
    }

    /// Node leaves (local index 2..M).
    #[must_use]
    pub fn leaves(&self) -> &[TreeNode] {
        if self.nodes.len() > 2 {
            &self.nodes[2..]
        } else {
            &[]
        }
    }

    /// Roster index untuk local index.
    #[must_use]
    pub fn member(&self, local: usize) -> Option<usize> {
        self.nodes.get(local).map(|n| n.roster_index)
    }

    /// Seluruh roster index anggota, urutan local.
    #[must_use]
    pub fn members(&self) -> Vec<usize> {
        self.nodes.iter().map(|n| n.roster_index).collect()
    }

    /// `true` jika roster index adalah anggota subtree ini.
    #[must_use]
    pub fn contains(&self, roster_index: usize) -> bool {
        self.nodes.iter().any(|n| n.roster_index == roster_index)
    }

    /// Local index untuk roster index.
    #[must_use]
    pub fn local_index_of(&self, roster_index: usize) -> Option<usize> {
        self.nodes.iter().position(|n| n.roster_index == roster_index)
    }

    /// Kedalaman tree: 0 untuk single node, 1 tanpa leaves, 2 lengkap.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self.nodes.len() {
            1 => 0,
            2 => 1,
            _ => 2,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TREE GENERATION
// ════════════════════════════════════════════════════════════════════════════════

/// Bangun K' subtree seimbang untuk `n_nodes` signer pertama dari roster.
///
/// K' = min(`n_subtrees`, `n_nodes` − 1); untuk `n_nodes` == 1 hasilnya
/// satu tree berisi root saja. Leaves dibagi rata dengan sisa
/// didistribusikan ke subtree-subtree awal.
///
/// # Errors
///
/// - `InvalidNodeCount` / `InvalidSubtreeCount` untuk parameter nol
/// - `RosterTooSmall` jika roster lebih pendek dari `n_nodes`
pub fn gen_trees(
    roster: &Roster,
    n_nodes: usize,
    n_subtrees: usize,
) -> Result<Vec<Tree>, TreeError> {
    if n_nodes < 1 {
        return Err(TreeError::InvalidNodeCount { count: n_nodes });
    }
    if n_subtrees < 1 {
        return Err(TreeError::InvalidSubtreeCount { count: n_subtrees });
    }
    if roster.len() < n_nodes {
        return Err(TreeError::RosterTooSmall {
            required: n_nodes,
            available: roster.len(),
        });
    }

    if n_nodes == 1 {
        return Ok(vec![Tree::build(&[0])]);
    }

    let k = n_subtrees.min(n_nodes - 1);
    let per_subtree = (n_nodes - 1) / k;
    let surplus = (n_nodes - 1) % k;

    let mut trees = Vec::with_capacity(k);
    let mut start = 1;
    for i in 0..k {
        let mut end = start + per_subtree;
        if i < surplus {
            end += 1;
        }
        let mut members = Vec::with_capacity(end - start + 1);
        members.push(0);
        members.extend(start..end);
        trees.push(Tree::build(&members));
        start = end;
    }
    Ok(trees)
}

/// Bangun ulang SATU subtree dengan peran subleader dirotasi ke anggota
/// lain.
///
/// `members` adalah daftar roster index subtree lama (termasuk root di
/// posisi 0); `new_subleader` harus salah satu anggota non-root. Anggota
/// lain (termasuk subleader lama, yang turun menjadi leaf) tetap pada
/// urutan roster semula.
///
/// # Errors
///
/// - `TooFewMembers` jika subtree tidak punya anggota non-root
/// - `NotInRoster` jika ada index di luar roster
/// - `InvalidSubleader` jika kandidat bukan anggota atau adalah root
pub fn gen_subtree(
    roster: &Roster,
    members: &[usize],
    new_subleader: usize,
) -> Result<Tree, TreeError> {
    if members.len() < 2 {
        return Err(TreeError::TooFewMembers {
            count: members.len(),
        });
    }
    for &index in members {
        if index >= roster.len() {
            return Err(TreeError::NotInRoster { index });
        }
    }
    if new_subleader == members[0] || !members.contains(&new_subleader) {
        return Err(TreeError::InvalidSubleader {
            index: new_subleader,
        });
    }

    let mut reordered = Vec::with_capacity(members.len());
    reordered.push(members[0]);
    reordered.push(new_subleader);
    reordered.extend(members[1..].iter().filter(|&&m| m != new_subleader));
    Ok(Tree::build(&reordered))
}

// ════════════════════════════════════════════════════════════════════════════════
// ROLE PREDICTION HELPERS
// ════════════════════════════════════════════════════════════════════════════════

/// Hitung `ServerId` para subleader untuk konfigurasi (N, K) TANPA
/// menjalankan protocol. Dipakai orchestrator untuk menarget retry dan
/// test untuk menyuntik fault.
pub fn subleader_ids(
    roster: &Roster,
    n_nodes: usize,
    n_subtrees: usize,
) -> Result<Vec<ServerId>, TreeError> {
    let trees = gen_trees(roster, n_nodes, n_subtrees)?;
    let mut ids = Vec::with_capacity(trees.len());
    for tree in &trees {
        let subleader = tree.subleader().ok_or(TreeError::MissingSubleader)?;
        let identity = roster
            .get(subleader.roster_index)
            .ok_or(TreeError::NotInRoster {
                index: subleader.roster_index,
            })?;
        ids.push(identity.id().clone());
    }
    Ok(ids)
}

/// Hitung `ServerId` seluruh leaf untuk konfigurasi (N, K), urutan
/// subtree lalu urutan roster.
pub fn leaf_ids(
    roster: &Roster,
    n_nodes: usize,
    n_subtrees: usize,
) -> Result<Vec<ServerId>, TreeError> {
    let trees = gen_trees(roster, n_nodes, n_subtrees)?;
    let mut ids = Vec::new();
    for tree in &trees {
        if tree.subleader().is_none() {
            return Err(TreeError::MissingSubleader);
        }
        for leaf in tree.leaves() {
            let identity = roster.get(leaf.roster_index).ok_or(TreeError::NotInRoster {
                index: leaf.roster_index,
            })?;
            ids.push(identity.id().clone());
        }
    }
    Ok(ids)
}

// ════════════════════════════════════════════════════════════════════════════════
// UNIT TESTS
// ════════════════════════════════════════════════════════════════════════════════
