//! Compact sparse Merkle index.
//!
//! Each peer keeps a hash tree over the keys it stores so that two replicas
//! can compare databases cheaply: equal root hashes mean equal key sets,
//! and a mismatch can be narrowed by walking subtrees instead of shipping
//! key lists.
//!
//! The tree is the compact sparse variant: its shape is a function of the
//! key set alone. A new key descends from the root by XOR distance
//! (`floor(log2(a XOR b))`) to each subtree's representative key, always
//! into the nearer subtree; on a tie the key diverges from both subtrees
//! above this level, so it becomes a sibling of the whole node, placed on
//! the left iff it orders below the lesser sibling. Every subtree holds a
//! contiguous bit-prefix of the keyspace, so any leaf of the subtree gives
//! the same distance; we carry the maximum. Inserting the same keys in any
//! order therefore builds the same tree, which is what makes root-hash
//! comparison meaningful.
//!
//! Internal nodes own both children by value ([`Box`]), so "every internal
//! node has two non-empty subtrees" is a structural invariant rather than a
//! runtime check. Internal hashes are the name-hash of the concatenated
//! child hex renderings.

use anyhow::{bail, Result};
use serde_json::{json, Value};

use crate::key::Key;

/// A node of the index: a leaf holding a stored key, or an internal node
/// whose hash commits to both children.
#[derive(Debug, Clone, PartialEq)]
pub enum MerkleNode {
    Leaf(Key),
    Internal {
        hash: Key,
        /// Largest key stored under this node; the subtree's representative
        /// for the distance descent.
        max_key: Key,
        left: Box<MerkleNode>,
        right: Box<MerkleNode>,
    },
}

impl MerkleNode {
    /// The hash this node commits to: the key itself for a leaf, the
    /// concatenation hash for an internal node.
    pub fn hash(&self) -> &Key {
        match self {
            MerkleNode::Leaf(key) => key,
            MerkleNode::Internal { hash, .. } => hash,
        }
    }

    fn max_key(&self) -> &Key {
        match self {
            MerkleNode::Leaf(key) => key,
            MerkleNode::Internal { max_key, .. } => max_key,
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self, MerkleNode::Leaf(_))
    }

    /// Build an internal node over two subtrees, hashing their hashes.
    fn internal(left: Box<MerkleNode>, right: Box<MerkleNode>) -> Box<MerkleNode> {
        let hash = concat_hash(left.hash(), right.hash());
        let max_key = left.max_key().max(right.max_key()).clone();
        Box::new(MerkleNode::Internal { hash, max_key, left, right })
    }

    fn leaf(key: Key) -> Box<MerkleNode> {
        Box::new(MerkleNode::Leaf(key))
    }

    fn insert(node: Box<MerkleNode>, key: &Key) -> Box<MerkleNode> {
        match *node {
            MerkleNode::Leaf(existing) => Self::insert_at_leaf(existing, key),
            MerkleNode::Internal { left, right, .. } => {
                let left_dist = key.distance(left.max_key());
                let right_dist = key.distance(right.max_key());

                if left_dist == right_dist {
                    // Equidistant: the key splits off above this node and
                    // becomes a sibling of it, on the side it orders on.
                    let lesser = left.max_key().min(right.max_key()).clone();
                    let rebuilt = Self::internal(left, right);
                    if *key < lesser {
                        Self::internal(Self::leaf(key.clone()), rebuilt)
                    } else {
                        Self::internal(rebuilt, Self::leaf(key.clone()))
                    }
                } else if left_dist < right_dist {
                    Self::internal(Self::insert(left, key), right)
                } else {
                    Self::internal(left, Self::insert(right, key))
                }
            }
        }
    }

    /// Pair an existing leaf with the new key under a fresh parent, children
    /// in key order. Inserting a key already present is a no-op.
    fn insert_at_leaf(existing: Key, key: &Key) -> Box<MerkleNode> {
        if *key < existing {
            Self::internal(Self::leaf(key.clone()), Self::leaf(existing))
        } else if *key > existing {
            Self::internal(Self::leaf(existing), Self::leaf(key.clone()))
        } else {
            Self::leaf(existing)
        }
    }

    fn delete(node: Box<MerkleNode>, key: &Key) -> Box<MerkleNode> {
        match *node {
            // A lone non-matching leaf is left alone; the matching-root case
            // is handled by the index wrapper.
            MerkleNode::Leaf(existing) => Self::leaf(existing),
            MerkleNode::Internal { left, right, .. } => {
                // A matching leaf child is removed by promoting its sibling.
                if left.is_leaf() && left.hash() == key {
                    return right;
                }
                if right.is_leaf() && right.hash() == key {
                    return left;
                }

                let left_dist = key.distance(left.max_key());
                let right_dist = key.distance(right.max_key());

                if left_dist == right_dist {
                    // The insertion descent could never have reached below
                    // here, so the key is absent.
                    Self::internal(left, right)
                } else if left_dist < right_dist {
                    Self::internal(Self::delete(left, key), right)
                } else {
                    Self::internal(left, Self::delete(right, key))
                }
            }
        }
    }

    /// Retrace the insertion descent; the key is present iff the descent
    /// ends at a leaf carrying it.
    fn contains(&self, key: &Key) -> bool {
        match self {
            MerkleNode::Leaf(existing) => existing == key,
            MerkleNode::Internal { left, right, .. } => {
                if left.is_leaf() && left.hash() == key {
                    return true;
                }
                if right.is_leaf() && right.hash() == key {
                    return true;
                }

                let left_dist = key.distance(left.max_key());
                let right_dist = key.distance(right.max_key());
                if left_dist < right_dist {
                    left.contains(key)
                } else if right_dist < left_dist {
                    right.contains(key)
                } else {
                    false
                }
            }
        }
    }

    /// Recursive JSON form: `HASH` plus `LEFT`/`RIGHT` for internal nodes.
    pub fn to_json(&self) -> Value {
        match self {
            MerkleNode::Leaf(key) => json!({ "HASH": key.to_hex() }),
            MerkleNode::Internal { hash, left, right, .. } => json!({
                "HASH": hash.to_hex(),
                "LEFT": left.to_json(),
                "RIGHT": right.to_json(),
            }),
        }
    }

    /// Parse the JSON form back into a tree.
    pub fn from_json(value: &Value) -> Result<Box<MerkleNode>> {
        let hash = value
            .get("HASH")
            .and_then(Value::as_str)
            .and_then(Key::from_hex);
        let Some(hash) = hash else {
            bail!("merkle node without a valid HASH: {value}");
        };

        match (value.get("LEFT"), value.get("RIGHT")) {
            (None, None) => Ok(Self::leaf(hash)),
            (Some(left), Some(right)) => {
                let left = Self::from_json(left)?;
                let right = Self::from_json(right)?;
                let max_key = left.max_key().max(right.max_key()).clone();
                Ok(Box::new(MerkleNode::Internal { hash, max_key, left, right }))
            }
            _ => bail!("merkle node with exactly one child: {value}"),
        }
    }
}

/// Hash of the concatenated hex renderings of two hashes.
fn concat_hash(left: &Key, right: &Key) -> Key {
    Key::from_plaintext(&format!("{}{}", left.to_hex(), right.to_hex()))
}

/// The index proper: an optional root plus the operations the database and
/// the synchronization protocol need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MerkleIndex {
    root: Option<Box<MerkleNode>>,
}

impl MerkleIndex {
    pub fn new() -> MerkleIndex {
        MerkleIndex::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Hash of the whole key set; equal hashes mean equal sets.
    pub fn root_hash(&self) -> Option<&Key> {
        self.root.as_deref().map(MerkleNode::hash)
    }

    pub fn insert(&mut self, key: &Key) {
        self.root = Some(match self.root.take() {
            Some(root) => MerkleNode::insert(root, key),
            None => MerkleNode::leaf(key.clone()),
        });
    }

    pub fn delete(&mut self, key: &Key) {
        match self.root.take() {
            None => {}
            Some(root) => {
                if root.is_leaf() && root.hash() == key {
                    // Removed the last key.
                } else {
                    self.root = Some(MerkleNode::delete(root, key));
                }
            }
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.root.as_ref().is_some_and(|root| root.contains(key))
    }

    /// The node at a path of directions from the root, `0` descending left
    /// and any other value descending right.
    pub fn position(&self, directions: &[u8]) -> Option<&MerkleNode> {
        let mut current = self.root.as_deref()?;
        for direction in directions {
            current = match current {
                MerkleNode::Leaf(_) => return None,
                MerkleNode::Internal { left, right, .. } => {
                    if *direction == 0 {
                        left.as_ref()
                    } else {
                        right.as_ref()
                    }
                }
            };
        }
        Some(current)
    }

    /// Drop the whole tree.
    pub fn clear(&mut self) {
        self.root = None;
    }

    pub fn to_json(&self) -> Value {
        match &self.root {
            Some(root) => root.to_json(),
            None => Value::Null,
        }
    }

    pub fn from_json(value: &Value) -> Result<MerkleIndex> {
        if value.is_null() {
            return Ok(MerkleIndex::new());
        }
        Ok(MerkleIndex {
            root: Some(MerkleNode::from_json(value)?),
        })
    }
}
