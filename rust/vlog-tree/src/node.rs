use serde::{Deserialize, Serialize};
use vlog_common::Hash;

use crate::flat;

/// Domain separation prefix for leaf hashes
pub const LEAF_TYPE: u8 = 0;
/// Domain separation prefix for parent hashes
pub const PARENT_TYPE: u8 = 1;
/// Domain separation prefix for the checksum over a set of roots
pub const ROOT_TYPE: u8 = 2;

/// A node of the Merkle tree: its flat index, its hash and the number of
/// payload bytes in the subtree it roots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Flat tree index
    pub index: u64,
    /// Hash of the leaf payload, or of the two children
    pub hash: Hash,
    /// Cumulative payload size of the subtree
    pub size: u64,
}

impl Node {
    /// The leaf node for block payload `data` at flat `index`
    pub fn leaf(index: u64, data: &[u8]) -> Self {
        Node {
            index,
            hash: hash_leaf(data),
            size: data.len() as u64,
        }
    }

    /// The parent of two sibling nodes. Argument order does not matter; the
    /// lower index is always hashed first. Returns `None` if the combined
    /// size does not fit in a `u64`.
    pub fn parent(a: &Node, b: &Node) -> Option<Self> {
        let (left, right) = if a.index <= b.index { (a, b) } else { (b, a) };
        Some(Node {
            index: flat::parent(left.index),
            hash: hash_parent(left, right)?,
            size: left.size.checked_add(right.size)?,
        })
    }
}

/// `blake3(LEAF_TYPE ‖ u64be(len) ‖ data)`
pub fn hash_leaf(data: &[u8]) -> Hash {
    let size = (data.len() as u64).to_be_bytes();
    Hash::digest_chunks([&[LEAF_TYPE][..], &size[..], data])
}

/// `blake3(PARENT_TYPE ‖ u64be(left.size + right.size) ‖ left.hash ‖ right.hash)`,
/// or `None` if the sizes overflow
pub fn hash_parent(left: &Node, right: &Node) -> Option<Hash> {
    let size = left.size.checked_add(right.size)?.to_be_bytes();
    Some(Hash::digest_chunks([
        &[PARENT_TYPE][..],
        &size[..],
        &left.hash.bytes()[..],
        &right.hash.bytes()[..],
    ]))
}

/// The checksum over an ordered set of roots:
/// `blake3(ROOT_TYPE ‖ for each root: hash ‖ u64be(index) ‖ u64be(size))`
pub fn hash_roots(roots: &[Node]) -> Hash {
    let mut chunks: Vec<Vec<u8>> = Vec::with_capacity(roots.len() + 1);
    chunks.push(vec![ROOT_TYPE]);
    for root in roots {
        let mut chunk = Vec::with_capacity(48);
        chunk.extend_from_slice(root.hash.bytes());
        chunk.extend_from_slice(&root.index.to_be_bytes());
        chunk.extend_from_slice(&root.size.to_be_bytes());
        chunks.push(chunk);
    }
    Hash::digest_chunks(chunks.iter().map(Vec::as_slice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};

    #[test]
    fn it_separates_leaf_and_parent_domains() -> Result<()> {
        let a = Node::leaf(0, b"a");
        let b = Node::leaf(2, b"b");
        let parent = Node::parent(&a, &b).ok_or_else(|| anyhow!("No parent"))?;

        assert_eq!(parent.index, 1);
        assert_eq!(parent.size, 2);
        assert_ne!(parent.hash, hash_leaf(b"ab"));
        assert_ne!(hash_leaf(b""), Hash::digest(b""));
        Ok(())
    }

    #[test]
    fn it_orders_parent_inputs_by_index() {
        let a = Node::leaf(0, b"left");
        let b = Node::leaf(2, b"right");

        assert!(Node::parent(&a, &b).is_some());
        assert_eq!(Node::parent(&a, &b), Node::parent(&b, &a));
    }

    #[test]
    fn it_has_no_parent_when_sizes_overflow() {
        let a = Node::leaf(0, b"a");
        let mut b = Node::leaf(2, b"b");
        b.size = u64::MAX;

        assert_eq!(Node::parent(&a, &b), None);
        assert_eq!(hash_parent(&a, &b), None);

        b.size = u64::MAX - 1;
        assert_eq!(Node::parent(&a, &b).map(|parent| parent.size), Some(u64::MAX));
    }

    #[test]
    fn it_binds_root_positions_into_the_checksum() {
        let a = Node::leaf(0, b"same");
        let mut b = a;
        b.index = 2;

        assert_ne!(hash_roots(&[a]), hash_roots(&[b]));
        assert_ne!(hash_roots(&[a, b]), hash_roots(&[b, a]));
    }
}
