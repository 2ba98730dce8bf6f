use vlog_common::Hash;

use crate::{Node, VlogTreeError, flat, hash_roots};

/// Streams block payloads into a Merkle tree, keeping only the current full
/// roots as state.
#[derive(Clone, Debug, Default)]
pub struct Merklizer {
    roots: Vec<Node>,
    blocks: u64,
}

impl Merklizer {
    /// Resume from a set of full roots, ordered left to right
    pub fn from_roots(roots: Vec<Node>) -> Self {
        let blocks = roots
            .last()
            .map(|root| flat::right_span(root.index) / 2 + 1)
            .unwrap_or(0);
        Self { roots, blocks }
    }

    /// The current full roots
    pub fn roots(&self) -> &[Node] {
        &self.roots
    }

    /// Number of blocks seen
    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Sum of every payload size seen
    pub fn bytes(&self) -> u64 {
        self.roots.iter().map(|root| root.size).sum()
    }

    /// Checksum over the current full roots
    pub fn checksum(&self) -> Hash {
        hash_roots(&self.roots)
    }

    /// Add the next block. Returns the new leaf followed by every parent it
    /// completed, bottom up. Fails without changing anything once the tree
    /// holds [flat::MAX_BLOCKS] blocks or its size would overflow.
    pub fn next(&mut self, data: &[u8]) -> Result<Vec<Node>, VlogTreeError> {
        if self.blocks >= flat::MAX_BLOCKS {
            return Err(VlogTreeError::Overflow(format!("{} blocks", self.blocks)));
        }
        if self.bytes().checked_add(data.len() as u64).is_none() {
            return Err(VlogTreeError::Overflow(format!(
                "{} bytes after {} more",
                self.bytes(),
                data.len()
            )));
        }

        let leaf = Node::leaf(self.blocks * 2, data);
        self.blocks += 1;
        self.roots.push(leaf);

        let mut nodes = vec![leaf];
        while let [.., left, right] = self.roots.as_slice() {
            let (left, right) = (*left, *right);
            if flat::parent(left.index) != flat::parent(right.index) {
                break;
            }
            let parent = Node::parent(&left, &right)
                .ok_or_else(|| VlogTreeError::Overflow(format!("parent of {}", left.index)))?;
            self.roots.truncate(self.roots.len() - 2);
            self.roots.push(parent);
            nodes.push(parent);
        }

        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    fn indexes(nodes: &[Node]) -> Vec<u64> {
        nodes.iter().map(|node| node.index).collect()
    }

    #[test]
    fn it_emits_completed_parents() -> Result<()> {
        let mut merklizer = Merklizer::default();

        assert_eq!(indexes(&merklizer.next(b"a")?), vec![0]);
        assert_eq!(indexes(&merklizer.next(b"b")?), vec![2, 1]);
        assert_eq!(indexes(&merklizer.next(b"c")?), vec![4]);
        assert_eq!(indexes(&merklizer.next(b"d")?), vec![6, 5, 3]);
        assert_eq!(indexes(merklizer.roots()), vec![3]);
        assert_eq!(merklizer.next(b"e")?[0].index, 8);
        assert_eq!(indexes(merklizer.roots()), vec![3, 8]);
        assert_eq!(merklizer.blocks(), 5);
        assert_eq!(merklizer.bytes(), 5);
        Ok(())
    }

    #[test]
    fn it_tracks_full_roots() -> Result<()> {
        let mut merklizer = Merklizer::default();
        for block in 0..37u64 {
            merklizer.next(&block.to_be_bytes())?;
            assert_eq!(
                indexes(merklizer.roots()),
                flat::full_roots(2 * (block + 1))
            );
        }
        Ok(())
    }

    #[test]
    fn it_resumes_from_roots() -> Result<()> {
        let mut original = Merklizer::default();
        for data in [b"x", b"y", b"z"] {
            original.next(data)?;
        }

        let mut resumed = Merklizer::from_roots(original.roots().to_vec());
        assert_eq!(resumed.blocks(), 3);
        assert_eq!(resumed.checksum(), original.checksum());

        assert_eq!(resumed.next(b"w")?, original.next(b"w")?);
        assert_eq!(resumed.checksum(), original.checksum());
        Ok(())
    }

    #[test]
    fn it_refuses_to_grow_past_its_limits() -> Result<()> {
        let mut merklizer = Merklizer::default();
        merklizer.next(b"a")?;
        let mut roots = merklizer.roots().to_vec();
        roots[0].size = u64::MAX;

        let mut oversized = Merklizer::from_roots(roots);
        assert!(matches!(oversized.next(b"b"), Err(VlogTreeError::Overflow(_))));
        assert_eq!(oversized.blocks(), 1);
        assert_eq!(oversized.roots().len(), 1);
        oversized.next(b"")?;

        let mut full = Merklizer::from_roots(vec![Node::leaf(2 * (flat::MAX_BLOCKS - 1), b"z")]);
        assert_eq!(full.blocks(), flat::MAX_BLOCKS);
        assert!(matches!(full.next(b"y"), Err(VlogTreeError::Overflow(_))));
        Ok(())
    }
}
