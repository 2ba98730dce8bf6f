//! Flat tree addressing.
//!
//! A binary tree laid out over a single integer index space: leaves sit at
//! even indices (`2 * block`) and each internal node sits between the two
//! subtrees it covers. The depth of a node is the number of trailing set bits
//! in its index.
//!
//! ```text
//!        3
//!    1       5
//!  0   2   4   6
//! ```

/// Number of blocks a tree can address. Every node over them sits at depth
/// 60 or below, which keeps index arithmetic inside `u64`.
pub const MAX_BLOCKS: u64 = 1 << 60;

/// Whether `index` is a node of the tree over [MAX_BLOCKS] blocks
pub fn is_addressable(index: u64) -> bool {
    index < 2 * MAX_BLOCKS - 1
}

/// Depth of a node, where leaves are depth 0
pub fn depth(index: u64) -> u32 {
    index.trailing_ones()
}

/// Position of a node among the nodes at its depth
pub fn offset(index: u64) -> u64 {
    index >> (depth(index) + 1)
}

/// The node at `depth` and `offset`
pub fn index(depth: u32, offset: u64) -> u64 {
    (offset << (depth + 1)) | ((1u64 << depth) - 1)
}

/// The node directly above
pub fn parent(index: u64) -> u64 {
    let depth = depth(index);
    self::index(depth + 1, offset(index) >> 1)
}

/// The other child of this node's parent
pub fn sibling(index: u64) -> u64 {
    let depth = depth(index);
    self::index(depth, offset(index) ^ 1)
}

/// The two children of an internal node; leaves have none
pub fn children(index: u64) -> Option<(u64, u64)> {
    let depth = depth(index);
    if depth == 0 {
        return None;
    }
    let offset = offset(index) * 2;
    Some((self::index(depth - 1, offset), self::index(depth - 1, offset + 1)))
}

/// The leftmost leaf covered by the subtree rooted at `index`
pub fn left_span(index: u64) -> u64 {
    index - ((1u64 << depth(index)) - 1)
}

/// The rightmost leaf covered by the subtree rooted at `index`
pub fn right_span(index: u64) -> u64 {
    index + ((1u64 << depth(index)) - 1)
}

/// Number of nodes in the subtree rooted at `index`
pub fn count(index: u64) -> u64 {
    (2u64 << depth(index)) - 1
}

/// The roots of the maximal complete subtrees covering every leaf below the
/// node index `boundary` (that is, `boundary / 2` blocks), left to right.
/// An odd boundary is rounded down.
pub fn full_roots(boundary: u64) -> Vec<u64> {
    let mut roots = Vec::new();
    let mut remaining = boundary >> 1;
    let mut offset = 0u64;

    while remaining > 0 {
        let mut factor = 1u64;
        while factor <= remaining / 2 {
            factor *= 2;
        }
        roots.push(offset + factor - 1);
        offset += 2 * factor;
        remaining -= factor;
    }

    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_computes_depth_and_offset() {
        assert_eq!(depth(0), 0);
        assert_eq!(depth(1), 1);
        assert_eq!(depth(3), 2);
        assert_eq!(depth(7), 3);
        assert_eq!(offset(0), 0);
        assert_eq!(offset(4), 2);
        assert_eq!(offset(5), 1);
        assert_eq!(offset(11), 1);
        assert_eq!(index(0, 3), 6);
        assert_eq!(index(2, 1), 11);
    }

    #[test]
    fn it_walks_parents_and_siblings() {
        assert_eq!(parent(0), 1);
        assert_eq!(parent(2), 1);
        assert_eq!(parent(1), 3);
        assert_eq!(parent(5), 3);
        assert_eq!(parent(3), 7);
        assert_eq!(parent(11), 7);
        assert_eq!(sibling(0), 2);
        assert_eq!(sibling(2), 0);
        assert_eq!(sibling(1), 5);
        assert_eq!(sibling(3), 11);
    }

    #[test]
    fn it_finds_children() {
        assert_eq!(children(0), None);
        assert_eq!(children(1), Some((0, 2)));
        assert_eq!(children(3), Some((1, 5)));
        assert_eq!(children(9), Some((8, 10)));
    }

    #[test]
    fn it_computes_spans_and_counts() {
        assert_eq!((left_span(0), right_span(0)), (0, 0));
        assert_eq!((left_span(3), right_span(3)), (0, 6));
        assert_eq!((left_span(9), right_span(9)), (8, 10));
        assert_eq!((left_span(23), right_span(23)), (16, 30));
        assert_eq!(count(0), 1);
        assert_eq!(count(1), 3);
        assert_eq!(count(7), 15);
    }

    #[test]
    fn it_bounds_the_addressable_tree() {
        let root = MAX_BLOCKS - 1;
        let last = 2 * (MAX_BLOCKS - 1);

        assert!(is_addressable(0));
        assert!(is_addressable(root));
        assert!(is_addressable(last));
        assert!(!is_addressable(last + 1));
        assert!(!is_addressable(u64::MAX));
        assert_eq!(depth(root), 60);
        assert_eq!((left_span(root), right_span(root)), (0, last));
        assert_eq!(full_roots(2 * MAX_BLOCKS), vec![root]);
    }

    #[test]
    fn it_computes_full_roots() {
        assert_eq!(full_roots(0), Vec::<u64>::new());
        assert_eq!(full_roots(2), vec![0]);
        assert_eq!(full_roots(4), vec![1]);
        assert_eq!(full_roots(6), vec![1, 4]);
        assert_eq!(full_roots(8), vec![3]);
        assert_eq!(full_roots(10), vec![3, 8]);
        assert_eq!(full_roots(14), vec![3, 9, 12]);
        assert_eq!(full_roots(16), vec![7]);
        assert_eq!(full_roots(7), vec![1, 4]);
    }

    #[test]
    fn it_covers_every_leaf_exactly_once_with_full_roots() {
        for blocks in 0..64u64 {
            let mut covered = Vec::new();
            for root in full_roots(blocks * 2) {
                covered.extend((left_span(root)..=right_span(root)).step_by(2));
            }
            let expected: Vec<u64> = (0..blocks).map(|block| block * 2).collect();
            assert_eq!(covered, expected, "blocks = {blocks}");
        }
    }
}
