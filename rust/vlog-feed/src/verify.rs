use serde::{Deserialize, Serialize};
use tracing::debug;
use vlog_tree::{Node, flat, hash_roots};

use crate::{PublicKey, Signature, VlogFeedError};

/// The nodes (and, for live feeds, the frontier signature) that let a
/// receiver verify one block against a feed's key
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Path siblings the receiver lacks, then the other full roots in order
    pub nodes: Vec<Node>,
    /// Signature over the checksum of the full roots, for live feeds
    pub signature: Option<Signature>,
}

/// The frontier a verified proof reached
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frontier {
    /// Node-space boundary of the verified tree (`2 * blocks`)
    pub verified_by: u64,
    /// Payload bytes covered by the verified tree
    pub bytes: u64,
    /// The signature that authenticated it, if the feed is live
    pub signature: Option<Signature>,
}

/// An accepted block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verified {
    /// The block's leaf node
    pub leaf: Node,
    /// Every node that must be persisted, bottom up, proof roots last
    pub writes: Vec<Node>,
    /// The frontier reached, or `None` if verification stopped at a node
    /// that was already trusted
    pub frontier: Option<Frontier>,
}

/// Verify block `index` with payload `data` against `key`.
///
/// Siblings are taken from the head of the proof when its index matches,
/// otherwise from `missing` (locally stored nodes, in walk order). The walk
/// stops early if it reaches `trusted` with an identical hash; otherwise the
/// rest of the proof must be exactly the remaining full roots of the frontier,
/// whose checksum must carry a valid signature (live) or equal the key
/// (static).
pub fn verify(
    key: &PublicKey,
    index: u64,
    data: &[u8],
    proof: &Proof,
    missing: &[Node],
    trusted: Option<&Node>,
) -> Result<Verified, VlogFeedError> {
    if index >= flat::MAX_BLOCKS {
        debug!(index, "Block lies outside the addressable tree");
        return Err(VlogFeedError::VerificationFailed);
    }
    if let Some(node) = proof.nodes.iter().find(|node| !flat::is_addressable(node.index)) {
        debug!(index, node = node.index, "Proof node lies outside the addressable tree");
        return Err(VlogFeedError::VerificationFailed);
    }

    let leaf = Node::leaf(index * 2, data);
    let mut writes = Vec::new();
    let mut nodes = proof.nodes.iter().peekable();
    let mut missing = missing.iter().peekable();
    let mut top = leaf;

    loop {
        if let Some(trusted) = trusted.filter(|trusted| trusted.index == top.index) {
            if trusted.hash != top.hash {
                debug!(index, node = top.index, "Computed hash differs from trusted node");
                return Err(VlogFeedError::VerificationFailed);
            }
            return Ok(Verified {
                leaf,
                writes,
                frontier: None,
            });
        }

        let sibling = flat::sibling(top.index);
        let sibling = if let Some(node) = nodes.next_if(|node| node.index == sibling) {
            writes.push(*node);
            *node
        } else if let Some(node) = missing.next_if(|node| node.index == sibling) {
            *node
        } else {
            break;
        };

        writes.push(top);
        top = Node::parent(&top, &sibling).ok_or_else(|| {
            debug!(index, node = sibling.index, "Proof node sizes overflow");
            VlogFeedError::VerificationFailed
        })?;
    }
    writes.push(top);

    let last = nodes.clone().last().copied().unwrap_or(top);
    let verified_by = flat::right_span(last.index).max(flat::right_span(top.index)) + 2;

    let mut roots = Vec::new();
    for root in flat::full_roots(verified_by) {
        if root == top.index {
            roots.push(top);
        } else if let Some(node) = nodes.next_if(|node| node.index == root) {
            writes.push(*node);
            roots.push(*node);
        } else {
            debug!(index, root, "Proof does not reach full root");
            return Err(VlogFeedError::VerificationFailed);
        }
    }
    if nodes.next().is_some() {
        debug!(index, "Proof carries nodes past the full roots");
        return Err(VlogFeedError::VerificationFailed);
    }

    let bytes = roots
        .iter()
        .try_fold(0u64, |bytes, root| bytes.checked_add(root.size))
        .ok_or_else(|| {
            debug!(index, "Root sizes overflow");
            VlogFeedError::VerificationFailed
        })?;

    let checksum = hash_roots(&roots);
    let valid = match &proof.signature {
        Some(signature) => key.verify(&checksum, signature),
        None => key.commits_to(&checksum),
    };
    if !valid {
        debug!(index, verified_by, "Checksum does not match feed key");
        return Err(VlogFeedError::VerificationFailed);
    }

    Ok(Verified {
        leaf,
        writes,
        frontier: Some(Frontier {
            verified_by,
            bytes,
            signature: proof.signature,
        }),
    })
}
