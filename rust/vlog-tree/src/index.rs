use crate::{Bitfield, flat};

/// Walks never climb above this depth, which keeps every flat index
/// computation inside `u64`.
const MAX_DEPTH: u32 = 60;

/// The nodes a prover sends for one block, and the boundary of the tree
/// they verify against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProofPlan {
    /// Node indexes, path siblings first, then the other full roots in order
    pub nodes: Vec<u64>,
    /// Node-space boundary (`2 * blocks`) of the signed or fixed tree the
    /// proof reaches, or 0 when it stops at a node the verifier already
    /// trusts
    pub verified_by: u64,
}

/// How a verifier will consume a proof, decided from its own tree alone
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Locally stored siblings that fill gaps in the proof, in walk order
    pub missing: Vec<u64>,
    /// A locally stored ancestor the walk can stop at
    pub trusted: Option<u64>,
}

/// An in-memory index of which tree nodes are held, backed by the tree
/// presence [Bitfield].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TreeIndex {
    bitfield: Bitfield,
}

impl TreeIndex {
    /// Wrap an existing presence bitfield
    pub fn new(bitfield: Bitfield) -> Self {
        Self { bitfield }
    }

    /// The presence bitfield
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// The presence bitfield, mutably
    pub fn bitfield_mut(&mut self) -> &mut Bitfield {
        &mut self.bitfield
    }

    /// Whether node `index` is held
    pub fn get(&self, index: u64) -> bool {
        self.bitfield.get(index)
    }

    /// Mark node `index` as held. Returns true if it was not before.
    pub fn set(&mut self, index: u64) -> bool {
        self.bitfield.set(index, true)
    }

    /// The node-space boundary of the largest tree that `index` can be
    /// verified against with held nodes only. Returns 0 when `index` is not
    /// held.
    pub fn verified_by(&self, index: u64) -> u64 {
        if !self.get(index) {
            return 0;
        }

        let top = self.climb(index);
        let mut boundary = flat::right_span(top) + 2;
        let mut depth = flat::depth(top);
        while depth > 0 {
            depth -= 1;
            let candidate = boundary + (1u64 << depth) - 1;
            if self.get(candidate) {
                boundary += 2u64 << depth;
            }
        }
        boundary
    }

    /// Plan the proof for node `index`, given the `digest` a requester sent
    /// for it. What the digest claims is recorded in `remote`, the running
    /// model of the requester's tree, and siblings it claims are left out.
    ///
    /// Full roots are always included. Returns `None` when this tree can not
    /// reach a complete frontier from `index`.
    pub fn proof(&self, index: u64, digest: u64, remote: &mut TreeIndex) -> Option<ProofPlan> {
        if !self.get(index) {
            return None;
        }
        if digest == 1 {
            return Some(ProofPlan::default());
        }
        remote.apply_digest(index, digest);

        let mut nodes = Vec::new();
        let mut next = index;
        while flat::depth(next) < MAX_DEPTH {
            if remote.get(next) {
                return Some(ProofPlan {
                    nodes,
                    verified_by: 0,
                });
            }
            let sibling = flat::sibling(next);
            if !self.get(sibling) || !self.get(flat::parent(next)) {
                break;
            }
            if !remote.get(sibling) {
                nodes.push(sibling);
            }
            next = flat::parent(next);
        }

        let verified_by = self.verified_by(next);
        let roots = flat::full_roots(verified_by);
        if !roots.contains(&next) || roots.iter().any(|root| !self.get(*root)) {
            return None;
        }
        nodes.extend(roots.into_iter().filter(|root| *root != next));

        Some(ProofPlan { nodes, verified_by })
    }

    /// A compact summary of what this tree holds on the path above `index`,
    /// sent along with a request so the prover can leave those nodes out.
    ///
    /// `1` means the node itself (or everything needed to verify it) is held.
    /// Otherwise bit `k + 1` marks the sibling of the ancestor at depth `k`,
    /// and when bit 0 is set the highest set bit `h` marks the ancestor at
    /// depth `h - 1`, where the summary stops.
    pub fn digest(&self, index: u64) -> u64 {
        if self.get(index) {
            return 1;
        }

        let mut digest = 0u64;
        let mut next = flat::sibling(index);
        let max = (next + 2).max(self.bitfield.bit_length());
        let mut parent = flat::parent(next);
        let mut bit = 2u64;

        while flat::depth(next) < MAX_DEPTH
            && (flat::right_span(next) < max || flat::left_span(parent) > 0)
        {
            if self.get(next) {
                digest |= bit;
            }
            if self.get(parent) {
                digest |= 2 * bit + 1;
                if digest + 1 == 4 * bit {
                    return 1;
                }
                return digest;
            }
            next = flat::sibling(parent);
            parent = flat::parent(next);
            bit *= 2;
        }

        digest
    }

    /// Mark every node a [TreeIndex::digest] for `index` claims as held
    pub fn apply_digest(&mut self, index: u64, digest: u64) {
        if digest == 1 {
            self.set(index);
            return;
        }

        let has_ancestor = digest & 1 == 1;
        let mut digest = digest >> 1;
        let mut next = index;
        while digest != 0 && flat::depth(next) < MAX_DEPTH {
            if digest == 1 && has_ancestor {
                self.set(next);
                break;
            }
            if digest & 1 == 1 {
                self.set(flat::sibling(next));
            }
            next = flat::parent(next);
            digest >>= 1;
        }
    }

    /// Decide how a proof for `index` carrying the nodes `proof` will be
    /// walked: which siblings come from the proof, which from local storage,
    /// and which held ancestor (if any) ends the walk.
    pub fn resolve(&self, index: u64, proof: &[u64]) -> Resolution {
        let mut missing = Vec::new();
        let mut position = 0;
        let mut next = index;

        while flat::depth(next) < MAX_DEPTH {
            if self.get(next) {
                return Resolution {
                    missing,
                    trusted: Some(next),
                };
            }
            let sibling = flat::sibling(next);
            if proof.get(position) == Some(&sibling) {
                position += 1;
            } else if self.get(sibling) {
                missing.push(sibling);
            } else {
                break;
            }
            next = flat::parent(next);
        }

        Resolution {
            missing,
            trusted: None,
        }
    }

    fn climb(&self, index: u64) -> u64 {
        let mut top = index;
        while flat::depth(top) < MAX_DEPTH
            && self.get(flat::sibling(top))
            && self.get(flat::parent(top))
        {
            top = flat::parent(top);
        }
        top
    }
}
