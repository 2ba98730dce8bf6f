use std::collections::HashMap;

use anyhow::{Result, anyhow};
use pretty_assertions::assert_eq;
use vlog_tree::{Merklizer, Node, TreeIndex, flat, hash_roots};

struct Writer {
    nodes: HashMap<u64, Node>,
    tree: TreeIndex,
    merklizer: Merklizer,
}

fn writer(blocks: u64) -> Result<Writer> {
    let mut writer = Writer {
        nodes: HashMap::new(),
        tree: TreeIndex::default(),
        merklizer: Merklizer::default(),
    };
    for block in 0..blocks {
        for node in writer.merklizer.next(format!("block {block}").as_bytes())? {
            writer.tree.set(node.index);
            writer.nodes.insert(node.index, node);
        }
    }
    Ok(writer)
}

/// Recompute the checksum a proof commits to, the way a verifier holding
/// nothing would.
fn recompute(writer: &Writer, block: u64, nodes: &[u64], verified_by: u64) -> Result<Vec<Node>> {
    let mut top = writer.nodes[&(block * 2)];
    let mut proof = nodes.iter().map(|index| writer.nodes[index]).peekable();

    while let Some(sibling) = proof.peek().copied() {
        if sibling.index != flat::sibling(top.index) {
            break;
        }
        proof.next();
        top = Node::parent(&top, &sibling)
            .ok_or_else(|| anyhow!("Sizes overflow above {}", top.index))?;
    }

    let mut roots = Vec::new();
    for root in flat::full_roots(verified_by) {
        if root == top.index {
            roots.push(top);
        } else {
            let node = proof
                .next()
                .ok_or_else(|| anyhow!("Proof ran out before root {root}"))?;
            assert_eq!(node.index, root);
            roots.push(node);
        }
    }
    assert!(proof.next().is_none());
    Ok(roots)
}

#[test]
fn it_proves_every_block_of_every_small_tree() -> Result<()> {
    for blocks in 1..48u64 {
        let writer = writer(blocks)?;
        for block in 0..blocks {
            let plan = writer
                .tree
                .proof(block * 2, 0, &mut TreeIndex::default())
                .ok_or_else(|| anyhow!("No proof for {block} of {blocks}"))?;

            assert_eq!(plan.verified_by, blocks * 2);
            let roots = recompute(&writer, block, &plan.nodes, plan.verified_by)?;
            assert_eq!(hash_roots(&roots), writer.merklizer.checksum());
        }
    }
    Ok(())
}

#[test]
fn it_never_sends_more_than_a_path_and_the_roots() -> Result<()> {
    let writer = writer(1000)?;
    for block in [0u64, 1, 511, 512, 999] {
        let plan = writer
            .tree
            .proof(block * 2, 0, &mut TreeIndex::default())
            .ok_or_else(|| anyhow!("No proof for {block}"))?;
        let roots = flat::full_roots(2000).len();
        assert!(plan.nodes.len() <= 10 + roots);
    }
    Ok(())
}

#[test]
fn it_shrinks_proofs_as_the_requester_learns() -> Result<()> {
    let writer = writer(16)?;
    let mut reader = TreeIndex::default();
    let mut remote = TreeIndex::default();

    let first = writer
        .tree
        .proof(0, reader.digest(0), &mut remote)
        .ok_or_else(|| anyhow!("No proof for block 0"))?;

    // the reader stores the leaf, the path and the computed ancestors
    let mut next = 0;
    reader.set(next);
    for sibling in &first.nodes {
        reader.set(*sibling);
        next = flat::parent(next);
        reader.set(next);
    }

    let second = writer
        .tree
        .proof(4, reader.digest(4), &mut remote)
        .ok_or_else(|| anyhow!("No proof for block 2"))?;

    assert_eq!(second.verified_by, 0);
    assert_eq!(second.nodes, vec![6]);
    assert_eq!(
        reader.resolve(4, &second.nodes).trusted,
        Some(flat::parent(4))
    );
    Ok(())
}
