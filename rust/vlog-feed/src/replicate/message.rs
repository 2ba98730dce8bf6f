use serde::{Deserialize, Serialize};
use vlog_common::Hash;
use vlog_tree::Node;

use crate::{PublicKey, Signature, VlogFeedError};

/// A replication protocol message. Every frame on a [crate::Transport]
/// carries exactly one, encoded as DAG-CBOR.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First message in each direction
    Handshake {
        /// The sender's random instance token
        id: Hash,
        /// The feed the sender replicates
        key: PublicKey,
    },
    /// Which blocks the sender holds: a run-length encoded bitfield whose
    /// first bit is block `start` (always a multiple of 8)
    Have {
        /// First block described
        start: u64,
        /// Encoded presence bits
        #[serde(with = "serde_bytes")]
        bitfield: Vec<u8>,
    },
    /// Interest in a range of blocks
    Want {
        /// First block of interest
        start: u64,
        /// One past the last block of interest
        end: u64,
    },
    /// Ask for one block, along with a digest of the tree nodes the sender
    /// already holds
    Request {
        /// The block wanted
        block: u64,
        /// Digest of held nodes around the block's leaf
        nodes: u64,
    },
    /// A block and its proof
    Data {
        /// The block delivered
        block: u64,
        /// Its payload
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
        /// Proof nodes
        nodes: Vec<Node>,
        /// Frontier signature, for live feeds
        signature: Option<Signature>,
    },
}

impl Message {
    /// Serialize into one frame
    pub fn encode(&self) -> Result<Vec<u8>, VlogFeedError> {
        serde_ipld_dagcbor::to_vec(self)
            .map_err(|error| VlogFeedError::Protocol(format!("Could not encode message: {error}")))
    }

    /// Parse one frame
    pub fn decode(frame: &[u8]) -> Result<Self, VlogFeedError> {
        serde_ipld_dagcbor::from_slice(frame)
            .map_err(|error| VlogFeedError::Protocol(format!("Could not decode message: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use vlog_tree::Node;

    use super::Message;
    use crate::{SecretKey, VlogFeedError};

    #[test]
    fn it_carries_a_block_with_its_proof() -> Result<()> {
        let secret = SecretKey::from_seed(&[7; 32]);
        let leaf = Node::leaf(0, b"a");
        let message = Message::Data {
            block: 1,
            value: b"b".to_vec(),
            nodes: vec![leaf],
            signature: Some(secret.sign(&leaf.hash)),
        };

        assert_eq!(Message::decode(&message.encode()?)?, message);
        Ok(())
    }

    #[test]
    fn it_rejects_frames_that_are_not_messages() -> Result<()> {
        let frame = serde_ipld_dagcbor::to_vec(&"hello")?;
        assert!(matches!(
            Message::decode(&frame),
            Err(VlogFeedError::Protocol(_))
        ));
        Ok(())
    }
}
