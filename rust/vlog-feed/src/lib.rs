#![warn(missing_docs)]

//! A single-writer, append-only log whose blocks can be verified by anyone
//! who knows its [PublicKey], and replicated between untrusting peers.
//!
//! Each appended block becomes a leaf of a Merkle tree laid out in flat
//! in-order positions (see [vlog_tree::flat]). A live feed signs the checksum
//! of its full roots after every append; a static feed's key is that
//! checksum, fixed by [Feed::finalize]. A reader that is handed a block with
//! a [Proof] stores it only if the proof leads to signed (or key-matching)
//! roots.
//!
//! ```rust
//! # use anyhow::Result;
//! use vlog_feed::{Feed, FeedOptions, ProofOptions};
//! use vlog_storage::MemoryStorageProvider;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let writer = Feed::new(MemoryStorageProvider::default(), FeedOptions::default());
//! writer.append(b"hello").await?;
//! writer.append(b"world").await?;
//!
//! let key = writer.key().expect("live feeds have a key once opened");
//! let reader = Feed::with_key(key, MemoryStorageProvider::default(), FeedOptions::default());
//!
//! let proof = writer.proof(1, ProofOptions::default()).await?;
//! reader.put(1, b"world".to_vec(), proof).await?;
//! assert_eq!(reader.get(1).await?, b"world");
//! # Ok(())
//! # }
//! ```
//!
//! Peers exchange blocks over any [Transport] with [Feed::replicate].

mod error;
pub use error::*;

mod keys;
pub use keys::*;

mod options;
pub use options::*;

mod verify;
pub use verify::*;

mod store;
pub use store::*;

mod feed;
pub use feed::*;

mod replicate;
pub use replicate::*;
