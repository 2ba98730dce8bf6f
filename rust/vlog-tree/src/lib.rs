#![warn(missing_docs)]

//! The pure, synchronous half of a verifiable log: the flat tree addressing
//! scheme ([flat]), node hashing ([Node]), the streaming [Merklizer], sparse
//! paged presence [Bitfield]s with their run-length wire coding ([rle]) and
//! the [TreeIndex] that builds and resolves proofs.

pub mod flat;
pub mod rle;

mod error;
pub use error::*;

mod node;
pub use node::*;

mod merkle;
pub use merkle::*;

mod bitfield;
pub use bitfield::*;

mod index;
pub use index::*;
