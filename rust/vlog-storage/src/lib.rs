#![warn(missing_docs)]

//! Byte-addressable storage for the regions a verifiable log persists: the
//! header, the tree node table, the packed block data and two presence
//! bitfields. Each region is a [StorageBackend] handed out by a
//! [StorageProvider].

mod error;
pub use error::*;

mod backend;
pub use backend::*;

mod region;
pub use region::*;

mod measure;
pub use measure::*;

#[cfg(all(feature = "helpers", not(target_arch = "wasm32")))]
mod helpers;
#[cfg(all(feature = "helpers", not(target_arch = "wasm32")))]
pub use helpers::*;
