#![warn(missing_docs)]

//! Light weight helpers that are shared by the verifiable log crates. Their
//! chief quality is that they have virtually zero dependencies.

mod sync;
pub use sync::*;

mod hash;
pub use hash::*;
