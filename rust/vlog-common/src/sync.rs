//! Cross-target bound compatibility
//!
//! Storage backends and feeds are shared across tasks on native targets, but
//! may be single-threaded on `wasm32-unknown-unknown`. [ConditionalSync] lets
//! the bound be written once for both.

#[allow(missing_docs)]
#[cfg(not(target_arch = "wasm32"))]
pub trait ConditionalSync: Send + Sync {}

#[cfg(not(target_arch = "wasm32"))]
impl<S> ConditionalSync for S where S: Send + Sync {}

#[allow(missing_docs)]
#[cfg(target_arch = "wasm32")]
pub trait ConditionalSync {}

#[cfg(target_arch = "wasm32")]
impl<S> ConditionalSync for S {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::ConditionalSync;
    use crate::Hash;

    fn shareable<T: ConditionalSync>(_: &T) {}

    #[test]
    fn it_covers_shared_state() {
        shareable(&Arc::new(Hash::digest(b"shared")));
    }
}
