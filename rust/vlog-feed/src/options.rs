use serde::{Deserialize, Serialize};

use crate::VlogFeedError;

/// Configuration for a [crate::Feed]
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```rust
/// use vlog_feed::FeedOptions;
///
/// let options = FeedOptions::from_json(r#"{ "live": false }"#).unwrap();
/// assert!(!options.live);
/// assert_eq!(options.cache_size, 1024);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedOptions {
    /// Whether the feed's frontier is authenticated by signatures (true) or
    /// by a fixed root checksum once finalized (false)
    pub live: bool,
    /// Capacity of the in-memory tree node cache; 0 disables it
    pub cache_size: usize,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            live: true,
            cache_size: 1024,
        }
    }
}

impl FeedOptions {
    /// Parse options from a JSON document
    pub fn from_json(json: &str) -> Result<Self, VlogFeedError> {
        serde_json::from_str(json).map_err(|error| VlogFeedError::InvalidOptions(format!("{error}")))
    }

    /// Set [FeedOptions::live]
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Set [FeedOptions::cache_size]
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }
}

/// Options for [crate::Feed::proof]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProofOptions {
    /// The requester's digest of nodes it already holds on the path above
    /// the block; see [vlog_tree::TreeIndex::digest]
    pub digest: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn it_fills_in_missing_fields() -> Result<()> {
        assert_eq!(FeedOptions::from_json("{}")?, FeedOptions::default());
        assert_eq!(
            FeedOptions::from_json(r#"{ "cache_size": 0 }"#)?,
            FeedOptions::default().cache_size(0)
        );
        Ok(())
    }

    #[test]
    fn it_reports_malformed_json() {
        assert!(matches!(
            FeedOptions::from_json(r#"{ "live": "yes" }"#),
            Err(VlogFeedError::InvalidOptions(_))
        ));
    }
}
