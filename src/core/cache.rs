//! Unbounded memo of successful results.
//!
//! Entries are inserted once and never updated or evicted: the first
//! successful value for a key wins. Memory grows with the number of distinct
//! keys; a bounded LRU would be the replacement if that becomes a problem.
use std::sync::Arc;

use scc::HashMap;

use super::resolver::RequestKey;

#[derive(Default)]
pub struct ResultCache {
    entries: HashMap<RequestKey, Arc<str>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the stored result for a key.
    pub async fn get(&self, key: &RequestKey) -> Option<Arc<str>> {
        self.entries.read_async(key, |_, value| value.clone()).await
    }

    /// Store `value` unless the key already has a result.
    ///
    /// Returns `true` if the value was inserted.
    pub async fn put_if_absent(&self, key: RequestKey, value: Arc<str>) -> bool {
        self.entries.insert_async(key, value).await.is_ok()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
