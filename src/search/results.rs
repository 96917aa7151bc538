use bytes::Bytes;
use crate::core::types::RecordId;

/// One matched record as returned to the caller.
#[derive(Debug, Clone)]
pub struct ResultItem {
    pub external_id: String,
    pub record: RecordId,
    pub score: f32,
    /// The keywords (or matched prefixes) that produced the hit, with the
    /// edit distance of each.
    pub matching_keywords: Vec<String>,
    pub edit_distances: Vec<u8>,
    pub payload: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct FacetResult {
    pub attribute: String,
    pub buckets: Vec<(String, u64)>,
}

/// The result set of one query execution. Dropping it is how a caller
/// cancels: operators simply stop being pulled and the snapshot guard is
/// released.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub items: Vec<ResultItem>,
    pub facets: Vec<FacetResult>,
    /// Set when the deadline expired and the items are a partial prefix.
    pub approximate: bool,
    pub took_ms: u64,
}

impl QueryResults {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn external_ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.external_id.as_str()).collect()
    }
}
