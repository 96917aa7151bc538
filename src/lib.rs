pub mod core;
pub mod analysis;
pub mod schema;
pub mod compression;
pub mod snapshot;
pub mod index;
pub mod search;
pub mod scoring;
pub mod query;
pub mod merge;
pub mod storage;
pub mod geo;

pub use crate::core::config::IndexerConfig;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::indexer::Indexer;
pub use crate::core::types::{
    AclOp, AttributeFilter, AttributeOp, Record, RecordId, RecordLookup, RefiningType,
    RefiningValue, TermType,
};
pub use crate::analysis::{Analyzer, StandardAnalyzer, Token};
pub use crate::query::logical::{
    FacetRequest, GeoSpec, LogicalPlan, PhraseSpec, SortSpec, TermSpec,
};
pub use crate::query::filter::FilterQuery;
pub use crate::schema::Schema;
pub use crate::search::results::{FacetResult, QueryResults, ResultItem};
