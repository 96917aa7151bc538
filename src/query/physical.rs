use std::sync::Arc;
use std::time::Instant;
use crate::core::error::Result;
use crate::core::types::{KeywordId, ListId, RecordId};
use crate::geo::GeoIndex;
use crate::index::feedback::FeedbackReadView;
use crate::index::forward::ForwardReadView;
use crate::index::inverted::InvertedReadView;
use crate::index::trie::TrieReadView;
use crate::query::operators::geo::{GeoNearestOp, GeoSimpleOp};
use crate::query::operators::merge_by_id::{MergeSortedByIdOp, UnionSortedByIdOp};
use crate::query::operators::merge_topk::MergeTopKOp;
use crate::query::operators::shortest_list::MergeByShortestListOp;
use crate::query::operators::sort::{SortByIdOp, SortByScoreOp};
use crate::query::operators::term_list::{SimpleScanOp, SuggestionOp, TermVirtualListOp};
use crate::scoring::Ranker;

/// One matched keyword of one record: the trie node it was reached
/// through (the keyword itself, or the query prefix when the hit came
/// from a range probe), and the edit distance of the match.
#[derive(Debug, Clone, Copy)]
pub struct MatchedKeyword {
    pub trie_node: u32,
    pub keyword_id: KeywordId,
    pub list_id: ListId,
    pub distance: u8,
}

/// The record item flowing between physical operators.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub record: RecordId,
    pub score: f32,
    pub matched: Vec<MatchedKeyword>,
}

/// Everything an operator needs at run time: the four read views captured
/// in one snapshot, the ranker, and the cooperative deadline.
pub struct ExecContext {
    pub trie: TrieReadView,
    pub forward: ForwardReadView,
    pub inverted: InvertedReadView,
    pub feedback: FeedbackReadView,
    pub ranker: Ranker,
    pub total_records: u32,
    pub deadline: Option<Instant>,
    pub geo: Option<Arc<dyn GeoIndex>>,
}

impl ExecContext {
    /// Polled between next() calls; expiry surfaces partial results.
    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Output guarantee of an operator, used by the optimizer to decide where
/// sort operators must be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputOrder {
    ByScore,
    ById,
    Unordered,
}

/// The physical operators. Shared protocol: `open` may be expensive
/// (expands keyword cursors, materializes sorts), `next` is the hot path,
/// `close` releases per-query state. The executor guarantees `close` runs
/// on every path, including errors and timeouts.
pub enum PhysicalNode {
    TermVirtualList(TermVirtualListOp),
    SimpleScan(SimpleScanOp),
    Suggestion(SuggestionOp),
    MergeTopK(MergeTopKOp),
    MergeSortedById(MergeSortedByIdOp),
    MergeByShortestList(MergeByShortestListOp),
    UnionSortedById(UnionSortedByIdOp),
    SortById(SortByIdOp),
    SortByScore(SortByScoreOp),
    GeoSimple(GeoSimpleOp),
    GeoNearestNeighbor(GeoNearestOp),
}

impl PhysicalNode {
    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        match self {
            PhysicalNode::TermVirtualList(op) => op.open(ctx),
            PhysicalNode::SimpleScan(op) => op.open(ctx),
            PhysicalNode::Suggestion(op) => op.open(ctx),
            PhysicalNode::MergeTopK(op) => op.open(ctx),
            PhysicalNode::MergeSortedById(op) => op.open(ctx),
            PhysicalNode::MergeByShortestList(op) => op.open(ctx),
            PhysicalNode::UnionSortedById(op) => op.open(ctx),
            PhysicalNode::SortById(op) => op.open(ctx),
            PhysicalNode::SortByScore(op) => op.open(ctx),
            PhysicalNode::GeoSimple(op) => op.open(ctx),
            PhysicalNode::GeoNearestNeighbor(op) => op.open(ctx),
        }
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        match self {
            PhysicalNode::TermVirtualList(op) => op.next(ctx),
            PhysicalNode::SimpleScan(op) => op.next(ctx),
            PhysicalNode::Suggestion(op) => op.next(ctx),
            PhysicalNode::MergeTopK(op) => op.next(ctx),
            PhysicalNode::MergeSortedById(op) => op.next(ctx),
            PhysicalNode::MergeByShortestList(op) => op.next(ctx),
            PhysicalNode::UnionSortedById(op) => op.next(ctx),
            PhysicalNode::SortById(op) => op.next(ctx),
            PhysicalNode::SortByScore(op) => op.next(ctx),
            PhysicalNode::GeoSimple(op) => op.next(ctx),
            PhysicalNode::GeoNearestNeighbor(op) => op.next(ctx),
        }
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        match self {
            PhysicalNode::TermVirtualList(op) => op.close(ctx),
            PhysicalNode::SimpleScan(op) => op.close(ctx),
            PhysicalNode::Suggestion(op) => op.close(ctx),
            PhysicalNode::MergeTopK(op) => op.close(ctx),
            PhysicalNode::MergeSortedById(op) => op.close(ctx),
            PhysicalNode::MergeByShortestList(op) => op.close(ctx),
            PhysicalNode::UnionSortedById(op) => op.close(ctx),
            PhysicalNode::SortById(op) => op.close(ctx),
            PhysicalNode::SortByScore(op) => op.close(ctx),
            PhysicalNode::GeoSimple(op) => op.close(ctx),
            PhysicalNode::GeoNearestNeighbor(op) => op.close(ctx),
        }
    }

    pub fn output_order(&self) -> OutputOrder {
        match self {
            PhysicalNode::TermVirtualList(_) => OutputOrder::ByScore,
            PhysicalNode::SimpleScan(_) => OutputOrder::Unordered,
            PhysicalNode::Suggestion(_) => OutputOrder::Unordered,
            PhysicalNode::MergeTopK(_) => OutputOrder::ByScore,
            PhysicalNode::MergeSortedById(_) => OutputOrder::ById,
            PhysicalNode::MergeByShortestList(_) => OutputOrder::Unordered,
            PhysicalNode::UnionSortedById(_) => OutputOrder::ById,
            PhysicalNode::SortById(_) => OutputOrder::ById,
            PhysicalNode::SortByScore(_) => OutputOrder::ByScore,
            PhysicalNode::GeoSimple(_) => OutputOrder::Unordered,
            PhysicalNode::GeoNearestNeighbor(_) => OutputOrder::Unordered,
        }
    }
}

/// Total order on scores for heaps; NaN sorts last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreKey(pub f32);

impl Eq for ScoreKey {}

impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}
