use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::{AttributeFilter, RecordId, TermType};
use crate::query::physical::{ExecContext, MatchedKeyword};
use crate::search::active_nodes::ActiveNodeSet;

/// Verification outcome for one record against one subtree.
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub score: f32,
    pub matched: Vec<MatchedKeyword>,
}

/// Term leaf of the verification tree: answers "does record r match this
/// term" through the forward index, without touching inverted lists.
pub struct RandomAccessTerm {
    pub active: Arc<ActiveNodeSet>,
    pub term_type: TermType,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
}

/// Answers subtree membership for a single record. Used by MergeTopK and
/// MergeByShortestList to confirm candidates, and to evaluate NOT
/// children without iterating them.
pub enum RandomAccessNode {
    Term(RandomAccessTerm),
    And(Vec<RandomAccessNode>),
    Or(Vec<RandomAccessNode>),
    Not(Box<RandomAccessNode>),
}

impl RandomAccessNode {
    pub fn verify(&self, ctx: &ExecContext, record: RecordId) -> Result<Option<Verification>> {
        match self {
            RandomAccessNode::Term(term) => term.verify(ctx, record),
            RandomAccessNode::And(children) => {
                let mut total = Verification::default();
                for child in children {
                    match child.verify(ctx, record)? {
                        Some(v) => {
                            total.score += v.score;
                            total.matched.extend(v.matched);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(total))
            }
            RandomAccessNode::Or(children) => {
                let mut total = Verification::default();
                let mut any = false;
                for child in children {
                    if let Some(v) = child.verify(ctx, record)? {
                        any = true;
                        total.score += v.score;
                        total.matched.extend(v.matched);
                    }
                }
                Ok(any.then_some(total))
            }
            RandomAccessNode::Not(child) => match child.verify(ctx, record)? {
                Some(_) => Ok(None),
                None => Ok(Some(Verification::default())),
            },
        }
    }
}

impl RandomAccessTerm {
    fn verify(&self, ctx: &ExecContext, record: RecordId) -> Result<Option<Verification>> {
        // Active nodes come ordered by distance, so the first hit carries
        // the smallest penalty.
        for active in self.active.iter() {
            let node = ctx.trie.node(active.node);
            let range = match self.term_type {
                TermType::Prefix => {
                    let (lo, hi) = ctx.trie.descendants_id_range(active.node);
                    if lo > hi {
                        continue; // no terminals below this node
                    }
                    Some((lo, hi))
                }
                TermType::Complete => node.keyword_id.map(|id| (id, id)),
            };
            let Some((lo, hi)) = range else { continue };

            if let Some(hit) = ctx.forward.has_word_in_range(record, lo, hi, &self.attribute_filter)? {
                let doc_count = ctx.inverted.doc_count(hit.list_id);
                let raw = ctx.ranker.term_record_score(
                    hit.tf_boost,
                    hit.static_score,
                    doc_count,
                    ctx.total_records,
                );
                let score = self.boost * ctx.ranker.apply_edit_distance(raw, active.distance);
                return Ok(Some(Verification {
                    score,
                    matched: vec![MatchedKeyword {
                        trie_node: active.node,
                        keyword_id: hit.keyword_id,
                        list_id: hit.list_id,
                        distance: active.distance,
                    }],
                }));
            }
        }
        Ok(None)
    }
}
