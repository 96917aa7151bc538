use std::sync::Arc;
use crate::index::inverted::{InvertedReadView, InvertedWriter};
use crate::index::trie::{TrieReadView, TrieWriter};
use crate::query::logical::{LogicalNodeKind, LogicalPlan};
use crate::core::types::TermType;
use crate::search::active_nodes::{ActiveNodeCache, ActiveNodeSet};

/// Cost annotations attached to every logical node before physical
/// planning. Term leaves also carry their active-node sets so the
/// physical operators never recompute them.
#[derive(Debug, Clone, Default)]
pub struct NodeAnnotation {
    pub estimated_results: u32,
    pub probability: f64,
    pub leaf_count: u32,
    pub active_exact: Option<Arc<ActiveNodeSet>>,
    pub active_fuzzy: Option<Arc<ActiveNodeSet>>,
    /// For phrase leaves: the exact active set of each keyword.
    pub phrase_sets: Vec<(String, Arc<ActiveNodeSet>)>,
}

impl NodeAnnotation {
    pub fn active_set(&self, fuzzy: bool) -> Option<&Arc<ActiveNodeSet>> {
        if fuzzy {
            self.active_fuzzy.as_ref().or(self.active_exact.as_ref())
        } else {
            self.active_exact.as_ref()
        }
    }

    pub fn phrase_active(&self, keyword: &str) -> Option<Arc<ActiveNodeSet>> {
        self.phrase_sets
            .iter()
            .find(|(k, _)| k == keyword)
            .map(|(_, set)| set.clone())
    }
}

/// Computes cardinality estimates from the cached per-keyword document
/// counts and the trie-node subtree probabilities refreshed by the merge
/// scheduler.
pub struct HistogramManager;

/// Probabilities for more terminals than this are approximated by the
/// stored subtree probability alone.
const MAX_TERMINALS_SCANNED: usize = 256;

impl HistogramManager {
    pub fn annotate(
        plan: &LogicalPlan,
        trie: &TrieReadView,
        inverted: &InvertedReadView,
        total_records: u32,
        fuzzy: bool,
        cache: &ActiveNodeCache,
    ) -> Vec<NodeAnnotation> {
        let mut annotations = vec![NodeAnnotation::default(); plan.nodes.len()];
        if let Some(root) = plan.root {
            Self::annotate_node(plan, root, trie, inverted, total_records, fuzzy, cache, &mut annotations);
        }
        annotations
    }

    #[allow(clippy::too_many_arguments)]
    fn annotate_node(
        plan: &LogicalPlan,
        idx: usize,
        trie: &TrieReadView,
        inverted: &InvertedReadView,
        total_records: u32,
        fuzzy: bool,
        cache: &ActiveNodeCache,
        annotations: &mut Vec<NodeAnnotation>,
    ) -> f64 {
        let total = total_records.max(1) as f64;
        let node = plan.node(idx);
        let (probability, leaf_count) = match &node.kind {
            LogicalNodeKind::Term(term) => {
                let exact = cache.get(trie, &term.keyword, 0);
                let fuzzy_set = (term.edit_threshold > 0)
                    .then(|| cache.get(trie, &term.keyword, term.edit_threshold));
                let chosen = if fuzzy { fuzzy_set.as_ref().unwrap_or(&exact) } else { &exact };
                let p = Self::term_probability(chosen.as_ref(), term.term_type, trie, inverted, total);
                annotations[idx].active_exact = Some(exact.clone());
                annotations[idx].active_fuzzy = fuzzy_set;
                (p, 1)
            }
            LogicalNodeKind::Phrase(phrase) => {
                // A phrase cannot match more records than the AND of its
                // keywords, all complete.
                let mut p = 1.0;
                for keyword in &phrase.keywords {
                    let set = cache.get(trie, keyword, 0);
                    p *= Self::term_probability(set.as_ref(), TermType::Complete, trie, inverted, total);
                    annotations[idx].phrase_sets.push((keyword.clone(), set));
                }
                (p, phrase.keywords.len() as u32)
            }
            LogicalNodeKind::Geo(_) => (0.1, 1),
            LogicalNodeKind::And => {
                let mut p = 1.0;
                let mut leaves = 0;
                for &child in &node.children {
                    p *= Self::annotate_node(plan, child, trie, inverted, total_records, fuzzy, cache, annotations);
                    leaves += annotations[child].leaf_count;
                }
                (p, leaves)
            }
            LogicalNodeKind::Or => {
                let mut p_none = 1.0;
                let mut leaves = 0;
                for &child in &node.children {
                    let p = Self::annotate_node(plan, child, trie, inverted, total_records, fuzzy, cache, annotations);
                    p_none *= 1.0 - p;
                    leaves += annotations[child].leaf_count;
                }
                (1.0 - p_none, leaves)
            }
            LogicalNodeKind::Not => {
                let child = node.children[0];
                let p = Self::annotate_node(plan, child, trie, inverted, total_records, fuzzy, cache, annotations);
                (1.0 - p, annotations[child].leaf_count)
            }
        };

        let annotation = &mut annotations[idx];
        annotation.probability = probability;
        annotation.leaf_count = leaf_count;
        annotation.estimated_results = (probability * total).round() as u32;
        probability
    }

    fn term_probability(
        set: &ActiveNodeSet,
        term_type: TermType,
        trie: &TrieReadView,
        inverted: &InvertedReadView,
        total: f64,
    ) -> f64 {
        let mut p = 0.0;
        match term_type {
            TermType::Complete => {
                for active in set.terminals(trie) {
                    if let Some(list_id) = trie.node(active.node).list_id {
                        p += inverted.doc_count(list_id) as f64 / total;
                    }
                }
            }
            TermType::Prefix => {
                for active in set.iter() {
                    let stored = trie.node(active.node).probability;
                    if stored > 0.0 {
                        p += stored;
                        continue;
                    }
                    // Before the first histogram refresh the stored
                    // probabilities are zero; derive from list lengths.
                    let mut terminals = Vec::new();
                    trie.terminals_in_subtree(active.node, &mut terminals);
                    for node in terminals.into_iter().take(MAX_TERMINALS_SCANNED) {
                        if let Some(list_id) = trie.node(node).list_id {
                            p += inverted.doc_count(list_id) as f64 / total;
                        }
                    }
                }
            }
        }
        p.min(1.0)
    }

    /// The periodic refresh: recompute the trie-node subtree probabilities
    /// from current document counts. Fired by the merge scheduler every P
    /// merges or Q writes, after the merge of the tick that crossed the
    /// threshold.
    pub fn refresh(trie: &mut TrieWriter, inverted: &InvertedWriter, total_records: u32) {
        let lists: Vec<u32> = inverted.lists().iter().map(|l| l.len()).collect();
        trie.refresh_probabilities(&|list_id| lists.get(list_id.0 as usize).copied().unwrap_or(0), total_records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AttributeFilter, RecordId, TermType};
    use crate::index::inverted::PendingPosting;
    use crate::query::logical::TermSpec;
    use crate::scoring::Ranker;

    fn seeded_index(words: &[(&str, u32)]) -> (TrieWriter, InvertedWriter) {
        let mut trie = TrieWriter::new();
        let mut inverted = InvertedWriter::new();
        let ranker = Ranker::default();
        for (word, df) in words {
            let handle = trie.add_keyword(word).unwrap();
            for rec in 0..*df {
                inverted.append_posting(
                    handle.list_id,
                    PendingPosting { record: RecordId(rec), tf_boost_sum: 1.0, static_score: 1.0 },
                );
            }
        }
        for job in inverted.take_pending() {
            let merged = crate::index::inverted::merge_worker(&job, &ranker, 100);
            inverted.install_merged(vec![(job.list_id, merged)]);
        }
        (trie, inverted)
    }

    fn term_plan(keyword: &str, term_type: TermType) -> LogicalPlan {
        let mut plan = LogicalPlan::new(10);
        let t = plan.term(TermSpec {
            keyword: keyword.into(),
            term_type,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        plan.set_root(t);
        plan
    }

    #[test]
    fn complete_term_estimate_tracks_document_count() {
        let (trie, inverted) = seeded_index(&[("pink", 40), ("floyd", 10)]);
        let cache = ActiveNodeCache::new(16);
        let plan = term_plan("pink", TermType::Complete);
        let ann = HistogramManager::annotate(
            &plan,
            &trie.read_view(),
            &inverted.read_view(),
            100,
            false,
            &cache,
        );
        assert_eq!(ann[0].estimated_results, 40);
        assert!((ann[0].probability - 0.4).abs() < 1e-9);
    }

    #[test]
    fn prefix_estimate_covers_the_subtree() {
        let (trie, inverted) = seeded_index(&[("pink", 10), ("pint", 20), ("floyd", 5)]);
        let cache = ActiveNodeCache::new(16);
        let plan = term_plan("pin", TermType::Prefix);
        let ann = HistogramManager::annotate(
            &plan,
            &trie.read_view(),
            &inverted.read_view(),
            100,
            false,
            &cache,
        );
        assert_eq!(ann[0].estimated_results, 30);
    }

    #[test]
    fn and_multiplies_or_complements() {
        let (trie, inverted) = seeded_index(&[("pink", 50), ("floyd", 50)]);
        let cache = ActiveNodeCache::new(16);

        let mut plan = LogicalPlan::new(10);
        let a = plan.term(TermSpec {
            keyword: "pink".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let b = plan.term(TermSpec {
            keyword: "floyd".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let and = plan.and(vec![a, b]);
        plan.set_root(and);

        let ann = HistogramManager::annotate(
            &plan,
            &trie.read_view(),
            &inverted.read_view(),
            100,
            false,
            &cache,
        );
        assert!((ann[and].probability - 0.25).abs() < 1e-9);
        assert_eq!(ann[and].leaf_count, 2);

        let mut plan = LogicalPlan::new(10);
        let a = plan.term(TermSpec {
            keyword: "pink".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let b = plan.term(TermSpec {
            keyword: "floyd".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let or = plan.or(vec![a, b]);
        plan.set_root(or);
        let ann = HistogramManager::annotate(
            &plan,
            &trie.read_view(),
            &inverted.read_view(),
            100,
            false,
            &cache,
        );
        assert!((ann[or].probability - 0.75).abs() < 1e-9);
    }

    #[test]
    fn refresh_populates_trie_probabilities() {
        let (mut trie, inverted) = seeded_index(&[("pink", 25), ("pint", 25)]);
        HistogramManager::refresh(&mut trie, &inverted, 100);
        let view = trie.read_view();
        let pin = view.lookup("pin").unwrap();
        assert!((view.node(pin).probability - 0.5).abs() < 1e-9);
    }
}
