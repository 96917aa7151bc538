use crate::core::error::Result;
use crate::core::types::RefiningValue;
use crate::index::histogram::HistogramManager;
use crate::query::logical::LogicalPlan;
use crate::query::operators::facet::FacetCollector;
use crate::query::operators::feedback_rank::FeedbackRanker;
use crate::query::operators::phrase::PhraseVerifier;
use crate::query::optimizer::QueryOptimizer;
use crate::query::physical::{ExecContext, PhysicalNode, PlanItem};
use crate::schema::Schema;
use crate::search::active_nodes::ActiveNodeCache;
use crate::search::results::FacetResult;

/// What one pass over the physical plan produced, before external ids and
/// payloads are resolved.
pub struct ExecutionOutcome {
    pub items: Vec<PlanItem>,
    pub facets: Vec<FacetResult>,
    pub approximate: bool,
}

/// Ensures `close` runs on every exit path, errors and timeouts included.
struct OpenGuard<'a> {
    root: &'a mut PhysicalNode,
    ctx: &'a ExecContext,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        self.root.close(self.ctx);
    }
}

/// Drives one snapshot-bound execution: annotate, optimize, pull records
/// through the operator tree, and apply the post-processing chain (ACL,
/// filter query, phrase positions, facets, refining sort, feedback).
pub struct QueryExecutor;

impl QueryExecutor {
    pub fn run(
        plan: &LogicalPlan,
        schema: &Schema,
        ctx: &ExecContext,
        active_cache: &ActiveNodeCache,
        fuzzy: bool,
        now_timestamp: i64,
    ) -> Result<ExecutionOutcome> {
        let annotations = HistogramManager::annotate(
            plan,
            &ctx.trie,
            &ctx.inverted,
            ctx.total_records,
            fuzzy,
            active_cache,
        );
        let physical = QueryOptimizer::build(plan, &annotations, fuzzy)?;

        let phrase_refs: Vec<_> = physical.phrases.iter().collect();
        let phrase_verifier = PhraseVerifier::new(&phrase_refs, &ctx.trie);

        let feedback = match &plan.query_text {
            Some(text) => FeedbackRanker::new(&ctx.feedback, text, now_timestamp),
            None => FeedbackRanker::new(&ctx.feedback, "", now_timestamp),
        };

        let mut facet_collector = FacetCollector::new(&plan.facets, schema);

        // Facets and refining sorts need the full match set; feedback can
        // promote records from beyond the top K, so over-pull for it.
        let pull_limit = if !facet_collector.is_empty() || plan.sort.is_some() {
            usize::MAX
        } else if !feedback.is_empty() {
            (plan.top_k * 10).max(200)
        } else {
            plan.top_k
        };

        let mut root = physical.root;
        let mut items = Vec::new();
        {
            let mut guard = OpenGuard { root: &mut root, ctx };
            guard.root.open(ctx)?;
            while items.len() < pull_limit {
                let Some(item) = guard.root.next(ctx)? else { break };

                let Some(list) = ctx.forward.valid_record(item.record) else { continue };

                match (&plan.role_id, list.acl.is_public()) {
                    (_, true) => {}
                    (Some(role), false) if list.acl.has_role(role) => {}
                    _ => continue,
                }

                if let Some(fq) = &plan.filter {
                    let lookup = |name: &str| -> Option<Vec<RefiningValue>> {
                        let slot = schema.refining_id(name)?;
                        list.refining.values(slot).ok()
                    };
                    if !fq.matches(&lookup) {
                        continue;
                    }
                }

                if !phrase_verifier.is_empty() && !phrase_verifier.matches(&ctx.forward, item.record)? {
                    continue;
                }

                facet_collector.collect(list)?;
                items.push(item);

                if ctx.expired() {
                    break;
                }
            }
        }

        let approximate = ctx.expired();

        if let Some(sort) = &plan.sort {
            if let Some(slot) = schema.refining_id(&sort.attribute) {
                let default = schema.refining[slot].default.clone();
                let key_of = |item: &PlanItem| -> RefiningValue {
                    ctx.forward
                        .record(item.record)
                        .and_then(|l| l.refining.values(slot).ok())
                        .and_then(|values| values.into_iter().next())
                        .unwrap_or_else(|| default.clone())
                };
                items.sort_by(|a, b| {
                    let ord = key_of(a).compare(&key_of(b));
                    let ord = if sort.descending { ord.reverse() } else { ord };
                    ord.then(b.score.total_cmp(&a.score)).then(a.record.cmp(&b.record))
                });
            }
        } else {
            feedback.apply(&ctx.ranker, &mut items);
        }

        items.truncate(plan.top_k);

        Ok(ExecutionOutcome { items, facets: facet_collector.into_results(), approximate })
    }
}
