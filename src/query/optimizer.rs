use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::TermType;
use crate::geo::{GeoPoint, GeoRect};
use crate::index::histogram::NodeAnnotation;
use crate::query::logical::{LogicalNodeKind, LogicalPlan, PhraseSpec, TermSpec};
use crate::query::operators::geo::GeoSimpleOp;
use crate::query::operators::merge_by_id::{MergeSortedByIdOp, UnionSortedByIdOp};
use crate::query::operators::merge_topk::MergeTopKOp;
use crate::query::operators::random_access::{RandomAccessNode, RandomAccessTerm};
use crate::query::operators::shortest_list::MergeByShortestListOp;
use crate::query::operators::sort::{SortByIdOp, SortByScoreOp};
use crate::query::operators::term_list::{SimpleScanOp, SuggestionOp, TermVirtualListOp};
use crate::query::physical::{OutputOrder, PhysicalNode};
use crate::search::active_nodes::ActiveNodeSet;

/// A lone prefix term whose expansion would cover most of the corpus is
/// served from completion popularity instead of a full heap merge.
const SUGGESTION_PROBABILITY_CUTOFF: f64 = 0.5;

/// The executable plan: the operator tree plus the phrases that still
/// need positional verification on every emitted record.
pub struct PhysicalPlan {
    pub root: PhysicalNode,
    pub phrases: Vec<PhraseSpec>,
    pub estimated_results: u32,
}

/// Maps the annotated logical tree onto physical operators. For every AND
/// node a small set of candidate strategies is enumerated (threshold
/// top-K, id-sorted stream intersection, shortest-list probing) and the
/// cheapest by estimated cost is kept; sort operators are injected where
/// a parent's input requirement is not met by a child's natural order.
pub struct QueryOptimizer;

impl QueryOptimizer {
    pub fn build(plan: &LogicalPlan, annotations: &[NodeAnnotation], fuzzy: bool) -> Result<PhysicalPlan> {
        let root_idx = plan
            .root
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "logical plan has no root"))?;

        let mut phrases = Vec::new();

        // Popularity fallback for a lone prefix term.
        if let LogicalNodeKind::Term(term) = &plan.node(root_idx).kind {
            let annotation = &annotations[root_idx];
            if term.term_type == TermType::Prefix
                && annotation.probability > SUGGESTION_PROBABILITY_CUTOFF
            {
                let active = Self::active_of(annotation, fuzzy)?;
                let suggestion = PhysicalNode::Suggestion(SuggestionOp::new(
                    active,
                    term.attribute_filter.clone(),
                    term.boost,
                ));
                return Ok(PhysicalPlan {
                    root: PhysicalNode::SortByScore(SortByScoreOp::new(Box::new(suggestion))),
                    phrases,
                    estimated_results: annotation.estimated_results,
                });
            }
        }

        let (root, _cost) =
            Self::build_node(plan, annotations, root_idx, OutputOrder::ByScore, fuzzy, &mut phrases)?;

        // Candidate enumeration may register the same phrase repeatedly.
        let mut seen = std::collections::HashSet::new();
        phrases.retain(|p| seen.insert((p.keywords.clone(), p.slop)));

        Ok(PhysicalPlan { root, phrases, estimated_results: annotations[root_idx].estimated_results })
    }

    fn active_of(annotation: &NodeAnnotation, fuzzy: bool) -> Result<Arc<ActiveNodeSet>> {
        annotation
            .active_set(fuzzy)
            .cloned()
            .ok_or_else(|| Error::new(ErrorKind::Internal, "term lacks an active-node set"))
    }

    fn est(annotations: &[NodeAnnotation], idx: usize) -> f64 {
        annotations[idx].estimated_results as f64
    }

    fn sort_cost(e: f64) -> f64 {
        e * (e + 2.0).log2()
    }

    fn wrap(node: PhysicalNode, cost: f64, required: OutputOrder, e: f64) -> (PhysicalNode, f64) {
        let have = node.output_order();
        if have == required || required == OutputOrder::Unordered {
            return (node, cost);
        }
        match required {
            OutputOrder::ById => {
                (PhysicalNode::SortById(SortByIdOp::new(Box::new(node))), cost + Self::sort_cost(e))
            }
            OutputOrder::ByScore => {
                (PhysicalNode::SortByScore(SortByScoreOp::new(Box::new(node))), cost + Self::sort_cost(e))
            }
            OutputOrder::Unordered => unreachable!(),
        }
    }

    fn build_node(
        plan: &LogicalPlan,
        annotations: &[NodeAnnotation],
        idx: usize,
        required: OutputOrder,
        fuzzy: bool,
        phrases: &mut Vec<PhraseSpec>,
    ) -> Result<(PhysicalNode, f64)> {
        let e = Self::est(annotations, idx);
        match &plan.node(idx).kind {
            LogicalNodeKind::Term(term) => Self::build_term(annotations, idx, term, required, fuzzy),
            LogicalNodeKind::Phrase(spec) => {
                if spec.keywords.is_empty() {
                    return Err(Error::new(ErrorKind::PhraseMalformed, "phrase has no keywords"));
                }
                // All keywords must be present (complete, exact); the
                // positional check runs as a post filter on emitted
                // records.
                phrases.push(spec.clone());
                Self::build_phrase_and(annotations, idx, spec, required)
            }
            LogicalNodeKind::Geo(g) => {
                let rect = GeoRect {
                    min: GeoPoint { lat: g.min_lat, lng: g.min_lng },
                    max: GeoPoint { lat: g.max_lat, lng: g.max_lng },
                };
                let node = PhysicalNode::GeoSimple(GeoSimpleOp::new(rect));
                Ok(Self::wrap(node, e, required, e))
            }
            LogicalNodeKind::And => Self::build_and(plan, annotations, idx, required, fuzzy, phrases),
            LogicalNodeKind::Or => Self::build_or(plan, annotations, idx, required, fuzzy, phrases),
            LogicalNodeKind::Not => Err(Error::new(
                ErrorKind::InvalidArgument,
                "NOT is only supported as a child of AND",
            )),
        }
    }

    fn build_term(
        annotations: &[NodeAnnotation],
        idx: usize,
        term: &TermSpec,
        required: OutputOrder,
        fuzzy: bool,
    ) -> Result<(PhysicalNode, f64)> {
        let annotation = &annotations[idx];
        let active = Self::active_of(annotation, fuzzy)?;
        let e = Self::est(annotations, idx);
        match required {
            OutputOrder::ByScore => {
                let op = TermVirtualListOp::new(
                    active,
                    term.term_type,
                    term.attribute_filter.clone(),
                    term.boost,
                );
                Ok((PhysicalNode::TermVirtualList(op), e + active_overhead(annotation)))
            }
            OutputOrder::ById | OutputOrder::Unordered => {
                let op = SimpleScanOp::new(
                    active,
                    term.term_type,
                    term.attribute_filter.clone(),
                    term.boost,
                );
                Ok(Self::wrap(PhysicalNode::SimpleScan(op), e, required, e))
            }
        }
    }

    fn build_phrase_and(
        annotations: &[NodeAnnotation],
        idx: usize,
        spec: &PhraseSpec,
        required: OutputOrder,
    ) -> Result<(PhysicalNode, f64)> {
        let annotation = &annotations[idx];
        let e = Self::est(annotations, idx);
        let mut children = Vec::new();
        let mut verifiers = Vec::new();
        for keyword in &spec.keywords {
            let active = annotation
                .phrase_active(keyword)
                .ok_or_else(|| Error::new(ErrorKind::Internal, "phrase keyword lacks an active set"))?;
            children.push(PhysicalNode::TermVirtualList(TermVirtualListOp::new(
                active.clone(),
                TermType::Complete,
                spec.attribute_filter.clone(),
                spec.boost,
            )));
            verifiers.push(RandomAccessNode::Term(RandomAccessTerm {
                active,
                term_type: TermType::Complete,
                attribute_filter: spec.attribute_filter.clone(),
                boost: spec.boost,
            }));
        }
        if children.len() == 1 {
            let node = children.pop().expect("one child");
            return Ok(Self::wrap(node, e, required, e));
        }
        let node = PhysicalNode::MergeTopK(MergeTopKOp::new(children, verifiers));
        Ok(Self::wrap(node, e * spec.keywords.len() as f64, required, e))
    }

    fn build_and(
        plan: &LogicalPlan,
        annotations: &[NodeAnnotation],
        idx: usize,
        required: OutputOrder,
        fuzzy: bool,
        phrases: &mut Vec<PhraseSpec>,
    ) -> Result<(PhysicalNode, f64)> {
        let node = plan.node(idx);
        let mut positive = Vec::new();
        let mut negative = Vec::new();
        for &child in &node.children {
            match plan.node(child).kind {
                LogicalNodeKind::Not => negative.push(plan.node(child).children[0]),
                _ => positive.push(child),
            }
        }
        if positive.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "AND needs at least one non-negated child",
            ));
        }

        let e = Self::est(annotations, idx);
        let build_nots = || -> Result<Vec<RandomAccessNode>> {
            negative
                .iter()
                .map(|&n| {
                    Self::build_verifier(plan, annotations, n, fuzzy)
                        .map(|v| RandomAccessNode::Not(Box::new(v)))
                })
                .collect()
        };

        if positive.len() == 1 {
            let (child, child_cost) = Self::build_node(
                plan,
                annotations,
                positive[0],
                if negative.is_empty() { required } else { OutputOrder::Unordered },
                fuzzy,
                phrases,
            )?;
            if negative.is_empty() {
                return Ok((child, child_cost));
            }
            let nots = build_nots()?;
            let node =
                PhysicalNode::MergeByShortestList(MergeByShortestListOp::new(Box::new(child), nots));
            return Ok(Self::wrap(node, child_cost + e, required, e));
        }

        // Enumerate strategies; an individual candidate may be infeasible
        // (e.g. a geo child cannot be random-access verified) without
        // sinking the node, as long as one works out.
        let mut best: Option<(PhysicalNode, f64)> = None;
        let mut last_error: Option<Error> = None;
        let mut consider = |candidate: Result<(PhysicalNode, f64)>| match candidate {
            Ok(c) => {
                if best.as_ref().map(|(_, cost)| c.1 < *cost).unwrap_or(true) {
                    best = Some(c);
                }
            }
            Err(err) => last_error = Some(err),
        };

        // a) Threshold-algorithm top-K over score-sorted children.
        consider((|| {
            let mut children = Vec::new();
            let mut cost = 0.0;
            for &child in &positive {
                let (built, c) =
                    Self::build_node(plan, annotations, child, OutputOrder::ByScore, fuzzy, phrases)?;
                children.push(built);
                cost += c;
            }
            let mut verifiers: Vec<RandomAccessNode> = positive
                .iter()
                .map(|&child| Self::build_verifier(plan, annotations, child, fuzzy))
                .collect::<Result<_>>()?;
            verifiers.extend(build_nots()?);
            let e_min = positive
                .iter()
                .map(|&c| Self::est(annotations, c))
                .fold(f64::MAX, f64::min);
            cost += e_min * positive.len() as f64 * 2.0;
            let node = PhysicalNode::MergeTopK(MergeTopKOp::new(children, verifiers));
            Ok(Self::wrap(node, cost, required, e))
        })());

        // b) Stream intersection over id-sorted children.
        consider((|| {
            let mut children = Vec::new();
            let mut cost = 0.0;
            for &child in &positive {
                let (built, c) =
                    Self::build_node(plan, annotations, child, OutputOrder::ById, fuzzy, phrases)?;
                children.push(built);
                cost += c + Self::est(annotations, child);
            }
            let nots = build_nots()?;
            let node = PhysicalNode::MergeSortedById(MergeSortedByIdOp::new(children, nots));
            Ok(Self::wrap(node, cost, required, e))
        })());

        // c) Scan the shortest child, verify the rest by random access.
        consider((|| {
            let shortest = positive
                .iter()
                .copied()
                .min_by(|&a, &b| Self::est(annotations, a).total_cmp(&Self::est(annotations, b)))
                .expect("nonempty");
            let (scan, scan_cost) =
                Self::build_node(plan, annotations, shortest, OutputOrder::Unordered, fuzzy, phrases)?;
            let mut verifiers: Vec<RandomAccessNode> = positive
                .iter()
                .filter(|&&c| c != shortest)
                .map(|&c| Self::build_verifier(plan, annotations, c, fuzzy))
                .collect::<Result<_>>()?;
            verifiers.extend(build_nots()?);
            let cost =
                scan_cost + Self::est(annotations, shortest) * (positive.len() as f64 - 1.0) * 2.0;
            let node =
                PhysicalNode::MergeByShortestList(MergeByShortestListOp::new(Box::new(scan), verifiers));
            Ok(Self::wrap(node, cost, required, e))
        })());

        match best {
            Some(found) => Ok(found),
            None => Err(last_error
                .unwrap_or_else(|| Error::new(ErrorKind::Internal, "no physical strategy for AND"))),
        }
    }

    fn build_or(
        plan: &LogicalPlan,
        annotations: &[NodeAnnotation],
        idx: usize,
        required: OutputOrder,
        fuzzy: bool,
        phrases: &mut Vec<PhraseSpec>,
    ) -> Result<(PhysicalNode, f64)> {
        let node = plan.node(idx);
        let e = Self::est(annotations, idx);
        let mut children = Vec::new();
        let mut cost = 0.0;
        for &child in &node.children {
            if matches!(plan.node(child).kind, LogicalNodeKind::Not) {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "NOT is only supported as a child of AND",
                ));
            }
            let (built, c) = Self::build_node(plan, annotations, child, OutputOrder::ById, fuzzy, phrases)?;
            children.push(built);
            cost += c + Self::est(annotations, child);
        }
        let union = PhysicalNode::UnionSortedById(UnionSortedByIdOp::new(children));
        Ok(Self::wrap(union, cost, required, e))
    }

    /// The random-access twin of a subtree. Phrase leaves verify keyword
    /// membership only; their positional check is a post filter.
    fn build_verifier(
        plan: &LogicalPlan,
        annotations: &[NodeAnnotation],
        idx: usize,
        fuzzy: bool,
    ) -> Result<RandomAccessNode> {
        match &plan.node(idx).kind {
            LogicalNodeKind::Term(term) => Ok(RandomAccessNode::Term(RandomAccessTerm {
                active: Self::active_of(&annotations[idx], fuzzy)?,
                term_type: term.term_type,
                attribute_filter: term.attribute_filter.clone(),
                boost: term.boost,
            })),
            LogicalNodeKind::Phrase(spec) => {
                let annotation = &annotations[idx];
                let mut children = Vec::new();
                for keyword in &spec.keywords {
                    let active = annotation.phrase_active(keyword).ok_or_else(|| {
                        Error::new(ErrorKind::Internal, "phrase keyword lacks an active set")
                    })?;
                    children.push(RandomAccessNode::Term(RandomAccessTerm {
                        active,
                        term_type: TermType::Complete,
                        attribute_filter: spec.attribute_filter.clone(),
                        boost: spec.boost,
                    }));
                }
                Ok(RandomAccessNode::And(children))
            }
            LogicalNodeKind::Geo(_) => Err(Error::new(
                ErrorKind::InvalidArgument,
                "geo subtrees cannot be verified by random access",
            )),
            LogicalNodeKind::And => {
                let children = plan
                    .node(idx)
                    .children
                    .iter()
                    .map(|&c| Self::build_verifier(plan, annotations, c, fuzzy))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RandomAccessNode::And(children))
            }
            LogicalNodeKind::Or => {
                let children = plan
                    .node(idx)
                    .children
                    .iter()
                    .map(|&c| Self::build_verifier(plan, annotations, c, fuzzy))
                    .collect::<Result<Vec<_>>>()?;
                Ok(RandomAccessNode::Or(children))
            }
            LogicalNodeKind::Not => {
                let child = plan.node(idx).children[0];
                Ok(RandomAccessNode::Not(Box::new(Self::build_verifier(
                    plan, annotations, child, fuzzy,
                )?)))
            }
        }
    }
}

fn active_overhead(annotation: &NodeAnnotation) -> f64 {
    annotation
        .active_exact
        .as_ref()
        .map(|set| set.len() as f64 * 4.0)
        .unwrap_or(0.0)
}
