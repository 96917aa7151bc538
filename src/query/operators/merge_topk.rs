use std::collections::BinaryHeap;
use roaring::RoaringBitmap;
use crate::core::error::Result;
use crate::query::operators::random_access::RandomAccessNode;
use crate::query::physical::{ExecContext, PhysicalNode, PlanItem, ScoreKey};

#[derive(Debug)]
struct Candidate {
    score: ScoreKey,
    item: PlanItem,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.item.record == other.item.record
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap on score; ties broken toward the smaller record id so
        // top-K prefixes are stable across K.
        self.score
            .cmp(&other.score)
            .then(other.item.record.cmp(&self.item.record))
    }
}

/// Threshold-algorithm AND over score-sorted children.
///
/// Children are pulled round robin; each unseen record is confirmed
/// against every other child through its random-access twin, and the
/// aggregated candidate enters a heap. The heap top is emitted once its
/// score can no longer be beaten by records not pulled yet (the sum of
/// the children's current heads bounds those from above).
pub struct MergeTopKOp {
    children: Vec<PhysicalNode>,
    verifiers: Vec<RandomAccessNode>,
    heads: Vec<Option<PlanItem>>,
    candidates: BinaryHeap<Candidate>,
    visited: RoaringBitmap,
    round_robin: usize,
}

impl MergeTopKOp {
    pub fn new(children: Vec<PhysicalNode>, verifiers: Vec<RandomAccessNode>) -> Self {
        MergeTopKOp {
            children,
            verifiers,
            heads: Vec::new(),
            candidates: BinaryHeap::new(),
            visited: RoaringBitmap::new(),
            round_robin: 0,
        }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.candidates.clear();
        self.visited.clear();
        self.round_robin = 0;
        self.heads.clear();
        for child in self.children.iter_mut() {
            child.open(ctx)?;
        }
        for child in self.children.iter_mut() {
            self.heads.push(child.next(ctx)?);
        }
        Ok(())
    }

    fn upper_bound(&self) -> Option<f32> {
        // None once any child drained: an AND can produce nothing new.
        let mut sum = 0.0;
        for head in &self.heads {
            sum += head.as_ref()?.score;
        }
        Some(sum)
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        if self.children.is_empty() {
            return Ok(None);
        }
        loop {
            if ctx.expired() {
                return Ok(None);
            }

            let bound = self.upper_bound();
            if let Some(top) = self.candidates.peek() {
                let emit = match bound {
                    None => true,
                    Some(bound) => top.score.0 > bound,
                };
                if emit {
                    return Ok(Some(self.candidates.pop().expect("peeked").item));
                }
            }

            // All children drained and no candidate beat the (absent)
            // bound above: the heap is empty too.
            if bound.is_none() {
                return Ok(self.candidates.pop().map(|c| c.item));
            }

            // Pull one record, round robin over children that still have
            // a head.
            let n = self.children.len();
            let mut pulled: Option<(usize, PlanItem)> = None;
            for step in 0..n {
                let idx = (self.round_robin + step) % n;
                if self.heads[idx].is_some() {
                    let item = self.heads[idx].take().expect("checked");
                    self.heads[idx] = self.children[idx].next(ctx)?;
                    self.round_robin = (idx + 1) % n;
                    pulled = Some((idx, item));
                    break;
                }
            }
            let Some((source, item)) = pulled else {
                return Ok(self.candidates.pop().map(|c| c.item));
            };

            if self.visited.contains(item.record.0) {
                continue;
            }
            self.visited.insert(item.record.0);

            // Random-access verification against every other child.
            let mut total = item.score;
            let mut matched = item.matched.clone();
            let mut confirmed = true;
            for (idx, verifier) in self.verifiers.iter().enumerate() {
                if idx == source {
                    continue;
                }
                match verifier.verify(ctx, item.record)? {
                    Some(v) => {
                        total += v.score;
                        matched.extend(v.matched);
                    }
                    None => {
                        confirmed = false;
                        break;
                    }
                }
            }
            if confirmed {
                self.candidates.push(Candidate {
                    score: ScoreKey(total),
                    item: PlanItem { record: item.record, score: total, matched },
                });
            }
        }
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        for child in self.children.iter_mut() {
            child.close(ctx);
        }
        self.heads.clear();
        self.candidates.clear();
        self.visited.clear();
    }
}
