use crate::core::error::Result;
use crate::query::operators::random_access::RandomAccessNode;
use crate::query::physical::{ExecContext, PhysicalNode, PlanItem};

/// AND strategy for skewed children: scan only the child estimated to
/// produce the fewest records and confirm each of its records against
/// every other subtree by random access.
pub struct MergeByShortestListOp {
    shortest: Box<PhysicalNode>,
    /// Verifiers for every other child, NOT subtrees included.
    verifiers: Vec<RandomAccessNode>,
}

impl MergeByShortestListOp {
    pub fn new(shortest: Box<PhysicalNode>, verifiers: Vec<RandomAccessNode>) -> Self {
        MergeByShortestListOp { shortest, verifiers }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.shortest.open(ctx)
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        while let Some(item) = self.shortest.next(ctx)? {
            if ctx.expired() {
                return Ok(None);
            }
            let mut score = item.score;
            let mut matched = item.matched.clone();
            let mut confirmed = true;
            for verifier in &self.verifiers {
                match verifier.verify(ctx, item.record)? {
                    Some(v) => {
                        score += v.score;
                        matched.extend(v.matched);
                    }
                    None => {
                        confirmed = false;
                        break;
                    }
                }
            }
            if confirmed {
                return Ok(Some(PlanItem { record: item.record, score, matched }));
            }
        }
        Ok(None)
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        self.shortest.close(ctx);
    }
}
