use crate::core::error::Result;
use crate::query::physical::{ExecContext, PhysicalNode, PlanItem};

/// Materializing sort injected by the optimizer when a parent needs
/// id-ordered input the child cannot guarantee.
pub struct SortByIdOp {
    child: Box<PhysicalNode>,
    buffered: Vec<PlanItem>,
    emitted: usize,
}

impl SortByIdOp {
    pub fn new(child: Box<PhysicalNode>) -> Self {
        SortByIdOp { child, buffered: Vec::new(), emitted: 0 }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.buffered.clear();
        self.emitted = 0;
        self.child.open(ctx)?;
        while let Some(item) = self.child.next(ctx)? {
            self.buffered.push(item);
            if ctx.expired() {
                break;
            }
        }
        self.buffered.sort_by_key(|item| item.record);
        // Children built over overlapping keyword sets can emit a record
        // twice; keep the higher-scored occurrence.
        self.buffered.dedup_by(|a, b| {
            if a.record == b.record {
                if a.score > b.score {
                    std::mem::swap(a, b);
                }
                true
            } else {
                false
            }
        });
        Ok(())
    }

    pub fn next(&mut self, _ctx: &ExecContext) -> Result<Option<PlanItem>> {
        let item = self.buffered.get(self.emitted).cloned();
        if item.is_some() {
            self.emitted += 1;
        }
        Ok(item)
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        self.child.close(ctx);
        self.buffered.clear();
    }
}

/// Materializing sort to descending score, ties to the smaller record id.
pub struct SortByScoreOp {
    child: Box<PhysicalNode>,
    buffered: Vec<PlanItem>,
    emitted: usize,
}

impl SortByScoreOp {
    pub fn new(child: Box<PhysicalNode>) -> Self {
        SortByScoreOp { child, buffered: Vec::new(), emitted: 0 }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.buffered.clear();
        self.emitted = 0;
        self.child.open(ctx)?;
        while let Some(item) = self.child.next(ctx)? {
            self.buffered.push(item);
            if ctx.expired() {
                break;
            }
        }
        self.buffered
            .sort_by(|a, b| b.score.total_cmp(&a.score).then(a.record.cmp(&b.record)));
        Ok(())
    }

    pub fn next(&mut self, _ctx: &ExecContext) -> Result<Option<PlanItem>> {
        let item = self.buffered.get(self.emitted).cloned();
        if item.is_some() {
            self.emitted += 1;
        }
        Ok(item)
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        self.child.close(ctx);
        self.buffered.clear();
    }
}
