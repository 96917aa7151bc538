use crate::core::error::Result;
use crate::query::operators::random_access::RandomAccessNode;
use crate::query::physical::{ExecContext, PhysicalNode, PlanItem};

/// Stream AND over children sorted by record id: advance everyone to the
/// largest head until all heads agree.
pub struct MergeSortedByIdOp {
    children: Vec<PhysicalNode>,
    /// NOT subtrees excluded from iteration, checked per emitted record.
    not_verifiers: Vec<RandomAccessNode>,
    heads: Vec<Option<PlanItem>>,
}

impl MergeSortedByIdOp {
    pub fn new(children: Vec<PhysicalNode>, not_verifiers: Vec<RandomAccessNode>) -> Self {
        MergeSortedByIdOp { children, not_verifiers, heads: Vec::new() }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.heads.clear();
        for child in self.children.iter_mut() {
            child.open(ctx)?;
        }
        for child in self.children.iter_mut() {
            self.heads.push(child.next(ctx)?);
        }
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        if self.children.is_empty() {
            return Ok(None);
        }
        'outer: loop {
            if ctx.expired() {
                return Ok(None);
            }
            let mut target = None;
            for head in &self.heads {
                match head {
                    None => return Ok(None), // a drained child ends the AND
                    Some(item) => {
                        target = Some(match target {
                            None => item.record,
                            Some(t) => item.record.max(t),
                        });
                    }
                }
            }
            let target = target.expect("nonempty children");

            // Advance laggards; a child may overshoot, raising the target.
            for idx in 0..self.children.len() {
                while let Some(item) = &self.heads[idx] {
                    if item.record >= target {
                        break;
                    }
                    self.heads[idx] = self.children[idx].next(ctx)?;
                }
                match &self.heads[idx] {
                    None => return Ok(None),
                    Some(item) if item.record > target => continue 'outer,
                    Some(_) => {}
                }
            }

            // All heads sit on `target`: combine and refill.
            let mut score = 0.0;
            let mut matched = Vec::new();
            for idx in 0..self.children.len() {
                let item = self.heads[idx].take().expect("aligned head");
                score += item.score;
                matched.extend(item.matched);
                self.heads[idx] = self.children[idx].next(ctx)?;
            }

            for not in &self.not_verifiers {
                if not.verify(ctx, target)?.is_none() {
                    continue 'outer;
                }
            }

            return Ok(Some(PlanItem { record: target, score, matched }));
        }
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        for child in self.children.iter_mut() {
            child.close(ctx);
        }
        self.heads.clear();
    }
}

/// K-way OR merge over children sorted by record id; equal records are
/// deduplicated with their scores combined and match lists concatenated.
pub struct UnionSortedByIdOp {
    children: Vec<PhysicalNode>,
    heads: Vec<Option<PlanItem>>,
}

impl UnionSortedByIdOp {
    pub fn new(children: Vec<PhysicalNode>) -> Self {
        UnionSortedByIdOp { children, heads: Vec::new() }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.heads.clear();
        for child in self.children.iter_mut() {
            child.open(ctx)?;
        }
        for child in self.children.iter_mut() {
            self.heads.push(child.next(ctx)?);
        }
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        if ctx.expired() {
            return Ok(None);
        }
        let smallest = self
            .heads
            .iter()
            .filter_map(|h| h.as_ref().map(|item| item.record))
            .min();
        let Some(target) = smallest else { return Ok(None) };

        let mut score = 0.0;
        let mut matched = Vec::new();
        for idx in 0..self.children.len() {
            if self.heads[idx].as_ref().is_some_and(|item| item.record == target) {
                let item = self.heads[idx].take().expect("checked");
                score += item.score;
                matched.extend(item.matched);
                self.heads[idx] = self.children[idx].next(ctx)?;
            }
        }
        Ok(Some(PlanItem { record: target, score, matched }))
    }

    pub fn close(&mut self, ctx: &ExecContext) {
        for child in self.children.iter_mut() {
            child.close(ctx);
        }
        self.heads.clear();
    }
}
