use crate::core::error::Result;
use crate::geo::{GeoPoint, GeoRect};
use crate::query::physical::{ExecContext, PlanItem};

/// Rectangle scan against the pluggable quad-tree. With no geo index
/// configured the leaf yields nothing.
pub struct GeoSimpleOp {
    rect: GeoRect,
    hits: Vec<PlanItem>,
    emitted: usize,
}

impl GeoSimpleOp {
    pub fn new(rect: GeoRect) -> Self {
        GeoSimpleOp { rect, hits: Vec::new(), emitted: 0 }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.hits.clear();
        self.emitted = 0;
        if let Some(geo) = &ctx.geo {
            for (record, _point) in geo.search_rect(&self.rect) {
                if ctx.forward.is_valid(record) {
                    self.hits.push(PlanItem { record, score: 1.0, matched: Vec::new() });
                }
            }
            self.hits.sort_by_key(|item| item.record);
        }
        Ok(())
    }

    pub fn next(&mut self, _ctx: &ExecContext) -> Result<Option<PlanItem>> {
        let item = self.hits.get(self.emitted).cloned();
        if item.is_some() {
            self.emitted += 1;
        }
        Ok(item)
    }

    pub fn close(&mut self, _ctx: &ExecContext) {
        self.hits.clear();
    }
}

/// Nearest-neighbor scan; scores decay with distance so closer records
/// rank higher.
pub struct GeoNearestOp {
    origin: GeoPoint,
    limit: usize,
    hits: Vec<PlanItem>,
    emitted: usize,
}

impl GeoNearestOp {
    pub fn new(origin: GeoPoint, limit: usize) -> Self {
        GeoNearestOp { origin, limit, hits: Vec::new(), emitted: 0 }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.hits.clear();
        self.emitted = 0;
        if let Some(geo) = &ctx.geo {
            for (record, distance) in geo.nearest(self.origin, self.limit) {
                if ctx.forward.is_valid(record) {
                    let score = 1.0 / (1.0 + distance as f32);
                    self.hits.push(PlanItem { record, score, matched: Vec::new() });
                }
            }
        }
        Ok(())
    }

    pub fn next(&mut self, _ctx: &ExecContext) -> Result<Option<PlanItem>> {
        let item = self.hits.get(self.emitted).cloned();
        if item.is_some() {
            self.emitted += 1;
        }
        Ok(item)
    }

    pub fn close(&mut self, _ctx: &ExecContext) {
        self.hits.clear();
    }
}
