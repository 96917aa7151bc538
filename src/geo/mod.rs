use crate::core::types::RecordId;

/// A WGS-84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRect {
    pub min: GeoPoint,
    pub max: GeoPoint,
}

impl GeoRect {
    pub fn contains(&self, p: GeoPoint) -> bool {
        p.lat >= self.min.lat && p.lat <= self.max.lat && p.lng >= self.min.lng && p.lng <= self.max.lng
    }
}

/// Seam for a quad-tree record-location index. The engine itself does not
/// ship an implementation; a caller-provided one plugs into the geo plan
/// leaves and must honor the same snapshot discipline as the built-in
/// indexes (results for deleted records are filtered by the executor).
pub trait GeoIndex: Send + Sync {
    fn insert(&self, record: RecordId, point: GeoPoint);

    fn remove(&self, record: RecordId);

    /// Records inside the rectangle, unordered.
    fn search_rect(&self, rect: &GeoRect) -> Vec<(RecordId, GeoPoint)>;

    /// The n records nearest to the origin with their distances, nearest
    /// first.
    fn nearest(&self, origin: GeoPoint, n: usize) -> Vec<(RecordId, f64)>;
}
