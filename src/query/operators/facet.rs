use std::collections::BTreeMap;
use crate::core::error::Result;
use crate::index::forward::ForwardList;
use crate::query::logical::FacetRequest;
use crate::schema::Schema;
use crate::search::results::FacetResult;

enum ResolvedFacet {
    Categorical {
        attribute: String,
        slot: usize,
        counts: BTreeMap<String, u64>,
    },
    Range {
        attribute: String,
        slot: usize,
        start: f64,
        end: f64,
        gap: f64,
        buckets: Vec<u64>,
        under: u64,
        over: u64,
    },
}

/// Post-operator aggregating refining-attribute histograms over the
/// records that survived matching and filtering.
pub struct FacetCollector {
    facets: Vec<ResolvedFacet>,
}

impl FacetCollector {
    /// Requests naming unknown attributes are dropped rather than failing
    /// the whole query.
    pub fn new(requests: &[FacetRequest], schema: &Schema) -> Self {
        let mut facets = Vec::new();
        for request in requests {
            match request {
                FacetRequest::Categorical { attribute } => {
                    if let Some(slot) = schema.refining_id(attribute) {
                        facets.push(ResolvedFacet::Categorical {
                            attribute: attribute.clone(),
                            slot,
                            counts: BTreeMap::new(),
                        });
                    }
                }
                FacetRequest::Range { attribute, start, end, gap } => {
                    if let Some(slot) = schema.refining_id(attribute) {
                        if *gap > 0.0 && end > start {
                            let n = ((end - start) / gap).ceil() as usize;
                            facets.push(ResolvedFacet::Range {
                                attribute: attribute.clone(),
                                slot,
                                start: *start,
                                end: *end,
                                gap: *gap,
                                buckets: vec![0; n],
                                under: 0,
                                over: 0,
                            });
                        }
                    }
                }
            }
        }
        FacetCollector { facets }
    }

    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    pub fn collect(&mut self, list: &ForwardList) -> Result<()> {
        for facet in self.facets.iter_mut() {
            match facet {
                ResolvedFacet::Categorical { slot, counts, .. } => {
                    for value in list.refining.values(*slot)? {
                        *counts.entry(value.label()).or_insert(0) += 1;
                    }
                }
                ResolvedFacet::Range { slot, start, end, gap, buckets, under, over, .. } => {
                    for value in list.refining.values(*slot)? {
                        let Some(x) = value.as_f64() else { continue };
                        if x < *start {
                            *under += 1;
                        } else if x >= *end {
                            *over += 1;
                        } else {
                            let bucket = ((x - *start) / *gap) as usize;
                            let idx = bucket.min(buckets.len() - 1);
                            buckets[idx] += 1;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn into_results(self) -> Vec<FacetResult> {
        self.facets
            .into_iter()
            .map(|facet| match facet {
                ResolvedFacet::Categorical { attribute, counts, .. } => FacetResult {
                    attribute,
                    buckets: counts.into_iter().collect(),
                },
                ResolvedFacet::Range { attribute, start, gap, buckets, under, over, .. } => {
                    let mut out = Vec::with_capacity(buckets.len() + 2);
                    if under > 0 {
                        out.push(("*".to_string(), under));
                    }
                    for (i, count) in buckets.into_iter().enumerate() {
                        out.push((format!("{}", start + gap * i as f64), count));
                    }
                    if over > 0 {
                        out.push(("*+".to_string(), over));
                    }
                    FacetResult { attribute, buckets: out }
                }
            })
            .collect()
    }
}
