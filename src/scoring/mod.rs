/// The ranker turns per-occurrence metadata into the scores stored in the
/// inverted lists, and combines child scores during plan execution.
#[derive(Debug, Clone)]
pub struct Ranker {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Multiplier applied once per edit of fuzzy distance.
    pub fuzzy_penalty: f32,
    /// Boost added to a record for prior user feedback on the same query,
    /// scaled by click frequency and recency.
    pub feedback_boost: f32,
}

impl Default for Ranker {
    fn default() -> Self {
        Ranker { k1: 1.2, fuzzy_penalty: 0.5, feedback_boost: 2.0 }
    }
}

impl Ranker {
    /// Score of one (keyword, record) posting, computed at merge time and
    /// stored half-precision in the read view. `tf_boost_sum` is the
    /// tf × attribute-boost product from the forward list; `doc_count` the
    /// keyword's document count at merge time.
    pub fn term_record_score(
        &self,
        tf_boost_sum: f32,
        record_static_score: f32,
        doc_count: u32,
        total_records: u32,
    ) -> f32 {
        let idf = (((total_records as f32) + 1.0) / ((doc_count as f32) + 1.0)).ln() + 1.0;
        let tf = tf_boost_sum * (self.k1 + 1.0) / (tf_boost_sum + self.k1);
        tf * idf * record_static_score
    }

    /// Downweight a fuzzy match by edit distance.
    pub fn apply_edit_distance(&self, score: f32, distance: u8) -> f32 {
        score * self.fuzzy_penalty.powi(distance as i32)
    }

    /// Conjunctive and disjunctive nodes both accumulate child scores.
    pub fn combine(&self, scores: &[f32]) -> f32 {
        scores.iter().sum()
    }

    /// Feedback ranking: records clicked before for this query float up.
    /// `age_seconds` is measured from the most recent click.
    pub fn feedback_score(&self, base: f32, frequency: u32, age_seconds: i64) -> f32 {
        let recency = 1.0 / (1.0 + (age_seconds.max(0) as f32) / 86_400.0);
        base + self.feedback_boost * (frequency as f32).ln_1p() * recency
    }
}
