use std::collections::HashMap;
use crate::core::types::RecordId;
use crate::index::feedback::FeedbackReadView;
use crate::query::physical::PlanItem;
use crate::scoring::Ranker;

/// Post-operator lifting records the user clicked before for the same
/// query string. Runs after matching, before the final cut to top-K.
pub struct FeedbackRanker {
    boosts: HashMap<RecordId, (u32, i64)>,
    now: i64,
}

impl FeedbackRanker {
    pub fn new(feedback: &FeedbackReadView, query: &str, now: i64) -> Self {
        let mut boosts = HashMap::new();
        if let Some(entries) = feedback.entries(query) {
            for entry in entries {
                boosts.insert(entry.record, (entry.frequency, entry.timestamp));
            }
        }
        FeedbackRanker { boosts, now }
    }

    pub fn is_empty(&self) -> bool {
        self.boosts.is_empty()
    }

    /// Rescore and restore descending order.
    pub fn apply(&self, ranker: &Ranker, items: &mut [PlanItem]) {
        if self.boosts.is_empty() {
            return;
        }
        for item in items.iter_mut() {
            if let Some(&(frequency, timestamp)) = self.boosts.get(&item.record) {
                let age = (self.now - timestamp).max(0);
                item.score = ranker.feedback_score(item.score, frequency, age);
            }
        }
        items.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.record.cmp(&b.record)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::feedback::FeedbackWriter;

    #[test]
    fn clicked_records_float_above_equal_scores() {
        let mut writer = FeedbackWriter::new(10, 10);
        writer.add_feedback("q", RecordId(2), 1_000);
        writer.merge();
        let view = writer.read_view();

        let feedback = FeedbackRanker::new(&view, "q", 2_000);
        let mut items = vec![
            PlanItem { record: RecordId(1), score: 1.0, matched: Vec::new() },
            PlanItem { record: RecordId(2), score: 1.0, matched: Vec::new() },
        ];
        feedback.apply(&Ranker::default(), &mut items);
        assert_eq!(items[0].record, RecordId(2));
        assert!(items[0].score > items[1].score);
    }

    #[test]
    fn unknown_query_applies_nothing() {
        let writer = FeedbackWriter::new(10, 10);
        let feedback = FeedbackRanker::new(&writer.read_view(), "other", 0);
        assert!(feedback.is_empty());
    }
}
