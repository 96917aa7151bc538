use std::collections::HashMap;
use std::sync::Arc;
use half::f16;
use crate::core::types::{ListId, RecordId};
use crate::scoring::Ranker;

/// One keyword's committed postings, sorted by score descending (ties by
/// record id ascending) for monotone top-K access, with the aggregate
/// statistics the histogram reads.
#[derive(Debug, Clone, Default)]
pub struct InvertedListReadView {
    postings: Vec<(RecordId, f16)>,
    pub max_score: f32,
}

impl InvertedListReadView {
    pub fn len(&self) -> u32 {
        self.postings.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn posting(&self, at: usize) -> Option<(RecordId, f32)> {
        self.postings.get(at).map(|&(rec, score)| (rec, score.to_f32()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (RecordId, f32)> + '_ {
        self.postings.iter().map(|&(rec, score)| (rec, score.to_f32()))
    }

    /// Stored half-precision postings, for persistence.
    pub fn raw_postings(&self) -> &[(RecordId, f16)] {
        &self.postings
    }

    /// Rebuild from stored postings (already score-descending).
    pub fn from_sorted_postings(postings: Vec<(RecordId, f16)>) -> Self {
        let max_score = postings.first().map(|p| p.1.to_f32()).unwrap_or(0.0);
        InvertedListReadView { postings, max_score }
    }
}

/// A posting awaiting merge. Scores are finalized by the merge workers,
/// which need the occurrence aggregates, not the caller's guess.
#[derive(Debug, Clone, Copy)]
pub struct PendingPosting {
    pub record: RecordId,
    pub tf_boost_sum: f32,
    pub static_score: f32,
}

/// Inverted-index snapshot: one read-view list per keyword, addressed by
/// the keyword's stable list id. Lists created since the last merge are
/// simply absent and read as empty.
#[derive(Clone)]
pub struct InvertedReadView {
    pub lists: Arc<Vec<Arc<InvertedListReadView>>>,
}

impl InvertedReadView {
    pub fn empty() -> Self {
        InvertedReadView { lists: Arc::new(Vec::new()) }
    }

    pub fn list(&self, list_id: ListId) -> Option<&Arc<InvertedListReadView>> {
        self.lists.get(list_id.0 as usize)
    }

    pub fn list_length(&self, list_id: ListId) -> u32 {
        self.list(list_id).map(|l| l.len()).unwrap_or(0)
    }

    pub fn doc_count(&self, list_id: ListId) -> u32 {
        self.list_length(list_id)
    }
}

/// The writer's side: committed lists shared with the read view, plus the
/// per-list delta tail awaiting merge.
pub struct InvertedWriter {
    lists: Vec<Arc<InvertedListReadView>>,
    pending: HashMap<ListId, Vec<PendingPosting>>,
}

impl InvertedWriter {
    pub fn new() -> Self {
        InvertedWriter { lists: Vec::new(), pending: HashMap::new() }
    }

    /// Writer-only append; invisible to readers until the next merge.
    pub fn append_posting(&mut self, list_id: ListId, posting: PendingPosting) {
        self.pending.entry(list_id).or_default().push(posting);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Committed document count, used for score estimation before merge.
    pub fn committed_len(&self, list_id: ListId) -> u32 {
        self.lists.get(list_id.0 as usize).map(|l| l.len()).unwrap_or(0)
    }

    /// Take the dirty lists for the merge workers: (list id, old read view
    /// if any, delta).
    pub fn take_pending(&mut self) -> Vec<MergeJob> {
        let mut jobs: Vec<MergeJob> = self
            .pending
            .drain()
            .map(|(list_id, delta)| MergeJob {
                list_id,
                old: self.lists.get(list_id.0 as usize).cloned(),
                delta,
            })
            .collect();
        jobs.sort_by_key(|j| j.list_id);
        jobs
    }

    /// Install merged lists produced by the workers, growing the list
    /// vector as needed. Runs before the read-view swap, so readers still
    /// observe the previous state.
    pub fn install_merged(&mut self, merged: Vec<(ListId, Arc<InvertedListReadView>)>) {
        for (list_id, list) in merged {
            let idx = list_id.0 as usize;
            if idx >= self.lists.len() {
                self.lists.resize_with(idx + 1, || Arc::new(InvertedListReadView::default()));
            }
            self.lists[idx] = list;
        }
    }

    pub fn read_view(&self) -> InvertedReadView {
        InvertedReadView { lists: Arc::new(self.lists.clone()) }
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn lists(&self) -> &[Arc<InvertedListReadView>] {
        &self.lists
    }

    pub fn restore(lists: Vec<Arc<InvertedListReadView>>) -> Self {
        InvertedWriter { lists, pending: HashMap::new() }
    }
}

impl Default for InvertedWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit of work handed to one merge worker.
pub struct MergeJob {
    pub list_id: ListId,
    pub old: Option<Arc<InvertedListReadView>>,
    pub delta: Vec<PendingPosting>,
}

/// Merge one keyword's delta into a fresh read-view list: finalize delta
/// scores through the ranker, sort descending, then merge with the old
/// list. A record reappearing in the delta supersedes its old posting.
pub fn merge_worker(job: &MergeJob, ranker: &Ranker, total_records: u32) -> Arc<InvertedListReadView> {
    let old_len = job.old.as_ref().map(|l| l.len()).unwrap_or(0);
    let doc_count = old_len + job.delta.len() as u32;

    let mut fresh: Vec<(RecordId, f16)> = job
        .delta
        .iter()
        .map(|p| {
            let score = ranker.term_record_score(p.tf_boost_sum, p.static_score, doc_count, total_records);
            (p.record, f16::from_f32(score))
        })
        .collect();
    // Descending by score, ascending by record id on ties.
    fresh.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    fresh.dedup_by_key(|p| p.0);

    let superseded: std::collections::HashSet<RecordId> = fresh.iter().map(|p| p.0).collect();

    let mut merged = Vec::with_capacity(fresh.len() + old_len as usize);
    let mut a = fresh.into_iter().peekable();
    let mut b = job
        .old
        .iter()
        .flat_map(|l| l.postings.iter().copied())
        .filter(|p| !superseded.contains(&p.0))
        .peekable();

    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if x.1.total_cmp(&y.1).then(y.0.cmp(&x.0)).is_ge() {
                    merged.push(a.next().unwrap());
                } else {
                    merged.push(b.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(a.next().unwrap()),
            (None, Some(_)) => merged.push(b.next().unwrap()),
            (None, None) => break,
        }
    }

    let max_score = merged.first().map(|p| p.1.to_f32()).unwrap_or(0.0);
    Arc::new(InvertedListReadView { postings: merged, max_score })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(rec: u32, tf: f32) -> PendingPosting {
        PendingPosting { record: RecordId(rec), tf_boost_sum: tf, static_score: 1.0 }
    }

    #[test]
    fn merge_produces_descending_unique_postings() {
        let mut writer = InvertedWriter::new();
        writer.append_posting(ListId(0), pending(1, 1.0));
        writer.append_posting(ListId(0), pending(2, 5.0));
        writer.append_posting(ListId(0), pending(3, 2.0));

        let ranker = Ranker::default();
        for job in writer.take_pending() {
            let merged = merge_worker(&job, &ranker, 10);
            writer.install_merged(vec![(job.list_id, merged)]);
        }

        let view = writer.read_view();
        let list = view.list(ListId(0)).unwrap();
        let scores: Vec<f32> = list.iter().map(|(_, s)| s).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        let mut records: Vec<u32> = list.iter().map(|(r, _)| r.0).collect();
        let before = records.len();
        records.dedup();
        assert_eq!(records.len(), before);
        assert_eq!(list.posting(0).unwrap().0, RecordId(2));
    }

    #[test]
    fn delta_supersedes_old_posting_for_same_record() {
        let mut writer = InvertedWriter::new();
        writer.append_posting(ListId(0), pending(7, 1.0));
        let ranker = Ranker::default();
        for job in writer.take_pending() {
            let merged = merge_worker(&job, &ranker, 10);
            writer.install_merged(vec![(job.list_id, merged)]);
        }

        writer.append_posting(ListId(0), pending(7, 4.0));
        writer.append_posting(ListId(0), pending(8, 2.0));
        for job in writer.take_pending() {
            let merged = merge_worker(&job, &ranker, 10);
            writer.install_merged(vec![(job.list_id, merged)]);
        }

        let view = writer.read_view();
        let list = view.list(ListId(0)).unwrap();
        assert_eq!(list.len(), 2);
        let records: Vec<u32> = list.iter().map(|(r, _)| r.0).collect();
        assert!(records.contains(&7) && records.contains(&8));
    }

    #[test]
    fn readers_keep_old_lists_until_swap() {
        let mut writer = InvertedWriter::new();
        writer.append_posting(ListId(0), pending(1, 1.0));
        let ranker = Ranker::default();
        for job in writer.take_pending() {
            writer.install_merged(vec![(job.list_id, merge_worker(&job, &ranker, 10))]);
        }
        let view = writer.read_view();
        assert_eq!(view.list_length(ListId(0)), 1);

        writer.append_posting(ListId(0), pending(2, 1.0));
        for job in writer.take_pending() {
            writer.install_merged(vec![(job.list_id, merge_worker(&job, &ranker, 10))]);
        }
        // The captured snapshot still reads the one-posting list.
        assert_eq!(view.list_length(ListId(0)), 1);
        assert_eq!(writer.read_view().list_length(ListId(0)), 2);
    }

    #[test]
    fn unknown_list_reads_empty() {
        let view = InvertedReadView::empty();
        assert_eq!(view.list_length(ListId(42)), 0);
        assert!(view.list(ListId(42)).is_none());
    }
}
