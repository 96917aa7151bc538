use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::analysis::Analyzer;
use crate::core::config::IndexerConfig;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    AclOp, Record, RecordId, RecordLookup, MAX_KEYWORDS_PER_RECORD,
    MULTI_VALUED_ATTRIBUTE_POSITION_BUMP,
};
use crate::geo::GeoIndex;
use crate::index::feedback::FeedbackWriter;
use crate::index::forward::{AttributeOccurrence, ForwardList, ForwardReadView, ForwardWriter, KeywordEntry};
use crate::index::histogram::HistogramManager;
use crate::index::inverted::{InvertedReadView, InvertedWriter, PendingPosting};
use crate::index::trie::{TrieReadView, TrieWriter};
use crate::merge::{MergeWorkerPool, SchedulerSignal, SchedulerTick};
use crate::query::cache::PlanCache;
use crate::query::logical::LogicalPlan;
use crate::query::physical::{ExecContext, PlanItem};
use crate::schema::Schema;
use crate::scoring::Ranker;
use crate::search::active_nodes::ActiveNodeCache;
use crate::search::executor::QueryExecutor;
use crate::search::results::{QueryResults, ResultItem};
use crate::snapshot::{SnapshotManager, ViewSlot};
use crate::index::feedback::FeedbackReadView;
use crate::storage;

/// Largest finite half-precision value; record boosts saturate here.
const MAX_RECORD_BOOST: f32 = 65504.0;

/// The writer's scratch state for all four indexes, guarded by one
/// process-wide mutex: exactly one writer at a time.
struct WriterState {
    trie: TrieWriter,
    forward: ForwardWriter,
    inverted: InvertedWriter,
    feedback: FeedbackWriter,
}

struct IndexerCore {
    schema: Schema,
    config: IndexerConfig,
    analyzer: Arc<dyn Analyzer>,
    ranker: Ranker,

    snapshots: SnapshotManager,
    writer: Mutex<WriterState>,

    trie_view: ViewSlot<TrieReadView>,
    forward_view: ViewSlot<ForwardReadView>,
    inverted_view: ViewSlot<InvertedReadView>,
    feedback_view: ViewSlot<FeedbackReadView>,

    active_cache: ActiveNodeCache,
    plan_cache: PlanCache,
    pool: MergeWorkerPool,
    signal: SchedulerSignal,

    writes_since_merge: AtomicU64,
    writes_since_histogram: AtomicU64,
    merges_since_histogram: AtomicU64,

    geo: RwLock<Option<Arc<dyn GeoIndex>>>,
}

/// The engine handle: one writer, unbounded readers. Mutations go to the
/// write views and become reader-visible at the next merge (deletions
/// excepted: the validity bit is shared and takes effect at once). A
/// background scheduler merges every `merge_every_n_seconds` or after
/// `merge_every_m_writes` writes, whichever comes first.
pub struct Indexer {
    core: Arc<IndexerCore>,
    scheduler: Option<JoinHandle<()>>,
}

impl Indexer {
    pub fn create(schema: Schema, analyzer: Arc<dyn Analyzer>, config: IndexerConfig) -> Result<Indexer> {
        schema.validate()?;
        let writer = WriterState {
            trie: TrieWriter::new(),
            forward: ForwardWriter::new(),
            inverted: InvertedWriter::new(),
            feedback: FeedbackWriter::new(config.max_feedback_queries, config.max_feedback_per_query),
        };
        Self::build(schema, analyzer, config, writer)
    }

    /// Reopen a previously saved index from `config.storage_path`.
    pub fn load(analyzer: Arc<dyn Analyzer>, config: IndexerConfig) -> Result<Indexer> {
        let loaded = storage::load_from_dir(&config.storage_path)?;
        let writer = WriterState {
            trie: loaded.trie,
            forward: loaded.forward,
            inverted: loaded.inverted,
            feedback: loaded.feedback,
        };
        Self::build(loaded.schema, analyzer, config, writer)
    }

    fn build(
        schema: Schema,
        analyzer: Arc<dyn Analyzer>,
        config: IndexerConfig,
        mut writer: WriterState,
    ) -> Result<Indexer> {
        let trie_view = ViewSlot::new(writer.trie.read_view());
        let forward_view = ViewSlot::new(writer.forward.read_view());
        let inverted_view = ViewSlot::new(writer.inverted.read_view());
        let feedback_view = ViewSlot::new(writer.feedback.read_view());

        let core = Arc::new(IndexerCore {
            ranker: Ranker {
                fuzzy_penalty: config.fuzzy_match_penalty,
                ..Ranker::default()
            },
            analyzer,
            snapshots: SnapshotManager::new(),
            writer: Mutex::new(writer),
            trie_view,
            forward_view,
            inverted_view,
            feedback_view,
            active_cache: ActiveNodeCache::new(config.active_node_cache_entries),
            plan_cache: PlanCache::new(config.plan_cache_entries),
            pool: MergeWorkerPool::new(config.merge_workers),
            signal: SchedulerSignal::new(),
            writes_since_merge: AtomicU64::new(0),
            writes_since_histogram: AtomicU64::new(0),
            merges_since_histogram: AtomicU64::new(0),
            geo: RwLock::new(None),
            schema,
            config,
        });

        let scheduler_core = Arc::clone(&core);
        let scheduler = std::thread::Builder::new()
            .name("merge-scheduler".to_string())
            .spawn(move || {
                let interval =
                    Duration::from_secs(scheduler_core.config.merge_every_n_seconds.max(1));
                loop {
                    match scheduler_core.signal.wait_tick(interval) {
                        SchedulerTick::Stop => break,
                        SchedulerTick::Merge => scheduler_core.scheduled_merge(),
                    }
                }
            })
            .map_err(|e| Error::new(ErrorKind::Internal, format!("cannot spawn scheduler: {e}")))?;

        Ok(Indexer { core, scheduler: Some(scheduler) })
    }

    pub fn schema(&self) -> &Schema {
        &self.core.schema
    }

    pub fn set_geo_index(&self, geo: Arc<dyn GeoIndex>) {
        *self.core.geo.write() = Some(geo);
    }

    /// Index one record: analyze its searchable attributes, grow the
    /// keyword dictionary, build the forward list, and queue postings.
    /// Visible to readers after the next merge.
    pub fn add_record(&self, record: &Record) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();

        match writer.forward.lookup_external(&record.external_id) {
            (RecordLookup::Present, _) | (RecordLookup::ToBeInserted, _) => {
                return Err(Error::new(
                    ErrorKind::DuplicatePrimaryKey,
                    format!("record '{}' already exists", record.external_id),
                ));
            }
            _ => {}
        }

        let analyzed = core.analyze(record);
        if analyzed.len() > MAX_KEYWORDS_PER_RECORD {
            return Err(Error::new(
                ErrorKind::KeywordLimitExceeded,
                format!("record '{}' has {} distinct keywords", record.external_id, analyzed.len()),
            ));
        }

        let boost = core.record_boost(record).clamp(0.0, MAX_RECORD_BOOST);

        let mut entries = Vec::with_capacity(analyzed.len());
        for (keyword, draft) in analyzed {
            let handle = writer.trie.add_keyword(&keyword)?;
            entries.push(KeywordEntry {
                keyword_id: handle.keyword_id,
                list_id: handle.list_id,
                tf_boost_sum: draft.tf_boost_sum,
                static_score: boost,
                occurrences: draft.occurrences.into_values().collect(),
            });
        }

        let refining_slots = core.refining_slots(record);
        let list = ForwardList::build(
            record.external_id.clone(),
            entries.clone(),
            &refining_slots,
            boost,
            record.roles.clone(),
            record.payload.clone(),
        )?;
        let rec = writer.forward.add(list)?;

        for entry in entries {
            writer.inverted.append_posting(
                entry.list_id,
                PendingPosting {
                    record: rec,
                    tf_boost_sum: entry.tf_boost_sum,
                    static_score: boost,
                },
            );
        }

        drop(writer);
        core.after_write();
        Ok(())
    }

    /// Clear the record's validity bit. Takes effect immediately, even
    /// for queries running on older snapshots; storage is collected by a
    /// later merge once nothing references it.
    pub fn delete_record(&self, external_id: &str) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();
        // A pending id reassignment invalidates the leaf walk a delete
        // depends on; merge first.
        if writer.trie.needs_reassignment() {
            core.merge_locked(&mut writer);
        }
        writer.forward.mark_deleted(external_id)?;
        drop(writer);
        core.after_write();
        Ok(())
    }

    /// Undo a deletion by primary key and internal id.
    pub fn recover_record(&self, external_id: &str, internal: RecordId) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();
        writer.forward.recover(external_id, internal)?;
        drop(writer);
        core.after_write();
        Ok(())
    }

    pub fn lookup_record(&self, external_id: &str) -> (RecordLookup, Option<RecordId>) {
        self.core.writer.lock().forward.lookup_external(external_id)
    }

    pub fn acl_modify_roles(&self, external_id: &str, roles: &[String], op: AclOp) -> Result<()> {
        let core = &self.core;
        let writer = core.writer.lock();
        writer.forward.acl_modify(external_id, op, roles)?;
        drop(writer);
        core.plan_cache.clear();
        Ok(())
    }

    /// Remember a clicked record for a query string; boosts later
    /// executions of the same query once merged.
    pub fn add_feedback(&self, query: &str, external_id: &str) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();
        let (_, rec) = writer.forward.lookup_external(external_id);
        let rec = rec.ok_or_else(|| {
            Error::new(ErrorKind::RecordNotFound, format!("no record '{}'", external_id))
        })?;
        writer.feedback.add_feedback(query, rec, Utc::now().timestamp());
        drop(writer);
        core.after_write();
        Ok(())
    }

    /// Force a merge now: apply the write views to fresh read views and
    /// swap them in.
    pub fn commit(&self) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();
        core.merge_locked(&mut writer);
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = self.core.config.storage_path.clone();
        self.save_to(&path)
    }

    pub fn save_to(&self, dir: &Path) -> Result<()> {
        let core = &self.core;
        let mut writer = core.writer.lock();
        // Persist the merged state so a fresh load is query-identical.
        core.merge_locked(&mut writer);
        storage::save_to_dir(dir, &core.schema, &writer.trie, &writer.forward, &writer.inverted, &writer.feedback)
    }

    /// Evaluate a logical plan against one consistent snapshot of all
    /// four indexes. Runs exact first; when fewer than K results come
    /// back and the plan tolerates typos, the fuzzy pass fills the rest.
    pub fn search(&self, plan: &LogicalPlan) -> Result<QueryResults> {
        let core = &self.core;
        let started = Instant::now();

        // Guard held for the whole call; the merger can only swap views
        // in between queries.
        let _guard = core.snapshots.reader_guard();
        let forward = (*core.forward_view.load()).clone();
        let total_records = forward.record_count();
        let ctx = ExecContext {
            trie: (*core.trie_view.load()).clone(),
            forward,
            inverted: (*core.inverted_view.load()).clone(),
            feedback: (*core.feedback_view.load()).clone(),
            ranker: core.ranker.clone(),
            total_records,
            deadline: plan.max_time_ms.map(|ms| started + Duration::from_millis(ms)),
            geo: core.geo.read().clone(),
        };

        let cache_key = plan.unique_string();
        let feedback_bypass = plan
            .query_text
            .as_deref()
            .map(|q| ctx.feedback.has_feedback(q))
            .unwrap_or(false);
        if !feedback_bypass {
            if let Some(mut cached) = core.plan_cache.get(&cache_key) {
                cached.took_ms = started.elapsed().as_millis() as u64;
                return Ok(cached);
            }
        }

        let now = Utc::now().timestamp();
        let exact = QueryExecutor::run(plan, &core.schema, &ctx, &core.active_cache, false, now)?;
        let mut items = exact.items;
        let mut facets = exact.facets;
        let mut approximate = exact.approximate;

        if items.len() < plan.top_k && plan.max_edit_threshold() > 0 {
            let fuzzy = QueryExecutor::run(plan, &core.schema, &ctx, &core.active_cache, true, now)?;
            let have: HashSet<RecordId> = items.iter().map(|i| i.record).collect();
            for item in fuzzy.items {
                if items.len() >= plan.top_k {
                    break;
                }
                if !have.contains(&item.record) {
                    items.push(item);
                }
            }
            if !fuzzy.facets.is_empty() {
                facets = fuzzy.facets;
            }
            approximate |= fuzzy.approximate;
        }

        let items = items
            .into_iter()
            .map(|item| result_item(&ctx, item))
            .collect::<Result<Vec<_>>>()?;
        let results = QueryResults {
            items,
            facets,
            approximate,
            took_ms: started.elapsed().as_millis() as u64,
        };

        if !approximate && !feedback_bypass {
            core.plan_cache.put(cache_key, results.clone());
        }
        Ok(results)
    }

    /// Completions of a (possibly misspelled) keyword, ranked by subtree
    /// probability scaled by the edit-distance penalty.
    pub fn suggest(&self, keyword: &str, penalty: f32, n: usize) -> Result<Vec<String>> {
        let core = &self.core;
        let _guard = core.snapshots.reader_guard();
        let trie = (*core.trie_view.load()).clone();

        let active = core.active_cache.get(&trie, keyword, core.config.default_edit_threshold);
        let mut ranked: BTreeMap<u32, f64> = BTreeMap::new();
        for node in active.iter() {
            let mut terminals = Vec::new();
            trie.terminals_in_subtree(node.node, &mut terminals);
            let factor = (penalty as f64).powi(node.distance as i32);
            for terminal in terminals {
                let score = trie.node(terminal).probability.max(f64::MIN_POSITIVE) * factor;
                let slot = ranked.entry(terminal).or_insert(0.0);
                if score > *slot {
                    *slot = score;
                }
            }
        }
        let mut completions: Vec<(u32, f64)> = ranked.into_iter().collect();
        completions.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(completions
            .into_iter()
            .take(n)
            .map(|(node, _)| trie.keyword_text(node))
            .collect())
    }

    pub fn record_count(&self) -> u32 {
        self.core.forward_view.load().record_count()
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.core.signal.request_stop();
        if let Some(handle) = self.scheduler.take() {
            let _ = handle.join();
        }
    }
}

fn result_item(ctx: &ExecContext, item: PlanItem) -> Result<ResultItem> {
    let list = ctx
        .forward
        .record(item.record)
        .ok_or_else(|| Error::new(ErrorKind::Internal, "result references an unknown record"))?;
    let mut matching_keywords = Vec::with_capacity(item.matched.len());
    let mut edit_distances = Vec::with_capacity(item.matched.len());
    for matched in &item.matched {
        matching_keywords.push(ctx.trie.keyword_text(matched.trie_node));
        edit_distances.push(matched.distance);
    }
    Ok(ResultItem {
        external_id: list.external_id.clone(),
        record: item.record,
        score: item.score,
        matching_keywords,
        edit_distances,
        payload: list.payload.clone(),
    })
}

/// Per-keyword accumulation while analyzing one record.
struct KeywordDraft {
    tf_boost_sum: f32,
    occurrences: BTreeMap<u32, AttributeOccurrence>,
}

impl IndexerCore {
    /// Tokenize every searchable attribute and group occurrences by
    /// keyword. Positions of later values of a multi-valued attribute
    /// are bumped so phrases cannot straddle value boundaries.
    fn analyze(&self, record: &Record) -> BTreeMap<String, KeywordDraft> {
        let mut drafts: BTreeMap<String, KeywordDraft> = BTreeMap::new();
        for (attr_id, attr) in self.schema.searchable.iter().enumerate() {
            let Some(values) = record.searchable.get(&attr.name) else { continue };
            for (value_idx, value) in values.iter().enumerate() {
                let bump = value_idx as u32 * MULTI_VALUED_ATTRIBUTE_POSITION_BUMP;
                for token in self.analyzer.analyze(value) {
                    let draft = drafts.entry(token.text.clone()).or_insert_with(|| KeywordDraft {
                        tf_boost_sum: 0.0,
                        occurrences: BTreeMap::new(),
                    });
                    draft.tf_boost_sum += attr.boost;
                    let occurrence =
                        draft.occurrences.entry(attr_id as u32).or_insert_with(|| AttributeOccurrence {
                            attribute: attr_id as u32,
                            positions: Vec::new(),
                            char_offsets: Vec::new(),
                            synonym_flags: Vec::new(),
                            synonym_char_lens: Vec::new(),
                        });
                    occurrence.positions.push(token.position + bump);
                    occurrence.char_offsets.push(token.char_offset);
                    occurrence.synonym_flags.push(token.is_synonym());
                    if let Some(len) = token.synonym_original_len {
                        occurrence.synonym_char_lens.push(len);
                    }
                }
            }
        }
        drafts
    }

    fn record_boost(&self, record: &Record) -> f32 {
        if let Some(boost) = record.boost {
            return boost;
        }
        if let Some(attr) = &self.schema.record_boost_attribute {
            if let Some(values) = record.refining.get(attr) {
                if let Some(v) = values.first().and_then(|v| v.as_f64()) {
                    return v as f32;
                }
            }
        }
        1.0
    }

    /// One slot per refining attribute in schema order, defaults filled.
    fn refining_slots(&self, record: &Record) -> Vec<Vec<crate::core::types::RefiningValue>> {
        self.schema
            .refining
            .iter()
            .map(|attr| match record.refining.get(&attr.name) {
                Some(values) if !values.is_empty() => values.clone(),
                _ => vec![attr.default.clone()],
            })
            .collect()
    }

    fn after_write(&self) {
        self.plan_cache.clear();
        let writes = self.writes_since_merge.fetch_add(1, Ordering::SeqCst) + 1;
        self.writes_since_histogram.fetch_add(1, Ordering::SeqCst);
        if writes >= self.config.merge_every_m_writes {
            self.signal.request_merge();
        }
    }

    fn scheduled_merge(&self) {
        let mut writer = self.writer.lock();
        let dirty = self.writes_since_merge.load(Ordering::SeqCst) > 0
            || writer.inverted.has_pending()
            || writer.trie.needs_reassignment();
        if dirty {
            self.merge_locked(&mut writer);
        }
    }

    /// The merge pass. Expensive work happens under the writer mutex
    /// only; readers are blocked just for the pointer swap at the end.
    /// Order within one tick: id reassignment, inverted merge, feedback
    /// merge, then (at most once) the histogram refresh.
    fn merge_locked(&self, writer: &mut WriterState) {
        if writer.trie.needs_reassignment() {
            let mapping = writer.trie.reassign_ids();
            if let Err(err) = writer.forward.rewrite_keyword_ids(&mapping) {
                // The trie is already consistent with the new ids; a
                // forward list that cannot be rewritten is unrecoverable.
                debug_assert!(false, "forward rewrite failed: {err}");
            }
        }

        let total_records = writer.forward.record_count();
        let jobs = writer.inverted.take_pending();
        if !jobs.is_empty() {
            let merged = self.pool.run_batch(jobs, &self.ranker, total_records);
            writer.inverted.install_merged(merged);
        }

        writer.feedback.merge();

        let merges = self.merges_since_histogram.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh_due = merges >= self.config.update_histogram_every_p_merges
            || self.writes_since_histogram.load(Ordering::SeqCst)
                >= self.config.update_histogram_every_q_writes;
        if refresh_due {
            HistogramManager::refresh(&mut writer.trie, &writer.inverted, total_records);
            self.merges_since_histogram.store(0, Ordering::SeqCst);
            self.writes_since_histogram.store(0, Ordering::SeqCst);
        }

        let trie_view = writer.trie.read_view();
        let forward_view = writer.forward.read_view();
        let inverted_view = writer.inverted.read_view();
        let feedback_view = writer.feedback.read_view();

        {
            // The only window where readers are held off.
            let _swap = self.snapshots.swap_guard();
            self.trie_view.install(Arc::new(trie_view));
            self.forward_view.install(Arc::new(forward_view));
            self.inverted_view.install(Arc::new(inverted_view));
            self.feedback_view.install(Arc::new(feedback_view));
        }

        self.writes_since_merge.store(0, Ordering::SeqCst);
        self.active_cache.clear();
        self.plan_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::StandardAnalyzer;
    use crate::core::types::{AttributeFilter, RefiningType, RefiningValue, TermType};
    use crate::query::filter::FilterQuery;
    use crate::query::logical::{FacetRequest, SortSpec, TermSpec};

    fn test_config() -> IndexerConfig {
        IndexerConfig {
            // Keep the scheduler quiet; tests drive merges through commit.
            merge_every_n_seconds: 3600,
            merge_every_m_writes: u64::MAX,
            update_histogram_every_p_merges: 1,
            ..Default::default()
        }
    }

    fn title_schema() -> Schema {
        Schema::new("id").add_searchable("title", 1.0)
    }

    fn indexer_with(titles: &[(&str, &str)]) -> Indexer {
        let indexer =
            Indexer::create(title_schema(), Arc::new(StandardAnalyzer::default()), test_config())
                .unwrap();
        for (id, title) in titles {
            let mut record = Record::new(*id);
            record.set_searchable("title", *title);
            indexer.add_record(&record).unwrap();
        }
        indexer.commit().unwrap();
        indexer
    }

    fn term_plan(keyword: &str, term_type: TermType, edit: u8, k: usize) -> LogicalPlan {
        let mut plan = LogicalPlan::new(k);
        let term = plan.term(TermSpec {
            keyword: keyword.to_string(),
            term_type,
            edit_threshold: edit,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        plan.set_root(term);
        plan
    }

    fn search_ids(indexer: &Indexer, plan: &LogicalPlan) -> Vec<String> {
        let mut ids: Vec<String> =
            indexer.search(plan).unwrap().items.into_iter().map(|i| i.external_id).collect();
        ids.sort();
        ids
    }

    fn complete(indexer: &Indexer, keyword: &str) -> Vec<String> {
        search_ids(indexer, &term_plan(keyword, TermType::Complete, 0, 10))
    }

    #[test]
    fn single_keyword_lookups_find_their_records() {
        let indexer = indexer_with(&[
            ("r1", "tom smith jack lennon"),
            ("r2", "george harris"),
            ("r3", "pink floyd"),
        ]);
        assert_eq!(complete(&indexer, "tom"), vec!["r1"]);
        assert_eq!(complete(&indexer, "pink"), vec!["r3"]);
        assert_eq!(complete(&indexer, "floyd"), vec!["r3"]);
        assert!(complete(&indexer, "absent").is_empty());
    }

    #[test]
    fn delete_then_recover_round_trips_through_merges() {
        let indexer = indexer_with(&[
            ("r1", "tom smith jack lennon"),
            ("r2", "george harris"),
            ("r3", "pink floyd"),
        ]);

        // Deletion is visible before any merge.
        indexer.delete_record("r1").unwrap();
        assert!(complete(&indexer, "tom").is_empty());

        indexer.commit().unwrap();
        assert!(complete(&indexer, "tom").is_empty());

        let (_, internal) = indexer.lookup_record("r1");
        indexer.recover_record("r1", internal.unwrap()).unwrap();
        indexer.commit().unwrap();
        assert_eq!(complete(&indexer, "tom"), vec!["r1"]);
    }

    #[test]
    fn every_insert_stays_searchable_under_shared_tokens() {
        let indexer =
            Indexer::create(title_schema(), Arc::new(StandardAnalyzer::default()), test_config())
                .unwrap();
        for i in 1..=40u32 {
            let mut record = Record::new(format!("r{i}"));
            record.set_searchable("title", format!("aaa0 aaa{i} aaaz"));
            indexer.add_record(&record).unwrap();
            indexer.commit().unwrap();
            assert_eq!(complete(&indexer, &format!("aaa{i}")), vec![format!("r{i}")]);
        }
        assert_eq!(complete(&indexer, "aaa0").len(), 40);
    }

    #[test]
    fn id_reassignment_keeps_results_identical() {
        // Each keyword sorts before all previous ones, halving the id gap
        // below the smallest assigned id until reassignment triggers.
        let indexer =
            Indexer::create(title_schema(), Arc::new(StandardAnalyzer::default()), test_config())
                .unwrap();
        for i in 0..40u32 {
            let keyword = format!("{}b", "a".repeat(i as usize + 1));
            let mut record = Record::new(format!("r{i}"));
            record.set_searchable("title", format!("{keyword} shared"));
            indexer.add_record(&record).unwrap();
            indexer.commit().unwrap();
            assert_eq!(complete(&indexer, &keyword), vec![format!("r{i}")]);
        }
        assert_eq!(complete(&indexer, "shared").len(), 40);
    }

    #[test]
    fn categorical_facets_count_every_match() {
        let schema = Schema::new("id")
            .add_searchable("title", 1.0)
            .add_refining("class", RefiningType::Text, RefiningValue::Text(String::new()));
        let indexer =
            Indexer::create(schema, Arc::new(StandardAnalyzer::default()), test_config()).unwrap();
        for (i, class) in ["A", "A", "B", "B", "C", "C", "D", "E"].iter().enumerate() {
            let mut record = Record::new(format!("r{i}"));
            record.set_searchable("title", "item");
            record.set_refining("class", RefiningValue::Text(class.to_string()));
            indexer.add_record(&record).unwrap();
        }
        indexer.commit().unwrap();

        let mut plan = term_plan("item", TermType::Complete, 0, 10);
        plan.facets.push(FacetRequest::Categorical { attribute: "class".into() });
        let results = indexer.search(&plan).unwrap();
        assert_eq!(results.facets.len(), 1);
        assert_eq!(
            results.facets[0].buckets,
            vec![
                ("A".to_string(), 2),
                ("B".to_string(), 2),
                ("C".to_string(), 2),
                ("D".to_string(), 1),
                ("E".to_string(), 1),
            ]
        );
    }

    #[test]
    fn fuzzy_prefix_and_complete_matching() {
        let indexer = indexer_with(&[
            ("r1", "Pink Floyd"),
            ("r2", "Pinksyponzi Floydsyponzi"),
            ("r3", "U2 Pink"),
        ]);

        let plan = term_plan("pionn", TermType::Prefix, 2, 10);
        assert_eq!(search_ids(&indexer, &plan), vec!["r1", "r2", "r3"]);

        let plan = term_plan("pgnk", TermType::Complete, 2, 10);
        assert_eq!(search_ids(&indexer, &plan), vec!["r1", "r3"]);
    }

    #[test]
    fn save_then_load_reproduces_search_output() {
        let dir = tempfile::tempdir().unwrap();
        let schema = Schema::new("id").add_searchable("title", 1.0);
        let indexer =
            Indexer::create(schema, Arc::new(StandardAnalyzer::default()), test_config()).unwrap();
        for i in 0..1000u32 {
            let mut record = Record::new(format!("r{i}"));
            record.set_searchable("title", format!("alpha token{} beta{}", i % 50, i % 7));
            indexer.add_record(&record).unwrap();
        }
        indexer.commit().unwrap();

        let queries: Vec<LogicalPlan> = (0..10)
            .map(|j| term_plan(&format!("token{j}"), TermType::Complete, 0, 30))
            .collect();
        let expected: Vec<Vec<(String, f32)>> = queries
            .iter()
            .map(|plan| {
                indexer
                    .search(plan)
                    .unwrap()
                    .items
                    .into_iter()
                    .map(|item| (item.external_id, item.score))
                    .collect()
            })
            .collect();

        indexer.save_to(dir.path()).unwrap();
        drop(indexer);

        let config = IndexerConfig { storage_path: dir.path().to_path_buf(), ..test_config() };
        let reloaded = Indexer::load(Arc::new(StandardAnalyzer::default()), config).unwrap();
        for (plan, want) in queries.iter().zip(expected) {
            let got: Vec<(String, f32)> = reloaded
                .search(plan)
                .unwrap()
                .items
                .into_iter()
                .map(|item| (item.external_id, item.score))
                .collect();
            assert_eq!(got, want);
        }
    }

    #[test]
    fn add_delete_add_equals_single_add() {
        let indexer = indexer_with(&[("r1", "pink floyd")]);
        indexer.delete_record("r1").unwrap();
        let mut record = Record::new("r1");
        record.set_searchable("title", "pink floyd");
        indexer.add_record(&record).unwrap();
        indexer.commit().unwrap();

        let fresh = indexer_with(&[("r1", "pink floyd")]);
        assert_eq!(complete(&indexer, "pink"), complete(&fresh, "pink"));
        assert_eq!(complete(&indexer, "pink"), vec!["r1"]);
    }

    #[test]
    fn duplicate_primary_key_is_rejected() {
        let indexer = indexer_with(&[("r1", "pink floyd")]);
        let mut record = Record::new("r1");
        record.set_searchable("title", "other text");
        let err = indexer.add_record(&record).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicatePrimaryKey);
    }

    #[test]
    fn readers_see_consistent_snapshots_under_writes() {
        let indexer = Arc::new(
            Indexer::create(title_schema(), Arc::new(StandardAnalyzer::default()), test_config())
                .unwrap(),
        );

        let writer = {
            let indexer = Arc::clone(&indexer);
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    let mut record = Record::new(format!("r{i}"));
                    record.set_searchable("title", format!("shared word{i}"));
                    indexer.add_record(&record).unwrap();
                    if i % 10 == 9 {
                        indexer.commit().unwrap();
                    }
                }
                indexer.commit().unwrap();
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let indexer = Arc::clone(&indexer);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let plan = term_plan("shared", TermType::Complete, 0, 200);
                        let results = indexer.search(&plan).unwrap();
                        assert!(results.len() <= 100);
                        let mut seen = HashSet::new();
                        for item in &results.items {
                            // No duplicates and no phantom records.
                            assert!(seen.insert(item.record));
                            assert!(item.external_id.starts_with('r'));
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        let plan = term_plan("shared", TermType::Complete, 0, 200);
        assert_eq!(indexer.search(&plan).unwrap().len(), 100);
    }

    #[test]
    fn top_k_results_are_prefixes_of_larger_k() {
        let titles: Vec<(String, String)> = (0..20)
            .map(|i| (format!("r{i}"), format!("rank {}", "rank ".repeat(i))))
            .collect();
        let refs: Vec<(&str, &str)> =
            titles.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let indexer = indexer_with(&refs);

        let small = indexer.search(&term_plan("rank", TermType::Complete, 0, 3)).unwrap();
        let large = indexer.search(&term_plan("rank", TermType::Complete, 0, 10)).unwrap();
        assert_eq!(small.len(), 3);
        let large_prefix: Vec<&str> =
            large.items[..3].iter().map(|i| i.external_id.as_str()).collect();
        let small_ids: Vec<&str> = small.items.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(small_ids, large_prefix);
    }

    #[test]
    fn exact_results_are_a_subset_of_fuzzy_results() {
        let indexer = indexer_with(&[
            ("r1", "pink floyd"),
            ("r2", "pint of ale"),
            ("r3", "punk rock"),
        ]);
        let exact: HashSet<String> =
            search_ids(&indexer, &term_plan("pink", TermType::Prefix, 0, 10)).into_iter().collect();
        let fuzzy: HashSet<String> =
            search_ids(&indexer, &term_plan("pink", TermType::Prefix, 1, 10)).into_iter().collect();
        assert!(exact.is_subset(&fuzzy));
        assert!(fuzzy.contains("r3"));
    }

    #[test]
    fn acl_restricts_records_to_their_roles() {
        let indexer =
            Indexer::create(title_schema(), Arc::new(StandardAnalyzer::default()), test_config())
                .unwrap();
        let mut public = Record::new("pub");
        public.set_searchable("title", "common");
        indexer.add_record(&public).unwrap();
        let mut locked = Record::new("locked");
        locked.set_searchable("title", "common");
        locked.roles = vec!["staff".into()];
        indexer.add_record(&locked).unwrap();
        indexer.commit().unwrap();

        let mut plan = term_plan("common", TermType::Complete, 0, 10);
        assert_eq!(search_ids(&indexer, &plan), vec!["pub"]);

        plan.role_id = Some("staff".into());
        assert_eq!(search_ids(&indexer, &plan), vec!["locked", "pub"]);

        indexer
            .acl_modify_roles("locked", &["other".into()], AclOp::Add)
            .unwrap();
        assert_eq!(search_ids(&indexer, &plan), vec!["pub"]);
    }

    #[test]
    fn filter_query_and_refining_sort() {
        let schema = Schema::new("id")
            .add_searchable("title", 1.0)
            .add_refining("year", RefiningType::Int, RefiningValue::Int(0));
        let indexer =
            Indexer::create(schema, Arc::new(StandardAnalyzer::default()), test_config()).unwrap();
        for (id, year) in [("r1", 1973), ("r2", 1969), ("r3", 1994)] {
            let mut record = Record::new(id);
            record.set_searchable("title", "album");
            record.set_refining("year", RefiningValue::Int(year));
            indexer.add_record(&record).unwrap();
        }
        indexer.commit().unwrap();

        let mut plan = term_plan("album", TermType::Complete, 0, 10);
        plan.filter = Some(FilterQuery::parse("year:[1970 TO 2000]").unwrap());
        assert_eq!(search_ids(&indexer, &plan), vec!["r1", "r3"]);

        let mut plan = term_plan("album", TermType::Complete, 0, 10);
        plan.sort = Some(SortSpec { attribute: "year".into(), descending: false });
        let ordered: Vec<String> =
            indexer.search(&plan).unwrap().items.into_iter().map(|i| i.external_id).collect();
        assert_eq!(ordered, vec!["r2", "r1", "r3"]);

        plan.sort = Some(SortSpec { attribute: "year".into(), descending: true });
        let ordered: Vec<String> =
            indexer.search(&plan).unwrap().items.into_iter().map(|i| i.external_id).collect();
        assert_eq!(ordered, vec!["r3", "r1", "r2"]);
    }

    #[test]
    fn suggestions_rank_by_popularity() {
        let indexer = indexer_with(&[
            ("r1", "pint one"),
            ("r2", "pint two"),
            ("r3", "pint three"),
            ("r4", "pink floyd"),
        ]);
        // test_config refreshes the histogram on every merge.
        let suggestions = indexer.suggest("pin", 0.5, 2).unwrap();
        assert_eq!(suggestions, vec!["pint".to_string(), "pink".to_string()]);
    }

    #[test]
    fn feedback_promotes_clicked_records() {
        let indexer = indexer_with(&[
            ("r1", "pink anthology"),
            ("r2", "pink rarities"),
        ]);
        let plan = LogicalPlan::from_keywords(&["pink"], 10, 0);
        let before = indexer.search(&plan).unwrap();
        assert_eq!(before.len(), 2);

        indexer.add_feedback("pink", "r2").unwrap();
        indexer.add_feedback("pink", "r2").unwrap();
        indexer.commit().unwrap();

        let after = indexer.search(&plan).unwrap();
        assert_eq!(after.items[0].external_id, "r2");
    }

    #[test]
    fn expired_deadline_flags_partial_results() {
        let indexer = indexer_with(&[("r1", "pink floyd")]);
        let mut plan = term_plan("pink", TermType::Complete, 0, 10);
        plan.max_time_ms = Some(0);
        let results = indexer.search(&plan).unwrap();
        assert!(results.approximate);
    }

    #[test]
    fn phrase_queries_respect_positions() {
        let indexer = indexer_with(&[
            ("r1", "pink floyd live"),
            ("r2", "floyd pink reversed"),
            ("r3", "pink quiet floyd gapped"),
        ]);
        let mut plan = LogicalPlan::new(10);
        let phrase = plan.phrase(crate::query::logical::PhraseSpec {
            keywords: vec!["pink".into(), "floyd".into()],
            slop: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        plan.set_root(phrase);
        assert_eq!(search_ids(&indexer, &plan), vec!["r1"]);

        let mut plan = LogicalPlan::new(10);
        let phrase = plan.phrase(crate::query::logical::PhraseSpec {
            keywords: vec!["pink".into(), "floyd".into()],
            slop: 1,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        plan.set_root(phrase);
        assert_eq!(search_ids(&indexer, &plan), vec!["r1", "r3"]);
    }

    #[test]
    fn boolean_trees_combine_terms() {
        let indexer = indexer_with(&[
            ("r1", "tom smith"),
            ("r2", "tom jones"),
            ("r3", "jack jones"),
        ]);

        let mut plan = LogicalPlan::new(10);
        let tom = plan.term(TermSpec {
            keyword: "tom".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let jones = plan.term(TermSpec {
            keyword: "jones".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let and = plan.and(vec![tom, jones]);
        plan.set_root(and);
        assert_eq!(search_ids(&indexer, &plan), vec!["r2"]);

        let mut plan = LogicalPlan::new(10);
        let tom = plan.term(TermSpec {
            keyword: "tom".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let jones = plan.term(TermSpec {
            keyword: "jones".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let or = plan.or(vec![tom, jones]);
        plan.set_root(or);
        assert_eq!(search_ids(&indexer, &plan), vec!["r1", "r2", "r3"]);

        let mut plan = LogicalPlan::new(10);
        let tom = plan.term(TermSpec {
            keyword: "tom".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let smith = plan.term(TermSpec {
            keyword: "smith".into(),
            term_type: TermType::Complete,
            edit_threshold: 0,
            attribute_filter: AttributeFilter::any(),
            boost: 1.0,
        });
        let not_smith = plan.not(smith);
        let and = plan.and(vec![tom, not_smith]);
        plan.set_root(and);
        assert_eq!(search_ids(&indexer, &plan), vec!["r2"]);
    }
}
