use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub storage_path: PathBuf,

    /// The merge scheduler wakes at least this often.
    pub merge_every_n_seconds: u64,
    /// A merge is also signaled once this many writes accumulate.
    pub merge_every_m_writes: u64,

    /// Histogram refresh cadence: every P merges or every Q writes,
    /// whichever comes first. At most one refresh per scheduler tick,
    /// always after the merge of that tick.
    pub update_histogram_every_p_merges: u64,
    pub update_histogram_every_q_writes: u64,

    /// Inverted-list merge worker threads.
    pub merge_workers: usize,

    pub plan_cache_entries: usize,
    pub active_node_cache_entries: usize,

    pub max_feedback_queries: usize,
    pub max_feedback_per_query: usize,

    /// Edit-distance bound applied to terms that do not carry their own.
    pub default_edit_threshold: u8,
    /// Score multiplier per edit of distance on a fuzzy match.
    pub fuzzy_match_penalty: f32,

    pub default_top_k: usize,
}

impl IndexerConfig {
    /// Default knobs, but with the merge pool sized to the host instead
    /// of the fixed five workers.
    pub fn with_host_parallelism() -> Self {
        IndexerConfig { merge_workers: num_cpus::get().max(1), ..Default::default() }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            storage_path: PathBuf::from("./searchlet-data"),
            merge_every_n_seconds: 10,
            merge_every_m_writes: 100,
            update_histogram_every_p_merges: 10,
            update_histogram_every_q_writes: 800,
            merge_workers: 5,
            plan_cache_entries: 1024,
            active_node_cache_entries: 4096,
            max_feedback_queries: 1000,
            max_feedback_per_query: 20,
            default_edit_threshold: 2,
            fuzzy_match_penalty: 0.5,
            default_top_k: 10,
        }
    }
}
