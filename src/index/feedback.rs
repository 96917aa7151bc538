use std::collections::{BinaryHeap, HashMap};
use std::cmp::Reverse;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use crate::core::types::{ListId, RecordId};
use crate::index::trie::{TrieReadView, TrieWriter};

/// One remembered click: a record the user chose for this query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub record: RecordId,
    pub frequency: u32,
    pub timestamp: i64,
}

#[derive(Debug, Default)]
struct FeedbackSlot {
    /// Sorted by record id; shared with read views.
    committed: Arc<Vec<FeedbackEntry>>,
    /// Write-view tail awaiting merge.
    tail: Vec<FeedbackEntry>,
    dirty: bool,
}

#[derive(Debug, Clone, Copy)]
struct AgeLink {
    prev: Option<u32>,
    next: Option<u32>,
    trie_node: u32,
}

/// Reader-visible state: the query trie plus the committed feedback lists.
#[derive(Clone)]
pub struct FeedbackReadView {
    trie: TrieReadView,
    slot_of: Arc<HashMap<ListId, u32>>,
    lists: Arc<Vec<Arc<Vec<FeedbackEntry>>>>,
}

impl FeedbackReadView {
    pub fn empty() -> Self {
        FeedbackReadView {
            trie: TrieReadView::empty(),
            slot_of: Arc::new(HashMap::new()),
            lists: Arc::new(Vec::new()),
        }
    }

    pub fn has_feedback(&self, query: &str) -> bool {
        self.entries(query).map(|e| !e.is_empty()).unwrap_or(false)
    }

    pub fn entries(&self, query: &str) -> Option<&[FeedbackEntry]> {
        let node = self.trie.lookup_terminal(query)?;
        let list_id = self.trie.node(node).list_id?;
        let slot = *self.slot_of.get(&list_id)?;
        self.lists.get(slot as usize).map(|l| l.as_slice())
    }
}

/// Query-to-clicked-records index. Remembers the most recent MAX_QUERIES
/// query strings in a secondary trie (a query is itself a keyword); each
/// carries up to MAX_FEEDBACK_PER_QUERY (record, frequency, timestamp)
/// triples. A doubly-linked age list across the slot array drives LRU
/// eviction of whole queries.
pub struct FeedbackWriter {
    trie: TrieWriter,
    slots: Vec<FeedbackSlot>,
    age: Vec<AgeLink>,
    slot_of: HashMap<ListId, u32>,
    head: Option<u32>,
    tail: Option<u32>,
    free: Vec<u32>,
    max_queries: usize,
    max_per_query: usize,
    query_count: usize,
}

impl FeedbackWriter {
    pub fn new(max_queries: usize, max_per_query: usize) -> Self {
        FeedbackWriter {
            trie: TrieWriter::new(),
            slots: Vec::new(),
            age: Vec::new(),
            slot_of: HashMap::new(),
            head: None,
            tail: None,
            free: Vec::new(),
            max_queries: max_queries.max(1),
            max_per_query: max_per_query.max(1),
            query_count: 0,
        }
    }

    pub fn max_queries(&self) -> usize {
        self.max_queries
    }

    pub fn max_per_query(&self) -> usize {
        self.max_per_query
    }

    pub fn query_count(&self) -> usize {
        self.query_count
    }

    /// Record one click. Known queries are refreshed to the newest end of
    /// the age list; at capacity the oldest query is evicted, its trie
    /// terminal cleared and its slot reused.
    pub fn add_feedback(&mut self, query: &str, record: RecordId, timestamp: i64) {
        let handle = match self.trie.add_keyword(query) {
            Ok(h) => h,
            Err(_) => return, // empty query string carries no signal
        };

        let slot = if let Some(&slot) = self.slot_of.get(&handle.list_id) {
            // Existing query: move to the newest end unless already there.
            if self.tail != Some(slot) {
                self.unlink(slot);
                self.link_at_tail(slot, handle.node);
            }
            slot
        } else {
            if self.query_count == self.max_queries {
                self.evict_oldest();
            }
            let slot = match self.free.pop() {
                Some(reused) => {
                    self.slots[reused as usize] = FeedbackSlot::default();
                    self.age[reused as usize] = AgeLink { prev: None, next: None, trie_node: handle.node };
                    reused
                }
                None => {
                    self.slots.push(FeedbackSlot::default());
                    self.age.push(AgeLink { prev: None, next: None, trie_node: handle.node });
                    (self.slots.len() - 1) as u32
                }
            };
            self.slot_of.insert(handle.list_id, slot);
            self.link_at_tail(slot, handle.node);
            self.query_count += 1;
            slot
        };

        let list = &mut self.slots[slot as usize];
        match list.tail.iter_mut().find(|e| e.record == record) {
            Some(entry) => {
                entry.frequency += 1;
                entry.timestamp = entry.timestamp.max(timestamp);
            }
            None => list.tail.push(FeedbackEntry { record, frequency: 1, timestamp }),
        }
        list.dirty = true;
    }

    fn unlink(&mut self, slot: u32) {
        let link = self.age[slot as usize];
        match link.prev {
            Some(p) => self.age[p as usize].next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(n) => self.age[n as usize].prev = link.prev,
            None => self.tail = link.prev,
        }
        self.age[slot as usize].prev = None;
        self.age[slot as usize].next = None;
    }

    fn link_at_tail(&mut self, slot: u32, trie_node: u32) {
        self.age[slot as usize] = AgeLink { prev: self.tail, next: None, trie_node };
        match self.tail {
            Some(t) => self.age[t as usize].next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    fn evict_oldest(&mut self) {
        let Some(oldest) = self.head else { return };
        let trie_node = self.age[oldest as usize].trie_node;
        if let Some(list_id) = self.trie.node(trie_node).list_id {
            self.slot_of.remove(&list_id);
        }
        // The terminal marker goes away now; the trie's subtree ranges are
        // refreshed by the next merge pass.
        self.trie.clear_terminal(trie_node);
        self.unlink(oldest);
        self.slots[oldest as usize] = FeedbackSlot::default();
        self.free.push(oldest);
        self.query_count -= 1;
    }

    /// Write-view read, used by the indexer to decide cache bypass before
    /// the tail is merged.
    pub fn has_any_feedback(&self, query: &str) -> bool {
        match self.trie.lookup_terminal(query) {
            Some((_, handle)) => match self.slot_of.get(&handle.list_id) {
                Some(&slot) => {
                    let list = &self.slots[slot as usize];
                    !list.committed.is_empty() || !list.tail.is_empty()
                }
                None => false,
            },
            None => false,
        }
    }

    /// Merge every dirty list: sort the tail by record id, in-place merge
    /// with the committed list, combine duplicates (sum frequency, max
    /// timestamp), then trim the oldest entries past the per-query cap
    /// with a timestamp min-heap.
    pub fn merge(&mut self) {
        if self.trie.needs_reassignment() {
            // Query ids are internal to this trie; lists are addressed by
            // list id, so the mapping needs no propagation here.
            self.trie.reassign_ids();
        } else {
            self.trie.refresh_ranges();
        }

        for slot in self.slots.iter_mut() {
            if !slot.dirty {
                continue;
            }
            let mut merged: Vec<FeedbackEntry> = (*slot.committed).clone();
            let mut tail = std::mem::take(&mut slot.tail);
            tail.sort_by_key(|e| e.record);
            merged.extend(tail);
            merged.sort_by_key(|e| e.record);

            let mut deduped: Vec<FeedbackEntry> = Vec::with_capacity(merged.len());
            for entry in merged {
                match deduped.last_mut() {
                    Some(last) if last.record == entry.record => {
                        last.frequency += entry.frequency;
                        last.timestamp = last.timestamp.max(entry.timestamp);
                    }
                    _ => deduped.push(entry),
                }
            }

            if deduped.len() > self.max_per_query {
                let excess = deduped.len() - self.max_per_query;
                let mut heap: BinaryHeap<Reverse<(i64, u32)>> = deduped
                    .iter()
                    .map(|e| Reverse((e.timestamp, e.record.0)))
                    .collect();
                let mut drop_keys = std::collections::HashSet::new();
                for _ in 0..excess {
                    if let Some(Reverse((_, rec))) = heap.pop() {
                        drop_keys.insert(rec);
                    }
                }
                deduped.retain(|e| !drop_keys.contains(&e.record.0));
            }

            slot.committed = Arc::new(deduped);
            slot.dirty = false;
        }
    }

    pub fn read_view(&self) -> FeedbackReadView {
        FeedbackReadView {
            trie: self.trie.read_view(),
            slot_of: Arc::new(self.slot_of.clone()),
            lists: Arc::new(self.slots.iter().map(|s| s.committed.clone()).collect()),
        }
    }

    pub fn snapshot_parts(&self) -> FeedbackSnapshot {
        FeedbackSnapshot {
            max_queries: self.max_queries,
            max_per_query: self.max_per_query,
            queries: self.queries_oldest_first(),
        }
    }

    /// Queries in age order (oldest first), with their merged lists.
    fn queries_oldest_first(&self) -> Vec<(String, Vec<FeedbackEntry>)> {
        let view = self.trie.read_view();
        let mut out = Vec::with_capacity(self.query_count);
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let link = self.age[slot as usize];
            let text = view.keyword_text(link.trie_node);
            let list = &self.slots[slot as usize];
            let mut entries = (*list.committed).clone();
            entries.extend(list.tail.iter().copied());
            out.push((text, entries));
            cursor = link.next;
        }
        out
    }

    pub fn restore(snapshot: FeedbackSnapshot) -> Self {
        let mut writer = FeedbackWriter::new(snapshot.max_queries, snapshot.max_per_query);
        for (query, entries) in snapshot.queries {
            for entry in entries {
                // Seed the write-view tail with the stored aggregate; the
                // merge below folds it into the committed list.
                writer.add_feedback(&query, entry.record, entry.timestamp);
                if let Some((_, handle)) = writer.trie.lookup_terminal(&query) {
                    if let Some(&slot) = writer.slot_of.get(&handle.list_id) {
                        if let Some(last) = writer.slots[slot as usize].tail.last_mut() {
                            if last.record == entry.record {
                                last.frequency = entry.frequency.max(1);
                            }
                        }
                    }
                }
            }
        }
        writer.merge();
        writer
    }
}

/// Persistence image: limits, then the age-ordered query lists (oldest
/// first, so head/tail and the age links are implied by position).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackSnapshot {
    pub max_queries: usize,
    pub max_per_query: usize,
    pub queries: Vec<(String, Vec<FeedbackEntry>)>,
}
