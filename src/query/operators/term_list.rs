use std::collections::BinaryHeap;
use std::collections::HashMap;
use std::sync::Arc;
use roaring::RoaringBitmap;
use crate::core::error::Result;
use crate::core::types::{AttributeFilter, KeywordId, ListId, TermType};
use crate::index::trie::TrieReadView;
use crate::query::physical::{ExecContext, MatchedKeyword, PlanItem, ScoreKey};
use crate::search::active_nodes::ActiveNodeSet;

/// One keyword reachable from a term's active-node set.
#[derive(Debug, Clone, Copy)]
pub struct TermKeyword {
    pub trie_node: u32,
    pub keyword_id: KeywordId,
    pub list_id: ListId,
    pub distance: u8,
}

/// Expand an active-node set into concrete keywords. Prefix terms cover
/// every terminal in each active subtree; Complete terms cover terminal
/// active nodes only. Overlapping subtrees are deduplicated keeping the
/// smallest distance.
pub fn expand_term(trie: &TrieReadView, active: &ActiveNodeSet, term_type: TermType) -> Vec<TermKeyword> {
    let mut best: HashMap<u32, TermKeyword> = HashMap::new();
    match term_type {
        TermType::Complete => {
            for node in active.terminals(trie) {
                insert_keyword(trie, &mut best, node.node, node.distance);
            }
        }
        TermType::Prefix => {
            for node in active.iter() {
                let mut terminals = Vec::new();
                trie.terminals_in_subtree(node.node, &mut terminals);
                for terminal in terminals {
                    insert_keyword(trie, &mut best, terminal, node.distance);
                }
            }
        }
    }
    let mut out: Vec<TermKeyword> = best.into_values().collect();
    out.sort_by_key(|k| (k.distance, k.trie_node));
    out
}

fn insert_keyword(trie: &TrieReadView, best: &mut HashMap<u32, TermKeyword>, node: u32, distance: u8) {
    let Some(keyword_id) = trie.node(node).keyword_id else { return };
    let Some(list_id) = trie.node(node).list_id else { return };
    best.entry(node)
        .and_modify(|k| k.distance = k.distance.min(distance))
        .or_insert(TermKeyword { trie_node: node, keyword_id, list_id, distance });
}

struct Cursor {
    keyword: TermKeyword,
    /// Score multiplier: term boost × edit-distance penalty. Constant per
    /// cursor, so descending list order stays descending after scaling.
    factor: f32,
    pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    score: ScoreKey,
    cursor: usize,
}

/// Fuzzy-prefix term leaf producing records in descending score order by
/// interleaving all matching keywords' inverted lists through a heap.
pub struct TermVirtualListOp {
    pub active: Arc<ActiveNodeSet>,
    pub term_type: TermType,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
    cursors: Vec<Cursor>,
    heap: BinaryHeap<HeapEntry>,
    visited: RoaringBitmap,
}

impl TermVirtualListOp {
    pub fn new(active: Arc<ActiveNodeSet>, term_type: TermType, attribute_filter: AttributeFilter, boost: f32) -> Self {
        TermVirtualListOp {
            active,
            term_type,
            attribute_filter,
            boost,
            cursors: Vec::new(),
            heap: BinaryHeap::new(),
            visited: RoaringBitmap::new(),
        }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.cursors.clear();
        self.heap.clear();
        self.visited.clear();
        for keyword in expand_term(&ctx.trie, &self.active, self.term_type) {
            let factor = self.boost * ctx.ranker.apply_edit_distance(1.0, keyword.distance);
            self.cursors.push(Cursor { keyword, factor, pos: 0 });
        }
        for idx in 0..self.cursors.len() {
            self.push_cursor_head(ctx, idx);
        }
        Ok(())
    }

    fn push_cursor_head(&mut self, ctx: &ExecContext, idx: usize) {
        let cursor = &self.cursors[idx];
        if let Some(list) = ctx.inverted.list(cursor.keyword.list_id) {
            if let Some((_, raw)) = list.posting(cursor.pos) {
                self.heap.push(HeapEntry { score: ScoreKey(raw * cursor.factor), cursor: idx });
            }
        }
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        while let Some(HeapEntry { score, cursor: idx }) = self.heap.pop() {
            if ctx.expired() {
                return Ok(None);
            }
            let (record, keyword) = {
                let cursor = &mut self.cursors[idx];
                let list = ctx.inverted.list(cursor.keyword.list_id).expect("cursor over missing list");
                let (record, _) = list.posting(cursor.pos).expect("cursor past end");
                cursor.pos += 1;
                (record, cursor.keyword)
            };
            self.push_cursor_head(ctx, idx);

            if self.visited.contains(record.0) {
                continue;
            }
            self.visited.insert(record.0);

            // Validity and the attribute filter are checked against the
            // forward list of this very keyword.
            let hit = ctx.forward.has_word_in_range(
                record,
                keyword.keyword_id,
                keyword.keyword_id,
                &self.attribute_filter,
            )?;
            if hit.is_none() {
                continue;
            }

            return Ok(Some(PlanItem {
                record,
                score: score.0,
                matched: vec![MatchedKeyword {
                    trie_node: keyword.trie_node,
                    keyword_id: keyword.keyword_id,
                    list_id: keyword.list_id,
                    distance: keyword.distance,
                }],
            }));
        }
        Ok(None)
    }

    pub fn close(&mut self, _ctx: &ExecContext) {
        self.cursors.clear();
        self.heap.clear();
        self.visited.clear();
    }
}

/// Same expansion as the virtual list, but emitted list by list with no
/// heap. Cheaper when the parent does not care about score order.
pub struct SimpleScanOp {
    pub active: Arc<ActiveNodeSet>,
    pub term_type: TermType,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
    keywords: Vec<(TermKeyword, f32)>,
    current: usize,
    pos: usize,
    visited: RoaringBitmap,
}

impl SimpleScanOp {
    pub fn new(active: Arc<ActiveNodeSet>, term_type: TermType, attribute_filter: AttributeFilter, boost: f32) -> Self {
        SimpleScanOp {
            active,
            term_type,
            attribute_filter,
            boost,
            keywords: Vec::new(),
            current: 0,
            pos: 0,
            visited: RoaringBitmap::new(),
        }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.keywords = expand_term(&ctx.trie, &self.active, self.term_type)
            .into_iter()
            .map(|k| {
                let factor = self.boost * ctx.ranker.apply_edit_distance(1.0, k.distance);
                (k, factor)
            })
            .collect();
        self.current = 0;
        self.pos = 0;
        self.visited.clear();
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        while self.current < self.keywords.len() {
            if ctx.expired() {
                return Ok(None);
            }
            let (keyword, factor) = self.keywords[self.current];
            let posting = ctx.inverted.list(keyword.list_id).and_then(|l| l.posting(self.pos));
            let Some((record, raw)) = posting else {
                self.current += 1;
                self.pos = 0;
                continue;
            };
            self.pos += 1;

            if self.visited.contains(record.0) {
                continue;
            }
            self.visited.insert(record.0);

            let hit = ctx.forward.has_word_in_range(
                record,
                keyword.keyword_id,
                keyword.keyword_id,
                &self.attribute_filter,
            )?;
            if hit.is_none() {
                continue;
            }

            return Ok(Some(PlanItem {
                record,
                score: raw * factor,
                matched: vec![MatchedKeyword {
                    trie_node: keyword.trie_node,
                    keyword_id: keyword.keyword_id,
                    list_id: keyword.list_id,
                    distance: keyword.distance,
                }],
            }));
        }
        Ok(None)
    }

    pub fn close(&mut self, _ctx: &ExecContext) {
        self.keywords.clear();
        self.visited.clear();
    }
}

/// Fallback for a lone, too-popular term: walk completions ranked by
/// their trie-node probability and surface each completion's strongest
/// records first.
pub struct SuggestionOp {
    pub active: Arc<ActiveNodeSet>,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
    keywords: Vec<(TermKeyword, f64)>,
    current: usize,
    pos: usize,
    visited: RoaringBitmap,
}

impl SuggestionOp {
    pub fn new(active: Arc<ActiveNodeSet>, attribute_filter: AttributeFilter, boost: f32) -> Self {
        SuggestionOp {
            active,
            attribute_filter,
            boost,
            keywords: Vec::new(),
            current: 0,
            pos: 0,
            visited: RoaringBitmap::new(),
        }
    }

    pub fn open(&mut self, ctx: &ExecContext) -> Result<()> {
        self.keywords = expand_term(&ctx.trie, &self.active, TermType::Prefix)
            .into_iter()
            .map(|k| {
                let probability = ctx.trie.node(k.trie_node).probability;
                (k, probability)
            })
            .collect();
        self.keywords.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.current = 0;
        self.pos = 0;
        self.visited.clear();
        Ok(())
    }

    pub fn next(&mut self, ctx: &ExecContext) -> Result<Option<PlanItem>> {
        while self.current < self.keywords.len() {
            if ctx.expired() {
                return Ok(None);
            }
            let (keyword, _) = self.keywords[self.current];
            let posting = ctx.inverted.list(keyword.list_id).and_then(|l| l.posting(self.pos));
            let Some((record, raw)) = posting else {
                self.current += 1;
                self.pos = 0;
                continue;
            };
            self.pos += 1;

            if self.visited.contains(record.0) {
                continue;
            }
            self.visited.insert(record.0);

            let hit = ctx.forward.has_word_in_range(
                record,
                keyword.keyword_id,
                keyword.keyword_id,
                &self.attribute_filter,
            )?;
            if hit.is_none() {
                continue;
            }

            let factor = self.boost * ctx.ranker.apply_edit_distance(1.0, keyword.distance);
            return Ok(Some(PlanItem {
                record,
                score: raw * factor,
                matched: vec![MatchedKeyword {
                    trie_node: keyword.trie_node,
                    keyword_id: keyword.keyword_id,
                    list_id: keyword.list_id,
                    distance: keyword.distance,
                }],
            }));
        }
        Ok(None)
    }

    pub fn close(&mut self, _ctx: &ExecContext) {
        self.keywords.clear();
        self.visited.clear();
    }
}
