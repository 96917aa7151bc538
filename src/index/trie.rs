use std::collections::HashMap;
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{KeywordId, ListId};

pub const ROOT: u32 = 0;

/// Arena node. Parent/child relations are 32-bit ids into the arena,
/// children kept sorted by character.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrieNode {
    pub ch: char,
    pub parent: u32,
    pub children: Vec<u32>,
    /// Present iff this node terminates a keyword.
    pub keyword_id: Option<KeywordId>,
    /// Stable handle of the keyword's inverted list. Unlike the keyword id
    /// it never changes, so posting storage survives reassignment.
    pub list_id: Option<ListId>,
    /// Closed keyword-id range over all terminals in this subtree,
    /// answering "does any descendant fall in [lo, hi]" in O(1).
    pub min_keyword_id: KeywordId,
    pub max_keyword_id: KeywordId,
    /// Subtree probability, refreshed by the histogram pass; drives the
    /// suggestion ranker and popularity fallbacks.
    pub probability: f64,
}

impl TrieNode {
    fn new(ch: char, parent: u32) -> Self {
        TrieNode {
            ch,
            parent,
            children: Vec::new(),
            keyword_id: None,
            list_id: None,
            min_keyword_id: KeywordId(u32::MAX),
            max_keyword_id: KeywordId(0),
            probability: 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.keyword_id.is_some()
    }
}

/// Outcome of `TrieWriter::add_keyword`.
#[derive(Debug, Clone, Copy)]
pub struct KeywordHandle {
    pub keyword_id: KeywordId,
    pub list_id: ListId,
    pub node: u32,
    /// False when the keyword already existed.
    pub created: bool,
}

/// Immutable trie snapshot observed by readers.
#[derive(Debug, Clone)]
pub struct TrieReadView {
    pub nodes: Arc<Vec<TrieNode>>,
    pub keyword_count: u32,
}

impl TrieReadView {
    pub fn empty() -> Self {
        TrieReadView { nodes: Arc::new(vec![TrieNode::new('\0', ROOT)]), keyword_count: 0 }
    }

    pub fn node(&self, idx: u32) -> &TrieNode {
        &self.nodes[idx as usize]
    }

    pub fn child(&self, idx: u32, ch: char) -> Option<u32> {
        let node = self.node(idx);
        node.children
            .binary_search_by(|&c| self.nodes[c as usize].ch.cmp(&ch))
            .ok()
            .map(|pos| node.children[pos])
    }

    /// Walk the whole keyword; `None` when the path does not exist. The
    /// returned node may or may not be terminal.
    pub fn lookup(&self, text: &str) -> Option<u32> {
        let mut idx = ROOT;
        for ch in text.chars() {
            idx = self.child(idx, ch)?;
        }
        Some(idx)
    }

    pub fn lookup_terminal(&self, text: &str) -> Option<u32> {
        self.lookup(text).filter(|&n| self.node(n).is_terminal())
    }

    /// Closed keyword-id range covering every keyword with this node's
    /// string as a prefix.
    pub fn descendants_id_range(&self, idx: u32) -> (KeywordId, KeywordId) {
        let node = self.node(idx);
        (node.min_keyword_id, node.max_keyword_id)
    }

    /// Rebuild a node's keyword text by climbing to the root.
    pub fn keyword_text(&self, idx: u32) -> String {
        let mut chars = Vec::new();
        let mut cur = idx;
        while cur != ROOT {
            let node = self.node(cur);
            chars.push(node.ch);
            cur = node.parent;
        }
        chars.iter().rev().collect()
    }

    /// Terminal nodes of the subtree in lexicographic order.
    pub fn terminals_in_subtree(&self, idx: u32, out: &mut Vec<u32>) {
        if self.node(idx).is_terminal() {
            out.push(idx);
        }
        for &child in &self.node(idx).children {
            self.terminals_in_subtree(child, out);
        }
    }

    /// All (terminal node, keyword id) pairs in lexicographic order.
    pub fn terminals_in_order(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.terminals_in_subtree(ROOT, &mut out);
        out
    }
}

/// The writer's scratch trie. Storage is shared with the installed read
/// view and forked on the first mutation after a publish.
pub struct TrieWriter {
    nodes: Arc<Vec<TrieNode>>,
    keyword_count: u32,
    next_list_id: u32,
    needs_reassignment: bool,
}

impl TrieWriter {
    pub fn new() -> Self {
        TrieWriter {
            nodes: Arc::new(vec![TrieNode::new('\0', ROOT)]),
            keyword_count: 0,
            next_list_id: 0,
            needs_reassignment: false,
        }
    }

    pub fn from_parts(nodes: Vec<TrieNode>, keyword_count: u32, next_list_id: u32) -> Self {
        TrieWriter {
            nodes: Arc::new(nodes),
            keyword_count,
            next_list_id,
            needs_reassignment: false,
        }
    }

    pub fn keyword_count(&self) -> u32 {
        self.keyword_count
    }

    pub fn next_list_id(&self) -> u32 {
        self.next_list_id
    }

    pub fn needs_reassignment(&self) -> bool {
        self.needs_reassignment
    }

    pub fn node(&self, idx: u32) -> &TrieNode {
        &self.nodes[idx as usize]
    }

    fn nodes_mut(&mut self) -> &mut Vec<TrieNode> {
        Arc::make_mut(&mut self.nodes)
    }

    /// Publish the current state as a read view. The arena Arc is shared;
    /// the next mutation forks it.
    pub fn read_view(&self) -> TrieReadView {
        TrieReadView { nodes: self.nodes.clone(), keyword_count: self.keyword_count }
    }

    fn child(&self, idx: u32, ch: char) -> Option<u32> {
        let node = &self.nodes[idx as usize];
        node.children
            .binary_search_by(|&c| self.nodes[c as usize].ch.cmp(&ch))
            .ok()
            .map(|pos| node.children[pos])
    }

    pub fn lookup_terminal(&self, text: &str) -> Option<(u32, KeywordHandle)> {
        let mut idx = ROOT;
        for ch in text.chars() {
            idx = self.child(idx, ch)?;
        }
        let node = &self.nodes[idx as usize];
        let keyword_id = node.keyword_id?;
        let list_id = node.list_id?;
        Some((idx, KeywordHandle { keyword_id, list_id, node: idx, created: false }))
    }

    /// Idempotent insert. New keywords get the midpoint of the id gap
    /// between their in-order terminal neighbors; when the gap is spent
    /// the trie is flagged for a global reassignment at the next merge.
    pub fn add_keyword(&mut self, text: &str) -> Result<KeywordHandle> {
        if text.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "empty keyword"));
        }

        let mut idx = ROOT;
        for ch in text.chars() {
            idx = match self.child(idx, ch) {
                Some(next) => next,
                None => {
                    let new_idx = self.nodes.len() as u32;
                    self.nodes_mut().push(TrieNode::new(ch, idx));
                    let pos = {
                        let nodes = &self.nodes;
                        nodes[idx as usize]
                            .children
                            .binary_search_by(|&c| nodes[c as usize].ch.cmp(&ch))
                            .unwrap_err()
                    };
                    self.nodes_mut()[idx as usize].children.insert(pos, new_idx);
                    new_idx
                }
            };
        }

        if let Some(keyword_id) = self.nodes[idx as usize].keyword_id {
            let list_id = self.nodes[idx as usize].list_id.expect("terminal without list id");
            return Ok(KeywordHandle { keyword_id, list_id, node: idx, created: false });
        }

        let lo = self
            .predecessor_terminal(idx)
            .map(|n| self.nodes[n as usize].keyword_id.expect("terminal without id").0)
            .unwrap_or(0);
        let hi = self
            .successor_terminal(idx)
            .map(|n| self.nodes[n as usize].keyword_id.expect("terminal without id").0)
            .unwrap_or(u32::MAX);

        let keyword_id = if hi - lo > 1 {
            KeywordId(lo + (hi - lo) / 2)
        } else {
            // No room left between the neighbors. Take the upper bound and
            // flag the trie; ordering is restored by the merge pass before
            // these ids become reader-visible.
            self.needs_reassignment = true;
            KeywordId(hi)
        };

        let list_id = ListId(self.next_list_id);
        self.next_list_id += 1;
        self.keyword_count += 1;

        {
            let nodes = self.nodes_mut();
            let node = &mut nodes[idx as usize];
            node.keyword_id = Some(keyword_id);
            node.list_id = Some(list_id);
        }
        self.bump_ancestor_ranges(idx, keyword_id);

        Ok(KeywordHandle { keyword_id, list_id, node: idx, created: true })
    }

    /// Drop the terminal marker of a node (feedback-index query eviction).
    /// Subtree ranges stay stale until the next `refresh_ranges`.
    pub fn clear_terminal(&mut self, idx: u32) {
        let nodes = self.nodes_mut();
        let node = &mut nodes[idx as usize];
        if node.keyword_id.take().is_some() {
            node.list_id = None;
            self.keyword_count -= 1;
        }
    }

    fn bump_ancestor_ranges(&mut self, idx: u32, id: KeywordId) {
        let mut cur = idx;
        loop {
            let nodes = self.nodes_mut();
            let node = &mut nodes[cur as usize];
            if id < node.min_keyword_id {
                node.min_keyword_id = id;
            }
            if id > node.max_keyword_id {
                node.max_keyword_id = id;
            }
            if cur == ROOT {
                break;
            }
            cur = node.parent;
        }
    }

    fn first_terminal_in_subtree(&self, idx: u32) -> Option<u32> {
        if self.nodes[idx as usize].is_terminal() {
            return Some(idx);
        }
        for &child in &self.nodes[idx as usize].children {
            if let Some(found) = self.first_terminal_in_subtree(child) {
                return Some(found);
            }
        }
        None
    }

    fn last_terminal_in_subtree(&self, idx: u32) -> Option<u32> {
        for &child in self.nodes[idx as usize].children.iter().rev() {
            if let Some(found) = self.last_terminal_in_subtree(child) {
                return Some(found);
            }
        }
        if self.nodes[idx as usize].is_terminal() {
            return Some(idx);
        }
        None
    }

    /// In-order terminal strictly after `idx`. A node's own string sorts
    /// before every extension of it, so descendants come first.
    fn successor_terminal(&self, idx: u32) -> Option<u32> {
        for &child in &self.nodes[idx as usize].children {
            if let Some(found) = self.first_terminal_in_subtree(child) {
                return Some(found);
            }
        }
        let mut cur = idx;
        while cur != ROOT {
            let parent = self.nodes[cur as usize].parent;
            let siblings = &self.nodes[parent as usize].children;
            let pos = siblings.iter().position(|&c| c == cur).expect("child not linked");
            for &next in &siblings[pos + 1..] {
                if let Some(found) = self.first_terminal_in_subtree(next) {
                    return Some(found);
                }
            }
            cur = parent;
        }
        None
    }

    /// In-order terminal strictly before `idx`.
    fn predecessor_terminal(&self, idx: u32) -> Option<u32> {
        let mut cur = idx;
        while cur != ROOT {
            let parent = self.nodes[cur as usize].parent;
            let siblings = &self.nodes[parent as usize].children;
            let pos = siblings.iter().position(|&c| c == cur).expect("child not linked");
            for &prev in siblings[..pos].iter().rev() {
                if let Some(found) = self.last_terminal_in_subtree(prev) {
                    return Some(found);
                }
            }
            if self.nodes[parent as usize].is_terminal() {
                return Some(parent);
            }
            cur = parent;
        }
        None
    }

    /// Walk the trie in order and respread terminal ids uniformly over the
    /// 32-bit space. Returns the new id per list, for propagation into the
    /// forward index and the feedback age list. Runs only inside a merge,
    /// while the writer lock is held.
    pub fn reassign_ids(&mut self) -> HashMap<ListId, KeywordId> {
        let mut terminals = Vec::new();
        self.collect_terminals_in_order(ROOT, &mut terminals);

        let count = terminals.len() as u64;
        let mut mapping = HashMap::with_capacity(terminals.len());
        if count > 0 {
            let step = (u32::MAX as u64) / (count + 1);
            for (i, &node_idx) in terminals.iter().enumerate() {
                let new_id = KeywordId((step * (i as u64 + 1)) as u32);
                let nodes = self.nodes_mut();
                let node = &mut nodes[node_idx as usize];
                let list_id = node.list_id.expect("terminal without list id");
                node.keyword_id = Some(new_id);
                mapping.insert(list_id, new_id);
            }
        }

        self.refresh_ranges();
        self.needs_reassignment = false;
        mapping
    }

    fn collect_terminals_in_order(&self, idx: u32, out: &mut Vec<u32>) {
        if self.nodes[idx as usize].is_terminal() {
            out.push(idx);
        }
        for &child in &self.nodes[idx as usize].children {
            self.collect_terminals_in_order(child, out);
        }
    }

    /// Recompute every node's descendant id range bottom-up. Called at the
    /// end of a merge, after insertions or reassignment touched the ids.
    pub fn refresh_ranges(&mut self) {
        self.refresh_ranges_rec(ROOT);
    }

    fn refresh_ranges_rec(&mut self, idx: u32) -> (KeywordId, KeywordId) {
        let mut min = KeywordId(u32::MAX);
        let mut max = KeywordId(0);
        if let Some(id) = self.nodes[idx as usize].keyword_id {
            min = id;
            max = id;
        }
        let children = self.nodes[idx as usize].children.clone();
        for child in children {
            let (cmin, cmax) = self.refresh_ranges_rec(child);
            if cmin < min {
                min = cmin;
            }
            if cmax > max {
                max = cmax;
            }
        }
        let nodes = self.nodes_mut();
        nodes[idx as usize].min_keyword_id = min;
        nodes[idx as usize].max_keyword_id = max;
        (min, max)
    }

    /// Refresh per-node probabilities from per-list document counts.
    /// A terminal contributes df/N; an interior node accumulates its
    /// children, capped at 1.
    pub fn refresh_probabilities(&mut self, doc_count_of: &dyn Fn(ListId) -> u32, total_records: u32) {
        let total = total_records.max(1) as f64;
        self.refresh_probabilities_rec(ROOT, doc_count_of, total);
    }

    fn refresh_probabilities_rec(
        &mut self,
        idx: u32,
        doc_count_of: &dyn Fn(ListId) -> u32,
        total: f64,
    ) -> f64 {
        let mut p = match self.nodes[idx as usize].list_id {
            Some(list_id) => doc_count_of(list_id) as f64 / total,
            None => 0.0,
        };
        let children = self.nodes[idx as usize].children.clone();
        for child in children {
            p += self.refresh_probabilities_rec(child, doc_count_of, total);
        }
        let p = p.min(1.0);
        self.nodes_mut()[idx as usize].probability = p;
        p
    }

    pub fn into_parts(self) -> (Vec<TrieNode>, u32, u32) {
        let nodes = Arc::try_unwrap(self.nodes).unwrap_or_else(|arc| (*arc).clone());
        (nodes, self.keyword_count, self.next_list_id)
    }
}

impl Default for TrieWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids_in_text_order(writer: &TrieWriter, words: &mut [&str]) -> Vec<u32> {
        words.sort();
        words
            .iter()
            .map(|w| writer.lookup_terminal(w).unwrap().1.keyword_id.0)
            .collect()
    }

    #[test]
    fn ids_preserve_lexicographic_order() {
        let mut writer = TrieWriter::new();
        let mut words = ["tom", "smith", "jack", "lennon", "pink", "floyd"];
        for w in words {
            writer.add_keyword(w).unwrap();
        }
        let ids = ids_in_text_order(&writer, &mut words);
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1], "ids out of order: {:?}", ids);
        }
    }

    #[test]
    fn add_keyword_is_idempotent() {
        let mut writer = TrieWriter::new();
        let first = writer.add_keyword("floyd").unwrap();
        let second = writer.add_keyword("floyd").unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.keyword_id, second.keyword_id);
        assert_eq!(first.list_id, second.list_id);
        assert_eq!(writer.keyword_count(), 1);
    }

    #[test]
    fn prefix_of_existing_keyword_sorts_before_it() {
        let mut writer = TrieWriter::new();
        let cart = writer.add_keyword("cart").unwrap();
        let car = writer.add_keyword("car").unwrap();
        assert!(car.keyword_id < cart.keyword_id);
    }

    #[test]
    fn descendant_range_covers_subtree() {
        let mut writer = TrieWriter::new();
        for w in ["pink", "pinkish", "pint", "floyd"] {
            writer.add_keyword(w).unwrap();
        }
        let view = writer.read_view();
        let pin = view.lookup("pin").unwrap();
        let (lo, hi) = view.descendants_id_range(pin);

        for w in ["pink", "pinkish", "pint"] {
            let id = view.node(view.lookup_terminal(w).unwrap()).keyword_id.unwrap();
            assert!(lo <= id && id <= hi);
        }
        let floyd = view.node(view.lookup_terminal("floyd").unwrap()).keyword_id.unwrap();
        assert!(floyd < lo || floyd > hi);
    }

    #[test]
    fn exhausted_gap_flags_reassignment_and_reassign_restores_order() {
        let mut writer = TrieWriter::new();
        writer.add_keyword("aaa0").unwrap();
        writer.add_keyword("aaaz").unwrap();
        // Squeeze keywords between the two until the id gap runs dry.
        let mut i = 0;
        while !writer.needs_reassignment() {
            writer.add_keyword(&format!("aaa{:04}", i)).unwrap();
            i += 1;
            assert!(i < 100_000, "gap never exhausted");
        }

        let mapping = writer.reassign_ids();
        assert!(!writer.needs_reassignment());
        assert_eq!(mapping.len(), writer.keyword_count() as usize);

        let view = writer.read_view();
        let terminals = view.terminals_in_order();
        let ids: Vec<u32> = terminals
            .iter()
            .map(|&n| view.node(n).keyword_id.unwrap().0)
            .collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn read_view_is_stable_across_writes() {
        let mut writer = TrieWriter::new();
        writer.add_keyword("tom").unwrap();
        let view = writer.read_view();
        writer.add_keyword("tomato").unwrap();

        assert!(view.lookup_terminal("tomato").is_none());
        assert!(writer.lookup_terminal("tomato").is_some());
        assert!(view.lookup_terminal("tom").is_some());
    }

    #[test]
    fn keyword_text_round_trips() {
        let mut writer = TrieWriter::new();
        writer.add_keyword("lennon").unwrap();
        let view = writer.read_view();
        let node = view.lookup_terminal("lennon").unwrap();
        assert_eq!(view.keyword_text(node), "lennon");
    }
}
