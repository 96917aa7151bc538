use std::num::NonZeroUsize;
use std::sync::Arc;
use lru::LruCache;
use parking_lot::Mutex;
use crate::index::trie::{TrieReadView, ROOT};

/// A trie node within the edit-distance bound of a query prefix, with the
/// exact distance between the prefix and the node's string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveNode {
    pub node: u32,
    pub distance: u8,
}

/// The set of trie nodes within edit distance `threshold` of one query
/// prefix. Derived incrementally: the set for `s·c` is one dynamic-
/// programming pass over the set for `s`.
#[derive(Debug, Clone)]
pub struct ActiveNodeSet {
    pub prefix: String,
    pub threshold: u8,
    /// Ordered by edit distance ascending, then node id.
    nodes: Vec<ActiveNode>,
}

impl ActiveNodeSet {
    /// The set for the empty prefix: every node within `threshold` hops of
    /// the root, at distance = depth (those characters would have to be
    /// inserted into the query).
    pub fn root_set(trie: &TrieReadView, threshold: u8) -> Self {
        let mut nodes = Vec::new();
        let mut frontier = vec![(ROOT, 0u8)];
        while let Some((idx, depth)) = frontier.pop() {
            nodes.push(ActiveNode { node: idx, distance: depth });
            if depth < threshold {
                for &child in &trie.node(idx).children {
                    frontier.push((child, depth + 1));
                }
            }
        }
        let mut set = ActiveNodeSet { prefix: String::new(), threshold, nodes };
        set.normalize();
        set
    }

    /// One DP step: extend the prefix by `ch`.
    ///   delete `ch` from the query        -> (v, d+1)
    ///   match a child labeled `ch`        -> (w, d)
    ///   substitute for a child's label    -> (w, d+1)
    pub fn extend(&self, trie: &TrieReadView, ch: char) -> Self {
        let mut nodes = Vec::new();
        for &ActiveNode { node, distance } in &self.nodes {
            if distance < self.threshold {
                nodes.push(ActiveNode { node, distance: distance + 1 });
            }
            for &child in &trie.node(node).children {
                let label = trie.node(child).ch;
                if label == ch {
                    nodes.push(ActiveNode { node: child, distance });
                } else if distance < self.threshold {
                    nodes.push(ActiveNode { node: child, distance: distance + 1 });
                }
            }
        }
        let mut prefix = self.prefix.clone();
        prefix.push(ch);
        let mut set = ActiveNodeSet { prefix, threshold: self.threshold, nodes };
        set.normalize();
        set
    }

    /// Full computation, used when nothing is cached.
    pub fn compute(trie: &TrieReadView, prefix: &str, threshold: u8) -> Self {
        let mut set = Self::root_set(trie, threshold);
        for ch in prefix.chars() {
            set = set.extend(trie, ch);
        }
        set
    }

    /// Keep the minimum distance per node, ordered by (distance, node).
    fn normalize(&mut self) {
        self.nodes.sort_by_key(|n| (n.node, n.distance));
        self.nodes.dedup_by_key(|n| n.node);
        self.nodes.sort_by_key(|n| (n.distance, n.node));
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ActiveNode> + '_ {
        self.nodes.iter().copied()
    }

    /// Terminal active nodes only: keywords whose whole string is within
    /// the bound. This is what a Complete term matches.
    pub fn terminals<'a>(&'a self, trie: &'a TrieReadView) -> impl Iterator<Item = ActiveNode> + 'a {
        self.nodes.iter().copied().filter(|n| trie.node(n.node).is_terminal())
    }
}

/// Process-wide cache of active-node sets keyed by (prefix, threshold).
/// A query locates the deepest cached prefix of its string and extends
/// one character at a time, caching the intermediates. Cleared on any
/// mutation that changes the trie.
pub struct ActiveNodeCache {
    cache: Mutex<LruCache<(String, u8), Arc<ActiveNodeSet>>>,
}

impl ActiveNodeCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        ActiveNodeCache { cache: Mutex::new(LruCache::new(cap)) }
    }

    pub fn get(&self, trie: &TrieReadView, prefix: &str, threshold: u8) -> Arc<ActiveNodeSet> {
        let chars: Vec<char> = prefix.chars().collect();

        // Longest cached prefix, including the full string.
        let mut base: Option<(usize, Arc<ActiveNodeSet>)> = None;
        {
            let mut cache = self.cache.lock();
            for len in (0..=chars.len()).rev() {
                let key: String = chars[..len].iter().collect();
                if let Some(set) = cache.get(&(key, threshold)) {
                    base = Some((len, set.clone()));
                    break;
                }
            }
        }

        let (mut len, mut set) = match base {
            Some((len, set)) => (len, set),
            None => {
                let root = Arc::new(ActiveNodeSet::root_set(trie, threshold));
                self.cache.lock().put((String::new(), threshold), root.clone());
                (0, root)
            }
        };

        while len < chars.len() {
            let next = Arc::new(set.extend(trie, chars[len]));
            len += 1;
            self.cache.lock().put((next.prefix.clone(), threshold), next.clone());
            set = next;
        }
        set
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::trie::TrieWriter;

    fn trie_with(words: &[&str]) -> TrieReadView {
        let mut writer = TrieWriter::new();
        for w in words {
            writer.add_keyword(w).unwrap();
        }
        writer.read_view()
    }

    fn distances(set: &ActiveNodeSet, trie: &TrieReadView) -> Vec<(String, u8)> {
        set.iter().map(|n| (trie.keyword_text(n.node), n.distance)).collect()
    }

    #[test]
    fn exact_set_follows_matches_only() {
        let trie = trie_with(&["pink", "pint"]);
        let set = ActiveNodeSet::compute(&trie, "pin", 0);
        let d = distances(&set, &trie);
        assert_eq!(d, vec![("pin".to_string(), 0)]);
    }

    #[test]
    fn missing_exact_path_empties_the_set() {
        let trie = trie_with(&["pink"]);
        assert!(ActiveNodeSet::compute(&trie, "pix", 0).is_empty());
        assert!(!ActiveNodeSet::compute(&trie, "pix", 1).is_empty());
    }

    #[test]
    fn substitution_and_deletion_within_bound() {
        let trie = trie_with(&["pink", "pinksyponzi", "floyd"]);
        // "pionn" is within distance 2 of "pink".
        let set = ActiveNodeSet::compute(&trie, "pionn", 2);
        let pink = trie.lookup_terminal("pink").unwrap();
        let found = set.iter().find(|n| n.node == pink).expect("pink not active");
        assert_eq!(found.distance, 2);
    }

    #[test]
    fn complete_terms_use_terminal_distance() {
        let trie = trie_with(&["pink", "pinksyponzi"]);
        let set = ActiveNodeSet::compute(&trie, "pgnk", 2);
        let terminals: Vec<String> =
            set.terminals(&trie).map(|n| trie.keyword_text(n.node)).collect();
        assert_eq!(terminals, vec!["pink".to_string()]);
    }

    #[test]
    fn leading_insertion_is_found() {
        let trie = trie_with(&["xa"]);
        let set = ActiveNodeSet::compute(&trie, "a", 1);
        let xa = trie.lookup_terminal("xa").unwrap();
        assert!(set.iter().any(|n| n.node == xa && n.distance == 1));
    }

    #[test]
    fn iteration_orders_by_distance_then_node() {
        let trie = trie_with(&["abc", "abd", "xbc"]);
        let set = ActiveNodeSet::compute(&trie, "abc", 2);
        let ds: Vec<u8> = set.iter().map(|n| n.distance).collect();
        assert!(ds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn cache_extends_from_longest_prefix() {
        let trie = trie_with(&["pink", "pint", "floyd"]);
        let cache = ActiveNodeCache::new(64);
        let direct = ActiveNodeSet::compute(&trie, "pin", 1);
        let via_cache = cache.get(&trie, "pin", 1);
        assert_eq!(distances(&via_cache, &trie), distances(&direct, &trie));

        // Extending a cached prefix gives the same result as computing.
        let direct = ActiveNodeSet::compute(&trie, "pink", 1);
        let via_cache = cache.get(&trie, "pink", 1);
        assert_eq!(distances(&via_cache, &trie), distances(&direct, &trie));
    }
}
