use crate::core::error::Result;
use crate::core::types::{AttributeId, KeywordId, RecordId};
use crate::index::forward::ForwardReadView;
use crate::index::trie::TrieReadView;
use crate::query::logical::PhraseSpec;

/// A phrase resolved against one snapshot: the exact keyword ids, in
/// phrase order. A keyword absent from the trie makes the phrase
/// unmatchable for this snapshot.
pub struct ResolvedPhrase {
    keyword_ids: Vec<KeywordId>,
    attrs: Vec<AttributeId>,
    slop: u32,
    unmatchable: bool,
}

/// Positional verification applied after all of a phrase's keywords were
/// confirmed present in a record.
pub struct PhraseVerifier {
    phrases: Vec<ResolvedPhrase>,
}

impl PhraseVerifier {
    pub fn new(specs: &[&PhraseSpec], trie: &TrieReadView) -> Self {
        let phrases = specs
            .iter()
            .map(|spec| {
                let mut keyword_ids = Vec::with_capacity(spec.keywords.len());
                let mut unmatchable = spec.keywords.is_empty();
                for keyword in &spec.keywords {
                    match trie.lookup_terminal(keyword).and_then(|n| trie.node(n).keyword_id) {
                        Some(id) => keyword_ids.push(id),
                        None => {
                            unmatchable = true;
                            break;
                        }
                    }
                }
                ResolvedPhrase {
                    keyword_ids,
                    attrs: spec.attribute_filter.attrs.clone(),
                    slop: spec.slop,
                    unmatchable,
                }
            })
            .collect();
        PhraseVerifier { phrases }
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// True when every phrase aligns somewhere in the record.
    pub fn matches(&self, forward: &ForwardReadView, record: RecordId) -> Result<bool> {
        let Some(list) = forward.valid_record(record) else { return Ok(false) };
        for phrase in &self.phrases {
            if phrase.unmatchable {
                return Ok(false);
            }
            let mut slots = Vec::with_capacity(phrase.keyword_ids.len());
            for &id in &phrase.keyword_ids {
                match list.keyword_offset(id) {
                    Some(slot) => slots.push(slot),
                    None => return Ok(false),
                }
            }

            // Candidate attributes: the filter's list, or everywhere the
            // first keyword occurs.
            let candidates = if phrase.attrs.is_empty() {
                list.attributes_of(slots[0])?
            } else {
                phrase.attrs.clone()
            };

            let mut aligned = false;
            'attrs: for attr in candidates {
                let mut lists = Vec::with_capacity(slots.len());
                for &slot in &slots {
                    let positions = list.positions(slot, attr)?;
                    if positions.is_empty() {
                        continue 'attrs;
                    }
                    lists.push(positions);
                }
                if align(&lists, phrase.slop) {
                    aligned = true;
                    break;
                }
            }
            if !aligned {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// k-pointer alignment: an occurrence of each keyword, in order, each gap
/// within slop + 1. The multi-valued position bump keeps alignments from
/// crossing value boundaries as long as slop stays below the bump.
fn align(lists: &[Vec<u32>], slop: u32) -> bool {
    let max_gap = slop + 1;
    'starts: for &start in &lists[0] {
        let mut prev = start;
        for positions in &lists[1..] {
            match positions.iter().copied().find(|&p| p > prev && p - prev <= max_gap) {
                Some(p) => prev = p,
                None => continue 'starts,
            }
        }
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjacent_positions_align_with_zero_slop() {
        assert!(align(&[vec![3], vec![4]], 0));
        assert!(!align(&[vec![3], vec![5]], 0));
        assert!(align(&[vec![3], vec![5]], 1));
    }

    #[test]
    fn order_matters() {
        assert!(!align(&[vec![4], vec![3]], 2));
    }

    #[test]
    fn bumped_positions_do_not_align_across_values() {
        // "style" at the end of one value, "java" at the start of the next.
        assert!(!align(&[vec![2], vec![100_003]], 3));
    }

    #[test]
    fn three_way_alignment_advances_greedily() {
        assert!(align(&[vec![0, 10], vec![11, 2], vec![3, 12]], 1));
        assert!(!align(&[vec![0, 10], vec![2], vec![12]], 1));
    }
}
