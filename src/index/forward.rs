use std::collections::HashMap;
use std::sync::Arc;
use bytes::Bytes;
use half::f16;
use parking_lot::RwLock;
use roaring::RoaringBitmap;
use crate::compression::vbyte::VByte;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{
    AclOp, AttributeFilter, AttributeId, KeywordId, ListId, RecordId, RecordLookup, RefiningValue,
    MAX_KEYWORDS_PER_RECORD,
};

/// Tokenized occurrences of one keyword inside one searchable attribute,
/// as handed over by the indexer after analysis.
#[derive(Debug, Clone)]
pub struct AttributeOccurrence {
    pub attribute: AttributeId,
    /// Ascending; multi-valued attributes arrive pre-bumped.
    pub positions: Vec<u32>,
    /// Parallel to positions. Not ascending across value boundaries.
    pub char_offsets: Vec<u32>,
    /// Parallel to positions; true where the token was a synonym expansion.
    pub synonym_flags: Vec<bool>,
    /// One entry per set synonym flag: char length of the original form.
    pub synonym_char_lens: Vec<u32>,
}

/// Everything the forward list stores about one keyword of one record.
#[derive(Debug, Clone)]
pub struct KeywordEntry {
    pub keyword_id: KeywordId,
    pub list_id: ListId,
    /// Σ tf × attribute-boost over the record.
    pub tf_boost_sum: f32,
    /// Record-level static score (boost), duplicated per keyword so the
    /// merge workers never touch the record again.
    pub static_score: f32,
    pub occurrences: Vec<AttributeOccurrence>,
}

/// Hit returned by `has_word_in_range`.
#[derive(Debug, Clone, Copy)]
pub struct WordMatch {
    pub keyword_id: KeywordId,
    pub list_id: ListId,
    pub slot: usize,
    pub tf_boost: f32,
    pub static_score: f32,
}

/// Per-record role list. Sorted; guarded by a lock local to the record so
/// ACL edits never serialize unrelated queries.
#[derive(Debug, Default)]
pub struct RecordAcl {
    roles: RwLock<Vec<String>>,
}

impl RecordAcl {
    pub fn new(mut roles: Vec<String>) -> Self {
        roles.sort();
        roles.dedup();
        RecordAcl { roles: RwLock::new(roles) }
    }

    pub fn is_public(&self) -> bool {
        self.roles.read().is_empty()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.read().binary_search_by(|r| r.as_str().cmp(role)).is_ok()
    }

    pub fn roles(&self) -> Vec<String> {
        self.roles.read().clone()
    }

    pub fn modify(&self, op: AclOp, incoming: &[String]) {
        let mut roles = self.roles.write();
        match op {
            AclOp::Add => {
                *roles = incoming.to_vec();
                roles.sort();
                roles.dedup();
            }
            AclOp::Append => {
                roles.extend_from_slice(incoming);
                roles.sort();
                roles.dedup();
            }
            AclOp::Delete => {
                roles.retain(|r| !incoming.contains(r));
            }
        }
    }
}

/// Refining values of one record, packed with an offset table; one slot
/// per refining attribute in schema order.
#[derive(Debug, Clone)]
pub struct RefiningBlock {
    data: Bytes,
    offsets: Vec<u32>,
}

impl RefiningBlock {
    pub fn build(slots: &[Vec<RefiningValue>]) -> Result<Self> {
        let mut data = Vec::new();
        let mut offsets = Vec::with_capacity(slots.len() + 1);
        offsets.push(0);
        for slot in slots {
            let encoded = bincode::serialize(slot)?;
            data.extend_from_slice(&encoded);
            offsets.push(data.len() as u32);
        }
        Ok(RefiningBlock { data: Bytes::from(data), offsets })
    }

    pub fn slot_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn values(&self, slot: usize) -> Result<Vec<RefiningValue>> {
        if slot + 1 >= self.offsets.len() {
            return Err(Error::new(ErrorKind::InvalidArgument, "refining slot out of range"));
        }
        let lo = self.offsets[slot] as usize;
        let hi = self.offsets[slot + 1] as usize;
        Ok(bincode::deserialize(&self.data[lo..hi])?)
    }

    pub fn raw_parts(&self) -> (&[u8], &[u32]) {
        (&self.data, &self.offsets)
    }

    pub fn from_raw(data: Vec<u8>, offsets: Vec<u32>) -> Self {
        RefiningBlock { data: Bytes::from(data), offsets }
    }
}

// Packed buffer section offsets, all derived from the keyword count:
//   [0..4)            count (low 24 bits used)
//   ids               count * 4
//   list ids          count * 4
//   tf×boost          count * 2   (f16 bits)
//   static scores     count * 2   (f16 bits)
//   meta offsets      count * 4   (absolute, blocks contiguous in slot order)
//   meta blocks       variable (vbyte)
const HEADER: usize = 4;

fn ids_off(_c: usize) -> usize {
    HEADER
}
fn list_ids_off(c: usize) -> usize {
    HEADER + 4 * c
}
fn tf_off(c: usize) -> usize {
    HEADER + 8 * c
}
fn static_off(c: usize) -> usize {
    HEADER + 10 * c
}
fn meta_table_off(c: usize) -> usize {
    HEADER + 12 * c
}
fn meta_blocks_off(c: usize) -> usize {
    HEADER + 16 * c
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_f16(data: &[u8], at: usize) -> f32 {
    f16::from_le_bytes([data[at], data[at + 1]]).to_f32()
}

/// One record's forward list: sorted keyword ids with per-keyword scores
/// and on-demand-decoded positional metadata, all in a single owned
/// buffer. Validity lives outside the buffer (see ForwardWriter::deleted).
#[derive(Debug, Clone)]
pub struct ForwardList {
    pub external_id: String,
    data: Bytes,
    pub refining: RefiningBlock,
    pub record_boost: f16,
    pub acl: Arc<RecordAcl>,
    pub payload: Option<Bytes>,
}

impl ForwardList {
    pub fn build(
        external_id: String,
        mut keywords: Vec<KeywordEntry>,
        refining_slots: &[Vec<RefiningValue>],
        record_boost: f32,
        roles: Vec<String>,
        payload: Option<Bytes>,
    ) -> Result<Self> {
        if keywords.len() > MAX_KEYWORDS_PER_RECORD {
            return Err(Error::new(
                ErrorKind::KeywordLimitExceeded,
                format!("record '{}' has {} distinct keywords", external_id, keywords.len()),
            ));
        }
        keywords.sort_by_key(|k| (k.keyword_id, k.list_id));

        let c = keywords.len();
        let mut data = vec![0u8; meta_blocks_off(c)];
        data[0..4].copy_from_slice(&(c as u32).to_le_bytes());

        for (slot, kw) in keywords.iter().enumerate() {
            let at = ids_off(c) + 4 * slot;
            data[at..at + 4].copy_from_slice(&kw.keyword_id.0.to_le_bytes());
            let at = list_ids_off(c) + 4 * slot;
            data[at..at + 4].copy_from_slice(&kw.list_id.0.to_le_bytes());
            let at = tf_off(c) + 2 * slot;
            data[at..at + 2].copy_from_slice(&f16::from_f32(kw.tf_boost_sum).to_le_bytes());
            let at = static_off(c) + 2 * slot;
            data[at..at + 2].copy_from_slice(&f16::from_f32(kw.static_score).to_le_bytes());
        }

        for (slot, kw) in keywords.iter().enumerate() {
            let block_start = data.len() as u32;
            let at = meta_table_off(c) + 4 * slot;
            data[at..at + 4].copy_from_slice(&block_start.to_le_bytes());
            Self::encode_meta_block(&mut data, &kw.occurrences)?;
        }

        Ok(ForwardList {
            external_id,
            data: Bytes::from(data),
            refining: RefiningBlock::build(refining_slots)?,
            record_boost: f16::from_f32(record_boost),
            acl: Arc::new(RecordAcl::new(roles)),
            payload,
        })
    }

    fn encode_meta_block(out: &mut Vec<u8>, occurrences: &[AttributeOccurrence]) -> Result<()> {
        for occ in occurrences {
            if occ.positions.len() != occ.char_offsets.len()
                || occ.positions.len() != occ.synonym_flags.len()
            {
                return Err(Error::new(ErrorKind::Internal, "occurrence arrays out of sync"));
            }
            VByte::encode(out, occ.attribute + 1);
            VByte::encode_ascending_terminated(out, &occ.positions);
            VByte::encode_plain_terminated(out, &occ.char_offsets);

            let nbytes = occ.positions.len().div_ceil(8);
            VByte::encode(out, nbytes as u32);
            let mut bitmap = vec![0u8; nbytes];
            for (i, &flag) in occ.synonym_flags.iter().enumerate() {
                if flag {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            out.extend_from_slice(&bitmap);
            for &len in &occ.synonym_char_lens {
                VByte::encode(out, len);
            }
        }
        out.push(0); // end of keyword block
        Ok(())
    }

    pub fn keyword_count(&self) -> usize {
        (read_u32(&self.data, 0) & 0x00FF_FFFF) as usize
    }

    pub fn keyword_id_at(&self, slot: usize) -> KeywordId {
        let c = self.keyword_count();
        KeywordId(read_u32(&self.data, ids_off(c) + 4 * slot))
    }

    pub fn list_id_at(&self, slot: usize) -> ListId {
        let c = self.keyword_count();
        ListId(read_u32(&self.data, list_ids_off(c) + 4 * slot))
    }

    pub fn tf_boost_at(&self, slot: usize) -> f32 {
        let c = self.keyword_count();
        read_f16(&self.data, tf_off(c) + 2 * slot)
    }

    pub fn static_score_at(&self, slot: usize) -> f32 {
        let c = self.keyword_count();
        read_f16(&self.data, static_off(c) + 2 * slot)
    }

    fn meta_offset(&self, slot: usize) -> usize {
        let c = self.keyword_count();
        read_u32(&self.data, meta_table_off(c) + 4 * slot) as usize
    }

    /// Binary search the sorted keyword-id array.
    pub fn keyword_offset(&self, keyword_id: KeywordId) -> Option<usize> {
        let c = self.keyword_count();
        let mut lo = 0usize;
        let mut hi = c;
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.keyword_id_at(mid) < keyword_id {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < c && self.keyword_id_at(lo) == keyword_id).then_some(lo)
    }

    fn word_match(&self, slot: usize) -> WordMatch {
        WordMatch {
            keyword_id: self.keyword_id_at(slot),
            list_id: self.list_id_at(slot),
            slot,
            tf_boost: self.tf_boost_at(slot),
            static_score: self.static_score_at(slot),
        }
    }

    /// First keyword with id in [lo, hi] passing the attribute filter.
    pub fn first_in_range(
        &self,
        lo: KeywordId,
        hi: KeywordId,
        filter: &AttributeFilter,
    ) -> Result<Option<WordMatch>> {
        let c = self.keyword_count();
        let mut start = 0usize;
        let mut end = c;
        while start < end {
            let mid = (start + end) / 2;
            if self.keyword_id_at(mid) < lo {
                start = mid + 1;
            } else {
                end = mid;
            }
        }
        for slot in start..c {
            if self.keyword_id_at(slot) > hi {
                break;
            }
            if filter.is_unrestricted() || filter.matches(&self.attributes_of(slot)?) {
                return Ok(Some(self.word_match(slot)));
            }
        }
        Ok(None)
    }

    /// Attribute ids a keyword occurs in, decoded on demand.
    pub fn attributes_of(&self, slot: usize) -> Result<Vec<AttributeId>> {
        let mut attrs = Vec::new();
        self.walk_meta_block(slot, |attr, _, _| {
            attrs.push(attr);
            Ok(())
        })?;
        Ok(attrs)
    }

    pub fn positions(&self, slot: usize, attribute: AttributeId) -> Result<Vec<u32>> {
        let mut found = Vec::new();
        self.walk_meta_block(slot, |attr, positions, _| {
            if attr == attribute {
                found = positions;
            }
            Ok(())
        })?;
        Ok(found)
    }

    pub fn char_offsets(&self, slot: usize, attribute: AttributeId) -> Result<Vec<u32>> {
        let mut found = Vec::new();
        self.walk_meta_block(slot, |attr, _, decoded| {
            if attr == attribute {
                found = decoded.char_offsets;
            }
            Ok(())
        })?;
        Ok(found)
    }

    pub fn synonym_flags(&self, slot: usize, attribute: AttributeId) -> Result<Vec<bool>> {
        let mut found = Vec::new();
        self.walk_meta_block(slot, |attr, _, decoded| {
            if attr == attribute {
                found = decoded.synonym_flags;
            }
            Ok(())
        })?;
        Ok(found)
    }

    pub fn synonym_char_lens(&self, slot: usize, attribute: AttributeId) -> Result<Vec<u32>> {
        let mut found = Vec::new();
        self.walk_meta_block(slot, |attr, _, decoded| {
            if attr == attribute {
                found = decoded.synonym_char_lens;
            }
            Ok(())
        })?;
        Ok(found)
    }

    /// Decode the keyword's meta block, invoking the visitor per attribute
    /// with (attribute, positions, remaining fields).
    fn walk_meta_block<F>(&self, slot: usize, mut visit: F) -> Result<()>
    where
        F: FnMut(AttributeId, Vec<u32>, DecodedOccurrence) -> Result<()>,
    {
        let data = &self.data;
        let mut pos = self.meta_offset(slot);
        loop {
            let (tag, used) = VByte::decode(data, pos)?;
            pos += used;
            if tag == 0 {
                return Ok(());
            }
            let attr = tag - 1;
            let (positions, next) = VByte::decode_ascending_terminated(data, pos)?;
            pos = next;
            let (char_offsets, next) = VByte::decode_plain_terminated(data, pos)?;
            pos = next;
            let (nbytes, used) = VByte::decode(data, pos)?;
            pos += used;
            let bitmap = &data[pos..pos + nbytes as usize];
            pos += nbytes as usize;

            let mut synonym_flags = Vec::with_capacity(positions.len());
            let mut set_bits = 0usize;
            for i in 0..positions.len() {
                let flag = bitmap[i / 8] & (1 << (i % 8)) != 0;
                if flag {
                    set_bits += 1;
                }
                synonym_flags.push(flag);
            }
            let mut synonym_char_lens = Vec::with_capacity(set_bits);
            for _ in 0..set_bits {
                let (len, used) = VByte::decode(data, pos)?;
                pos += used;
                synonym_char_lens.push(len);
            }

            visit(attr, positions, DecodedOccurrence { char_offsets, synonym_flags, synonym_char_lens })?;
        }
    }

    /// Rebuild the packed buffer with remapped keyword ids after a trie
    /// reassignment. Slot order follows the new ids.
    pub fn rewrite_ids(&self, mapping: &HashMap<ListId, KeywordId>) -> Result<ForwardList> {
        let c = self.keyword_count();
        let mut slots: Vec<usize> = (0..c).collect();
        let new_id = |slot: usize| -> Result<KeywordId> {
            let list_id = self.list_id_at(slot);
            mapping
                .get(&list_id)
                .copied()
                .ok_or_else(|| Error::new(ErrorKind::Internal, "list id missing from reassignment map"))
        };
        // Mapping is monotone in keyword text, not in the (possibly
        // degenerate) old ids, so re-sort.
        let mut keyed: Vec<(KeywordId, usize)> = Vec::with_capacity(c);
        for slot in slots.drain(..) {
            keyed.push((new_id(slot)?, slot));
        }
        keyed.sort();

        let mut data = vec![0u8; meta_blocks_off(c)];
        data[0..4].copy_from_slice(&(c as u32).to_le_bytes());
        let mut blocks: Vec<&[u8]> = Vec::with_capacity(c);
        for (new_slot, &(id, old_slot)) in keyed.iter().enumerate() {
            let at = ids_off(c) + 4 * new_slot;
            data[at..at + 4].copy_from_slice(&id.0.to_le_bytes());
            let at = list_ids_off(c) + 4 * new_slot;
            data[at..at + 4].copy_from_slice(&self.list_id_at(old_slot).0.to_le_bytes());
            let at = tf_off(c) + 2 * new_slot;
            data[at..at + 2].copy_from_slice(&f16::from_f32(self.tf_boost_at(old_slot)).to_le_bytes());
            let at = static_off(c) + 2 * new_slot;
            data[at..at + 2]
                .copy_from_slice(&f16::from_f32(self.static_score_at(old_slot)).to_le_bytes());

            let start = self.meta_offset(old_slot);
            let end = if old_slot + 1 < c { self.meta_offset(old_slot + 1) } else { self.data.len() };
            blocks.push(&self.data[start..end]);
        }
        for (new_slot, block) in blocks.iter().enumerate() {
            let block_start = data.len() as u32;
            let at = meta_table_off(c) + 4 * new_slot;
            data[at..at + 4].copy_from_slice(&block_start.to_le_bytes());
            data.extend_from_slice(block);
        }

        Ok(ForwardList {
            external_id: self.external_id.clone(),
            data: Bytes::from(data),
            refining: self.refining.clone(),
            record_boost: self.record_boost,
            acl: self.acl.clone(),
            payload: self.payload.clone(),
        })
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }

    pub fn from_raw(
        external_id: String,
        data: Vec<u8>,
        refining: RefiningBlock,
        record_boost: f16,
        roles: Vec<String>,
        payload: Option<Bytes>,
    ) -> Self {
        ForwardList {
            external_id,
            data: Bytes::from(data),
            refining,
            record_boost,
            acl: Arc::new(RecordAcl::new(roles)),
            payload,
        }
    }
}

struct DecodedOccurrence {
    char_offsets: Vec<u32>,
    synonym_flags: Vec<bool>,
    synonym_char_lens: Vec<u32>,
}

/// Forward-index snapshot observed by readers. The deleted bitmap is
/// shared with the writer: deletions take effect without waiting for a
/// merge, readers filter invalid records out.
#[derive(Clone)]
pub struct ForwardReadView {
    pub lists: Arc<Vec<Arc<ForwardList>>>,
    pub external_to_internal: Arc<HashMap<String, RecordId>>,
    deleted: Arc<RwLock<RoaringBitmap>>,
}

impl ForwardReadView {
    pub fn empty() -> Self {
        ForwardReadView {
            lists: Arc::new(Vec::new()),
            external_to_internal: Arc::new(HashMap::new()),
            deleted: Arc::new(RwLock::new(RoaringBitmap::new())),
        }
    }

    pub fn record_count(&self) -> u32 {
        self.lists.len() as u32
    }

    pub fn is_valid(&self, rec: RecordId) -> bool {
        (rec.0 as usize) < self.lists.len() && !self.deleted.read().contains(rec.0)
    }

    pub fn record(&self, rec: RecordId) -> Option<&Arc<ForwardList>> {
        self.lists.get(rec.0 as usize)
    }

    pub fn valid_record(&self, rec: RecordId) -> Option<&Arc<ForwardList>> {
        self.is_valid(rec).then(|| &self.lists[rec.0 as usize])
    }

    pub fn internal_id(&self, external: &str) -> Option<RecordId> {
        self.external_to_internal.get(external).copied()
    }

    pub fn has_word_in_range(
        &self,
        rec: RecordId,
        lo: KeywordId,
        hi: KeywordId,
        filter: &AttributeFilter,
    ) -> Result<Option<WordMatch>> {
        match self.valid_record(rec) {
            Some(list) => list.first_in_range(lo, hi, filter),
            None => Ok(None),
        }
    }
}

/// The writer's forward index. Record ids are dense positions into the
/// list vector; deletion is mark-then-collect, the mark living in the
/// shared bitmap.
pub struct ForwardWriter {
    lists: Vec<Arc<ForwardList>>,
    external_to_internal: HashMap<String, RecordId>,
    deleted: Arc<RwLock<RoaringBitmap>>,
    /// Records below this index are present in the installed read view.
    committed: u32,
}

impl ForwardWriter {
    pub fn new() -> Self {
        ForwardWriter {
            lists: Vec::new(),
            external_to_internal: HashMap::new(),
            deleted: Arc::new(RwLock::new(RoaringBitmap::new())),
            committed: 0,
        }
    }

    pub fn record_count(&self) -> u32 {
        self.lists.len() as u32
    }

    pub fn record(&self, rec: RecordId) -> Option<&Arc<ForwardList>> {
        self.lists.get(rec.0 as usize)
    }

    pub fn is_valid(&self, rec: RecordId) -> bool {
        (rec.0 as usize) < self.lists.len() && !self.deleted.read().contains(rec.0)
    }

    /// Insert a freshly built forward list. A live duplicate primary key is
    /// rejected; a deleted one is superseded (its storage stays until the
    /// collector runs, unreachable through the external map).
    pub fn add(&mut self, list: ForwardList) -> Result<RecordId> {
        if let Some(&existing) = self.external_to_internal.get(&list.external_id) {
            if !self.deleted.read().contains(existing.0) {
                return Err(Error::new(
                    ErrorKind::DuplicatePrimaryKey,
                    format!("record '{}' already exists", list.external_id),
                ));
            }
        }
        let rec = RecordId(self.lists.len() as u32);
        self.external_to_internal.insert(list.external_id.clone(), rec);
        self.lists.push(Arc::new(list));
        Ok(rec)
    }

    pub fn mark_deleted(&mut self, external: &str) -> Result<RecordId> {
        let rec = self
            .external_to_internal
            .get(external)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::RecordNotFound, format!("no record '{}'", external)))?;
        let mut deleted = self.deleted.write();
        if deleted.contains(rec.0) {
            return Err(Error::new(ErrorKind::RecordNotFound, format!("record '{}' already deleted", external)));
        }
        deleted.insert(rec.0);
        Ok(rec)
    }

    /// Undo a deletion; the internal id must still match the primary key,
    /// otherwise the slot was reused.
    pub fn recover(&mut self, external: &str, rec: RecordId) -> Result<()> {
        match self.external_to_internal.get(external) {
            Some(&current) if current == rec => {
                self.deleted.write().remove(rec.0);
                Ok(())
            }
            _ => Err(Error::new(ErrorKind::RecordNotFound, format!("cannot recover record '{}'", external))),
        }
    }

    pub fn lookup_external(&self, external: &str) -> (RecordLookup, Option<RecordId>) {
        match self.external_to_internal.get(external) {
            None => (RecordLookup::AbsentOrToBeDeleted, None),
            Some(&rec) => {
                if self.deleted.read().contains(rec.0) {
                    (RecordLookup::AbsentOrToBeDeleted, Some(rec))
                } else if rec.0 < self.committed {
                    (RecordLookup::Present, Some(rec))
                } else {
                    (RecordLookup::ToBeInserted, Some(rec))
                }
            }
        }
    }

    pub fn acl_modify(&self, external: &str, op: AclOp, roles: &[String]) -> Result<()> {
        let rec = self
            .external_to_internal
            .get(external)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::RecordNotFound, format!("no record '{}'", external)))?;
        self.lists[rec.0 as usize].acl.modify(op, roles);
        Ok(())
    }

    /// Apply a trie reassignment to every forward list.
    pub fn rewrite_keyword_ids(&mut self, mapping: &HashMap<ListId, KeywordId>) -> Result<()> {
        for slot in self.lists.iter_mut() {
            *slot = Arc::new(slot.rewrite_ids(mapping)?);
        }
        Ok(())
    }

    /// Publish the current state; everything now counts as committed.
    pub fn read_view(&mut self) -> ForwardReadView {
        self.committed = self.lists.len() as u32;
        ForwardReadView {
            lists: Arc::new(self.lists.clone()),
            external_to_internal: Arc::new(self.external_to_internal.clone()),
            deleted: self.deleted.clone(),
        }
    }

    pub fn lists(&self) -> &[Arc<ForwardList>] {
        &self.lists
    }

    pub fn external_map(&self) -> &HashMap<String, RecordId> {
        &self.external_to_internal
    }

    pub fn deleted_bitmap(&self) -> RoaringBitmap {
        self.deleted.read().clone()
    }

    pub fn restore(
        lists: Vec<Arc<ForwardList>>,
        external_to_internal: HashMap<String, RecordId>,
        deleted: RoaringBitmap,
    ) -> Self {
        let committed = lists.len() as u32;
        ForwardWriter {
            lists,
            external_to_internal,
            deleted: Arc::new(RwLock::new(deleted)),
            committed,
        }
    }
}

impl Default for ForwardWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::AttributeOp;

    fn entry(id: u32, list: u32, attrs: &[(u32, Vec<u32>)]) -> KeywordEntry {
        KeywordEntry {
            keyword_id: KeywordId(id),
            list_id: ListId(list),
            tf_boost_sum: 1.5,
            static_score: 1.0,
            occurrences: attrs
                .iter()
                .map(|(attr, positions)| AttributeOccurrence {
                    attribute: *attr,
                    positions: positions.clone(),
                    char_offsets: positions.iter().map(|p| p * 5).collect(),
                    synonym_flags: vec![false; positions.len()],
                    synonym_char_lens: Vec::new(),
                })
                .collect(),
        }
    }

    fn sample_list() -> ForwardList {
        ForwardList::build(
            "r1".into(),
            vec![
                entry(300, 0, &[(0, vec![1, 4]), (1, vec![2])]),
                entry(100, 1, &[(0, vec![0])]),
                entry(200, 2, &[(1, vec![7, 9, 100_008])]),
            ],
            &[vec![RefiningValue::Int(7)]],
            1.0,
            vec![],
            None,
        )
        .unwrap()
    }

    #[test]
    fn keyword_ids_are_sorted_and_searchable() {
        let list = sample_list();
        assert_eq!(list.keyword_count(), 3);
        let ids: Vec<u32> = (0..3).map(|s| list.keyword_id_at(s).0).collect();
        assert_eq!(ids, vec![100, 200, 300]);
        assert_eq!(list.keyword_offset(KeywordId(200)), Some(1));
        assert_eq!(list.keyword_offset(KeywordId(250)), None);
    }

    #[test]
    fn positions_round_trip_per_attribute() {
        let list = sample_list();
        let slot = list.keyword_offset(KeywordId(300)).unwrap();
        assert_eq!(list.positions(slot, 0).unwrap(), vec![1, 4]);
        assert_eq!(list.positions(slot, 1).unwrap(), vec![2]);
        assert_eq!(list.char_offsets(slot, 0).unwrap(), vec![5, 20]);

        let slot = list.keyword_offset(KeywordId(200)).unwrap();
        assert_eq!(list.positions(slot, 1).unwrap(), vec![7, 9, 100_008]);
        assert!(list.positions(slot, 0).unwrap().is_empty());
    }

    #[test]
    fn synonym_metadata_round_trips() {
        let list = ForwardList::build(
            "r2".into(),
            vec![KeywordEntry {
                keyword_id: KeywordId(10),
                list_id: ListId(0),
                tf_boost_sum: 1.0,
                static_score: 1.0,
                occurrences: vec![AttributeOccurrence {
                    attribute: 3,
                    positions: vec![0, 1, 2],
                    char_offsets: vec![0, 4, 9],
                    synonym_flags: vec![false, true, false],
                    synonym_char_lens: vec![6],
                }],
            }],
            &[],
            1.0,
            vec![],
            None,
        )
        .unwrap();
        assert_eq!(list.synonym_flags(0, 3).unwrap(), vec![false, true, false]);
        assert_eq!(list.synonym_char_lens(0, 3).unwrap(), vec![6]);
    }

    #[test]
    fn attribute_filters_gate_range_hits() {
        let list = sample_list();
        let any = AttributeFilter::any();
        let hit = list.first_in_range(KeywordId(150), KeywordId(250), &any).unwrap().unwrap();
        assert_eq!(hit.keyword_id, KeywordId(200));

        // Keyword 200 occurs only in attribute 1.
        let only_0 = AttributeFilter { attrs: vec![0], op: AttributeOp::And };
        assert!(list.first_in_range(KeywordId(150), KeywordId(250), &only_0).unwrap().is_none());

        let nand_1 = AttributeFilter { attrs: vec![1], op: AttributeOp::Nand };
        assert!(list.first_in_range(KeywordId(150), KeywordId(250), &nand_1).unwrap().is_none());
        let hit = list.first_in_range(KeywordId(50), KeywordId(150), &nand_1).unwrap().unwrap();
        assert_eq!(hit.keyword_id, KeywordId(100));
    }

    #[test]
    fn duplicate_primary_key_rejected_until_deleted() {
        let mut writer = ForwardWriter::new();
        let list = sample_list();
        let rec = writer.add(list.clone()).unwrap();
        assert_eq!(writer.add(list.clone()).unwrap_err().kind, ErrorKind::DuplicatePrimaryKey);

        writer.mark_deleted("r1").unwrap();
        let rec2 = writer.add(list).unwrap();
        assert_ne!(rec, rec2);
        assert!(writer.is_valid(rec2));
        assert!(!writer.is_valid(rec));
    }

    #[test]
    fn deletion_is_visible_through_existing_read_views() {
        let mut writer = ForwardWriter::new();
        writer.add(sample_list()).unwrap();
        let view = writer.read_view();
        assert!(view.is_valid(RecordId(0)));

        writer.mark_deleted("r1").unwrap();
        assert!(!view.is_valid(RecordId(0)));

        writer.recover("r1", RecordId(0)).unwrap();
        assert!(view.is_valid(RecordId(0)));
    }

    #[test]
    fn lookup_external_distinguishes_pending_from_committed() {
        let mut writer = ForwardWriter::new();
        writer.add(sample_list()).unwrap();
        assert_eq!(writer.lookup_external("r1").0, RecordLookup::ToBeInserted);
        let _view = writer.read_view();
        assert_eq!(writer.lookup_external("r1").0, RecordLookup::Present);
        writer.mark_deleted("r1").unwrap();
        assert_eq!(writer.lookup_external("r1").0, RecordLookup::AbsentOrToBeDeleted);
        assert_eq!(writer.lookup_external("nope").0, RecordLookup::AbsentOrToBeDeleted);
    }

    #[test]
    fn rewrite_ids_keeps_metadata_with_its_keyword() {
        let list = sample_list();
        let mut mapping = HashMap::new();
        // Invert the order: list 1 (id 100) becomes the largest.
        mapping.insert(ListId(1), KeywordId(9000));
        mapping.insert(ListId(2), KeywordId(1000));
        mapping.insert(ListId(0), KeywordId(5000));
        let rewritten = list.rewrite_ids(&mapping).unwrap();

        let ids: Vec<u32> = (0..3).map(|s| rewritten.keyword_id_at(s).0).collect();
        assert_eq!(ids, vec![1000, 5000, 9000]);

        // Old keyword 200 (positions in attribute 1) is now id 1000.
        let slot = rewritten.keyword_offset(KeywordId(1000)).unwrap();
        assert_eq!(rewritten.positions(slot, 1).unwrap(), vec![7, 9, 100_008]);
        assert_eq!(rewritten.list_id_at(slot), ListId(2));
    }

    #[test]
    fn acl_roles_stay_sorted() {
        let acl = RecordAcl::new(vec!["editor".into(), "admin".into()]);
        assert!(acl.has_role("admin"));
        assert!(!acl.has_role("viewer"));
        acl.modify(AclOp::Append, &["viewer".into()]);
        assert!(acl.has_role("viewer"));
        acl.modify(AclOp::Delete, &["admin".into()]);
        assert!(!acl.has_role("admin"));
        acl.modify(AclOp::Add, &["ops".into()]);
        assert_eq!(acl.roles(), vec!["ops".to_string()]);
    }
}
