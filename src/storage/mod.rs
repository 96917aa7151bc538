use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use bytes::Bytes;
use half::f16;
use roaring::RoaringBitmap;
use serde::{Serialize, Deserialize};
use serde::de::DeserializeOwned;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::RecordId;
use crate::index::feedback::{FeedbackSnapshot, FeedbackWriter};
use crate::index::forward::{ForwardList, ForwardWriter, RefiningBlock};
use crate::index::inverted::{InvertedListReadView, InvertedWriter};
use crate::index::trie::{TrieNode, TrieWriter};
use crate::schema::Schema;

pub const HEADER_FILE: &str = "header.slx";
pub const TRIE_FILE: &str = "trie.slx";
pub const FORWARD_FILE: &str = "forward.slx";
pub const INVERTED_FILE: &str = "inverted.slx";
pub const FEEDBACK_FILE: &str = "feedback.slx";

const CURRENT_COUNTER: u16 = 1;
/// Major version of the serializer crate the bodies are written with.
const SERIALIZER_VERSION: u32 = 1;

/// Fixed-size record at the head of every index file. Indexes do not
/// load across serializer versions or architectures; a mismatch is
/// surfaced instead of a misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexVersion {
    pub counter: u16,
    pub serializer_version: u32,
    /// 0 big endian, 1 little endian.
    pub endianness: u8,
    /// Pointer width in bytes, 4 or 8.
    pub pointer_width: u8,
}

impl IndexVersion {
    pub fn current() -> Self {
        IndexVersion {
            counter: CURRENT_COUNTER,
            serializer_version: SERIALIZER_VERSION,
            endianness: if cfg!(target_endian = "little") { 1 } else { 0 },
            pointer_width: std::mem::size_of::<usize>() as u8,
        }
    }
}

/// Bincode of IndexVersion with the default fixed-int config.
const VERSION_BYTES: usize = 8;
const CRC_BYTES: usize = 4;

fn write_index_file<T: Serialize>(path: &Path, body: &T) -> Result<()> {
    let encoded = bincode::serialize(body)?;
    let compressed = lz4_flex::compress_prepend_size(&encoded);
    let crc = crc32fast::hash(&compressed);

    let mut out = bincode::serialize(&IndexVersion::current())?;
    debug_assert_eq!(out.len(), VERSION_BYTES);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&compressed);
    fs::write(path, out)?;
    Ok(())
}

fn read_index_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path)?;
    if raw.len() < VERSION_BYTES + CRC_BYTES {
        return Err(Error::new(
            ErrorKind::IndexFileCorrupt,
            format!("{} is truncated", path.display()),
        ));
    }
    let stored: IndexVersion = bincode::deserialize(&raw[..VERSION_BYTES])?;
    if stored != IndexVersion::current() {
        return Err(Error::new(
            ErrorKind::IncompatibleIndexVersion,
            format!("{} was written by an incompatible engine: {:?}", path.display(), stored),
        ));
    }
    let crc = u32::from_le_bytes([
        raw[VERSION_BYTES],
        raw[VERSION_BYTES + 1],
        raw[VERSION_BYTES + 2],
        raw[VERSION_BYTES + 3],
    ]);
    let compressed = &raw[VERSION_BYTES + CRC_BYTES..];
    if crc32fast::hash(compressed) != crc {
        return Err(Error::new(
            ErrorKind::IndexFileCorrupt,
            format!("{} failed its checksum", path.display()),
        ));
    }
    let encoded = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|e| Error::new(ErrorKind::IndexFileCorrupt, format!("{}: {}", path.display(), e)))?;
    bincode::deserialize(&encoded)
        .map_err(|e| Error::new(ErrorKind::IndexFileCorrupt, format!("{}: {}", path.display(), e)))
}

#[derive(Serialize, Deserialize)]
struct SerializedHeader {
    schema: Schema,
    record_count: u32,
}

#[derive(Serialize, Deserialize)]
struct SerializedTrie {
    nodes: Vec<TrieNode>,
    keyword_count: u32,
    next_list_id: u32,
}

#[derive(Serialize, Deserialize)]
struct SerializedForwardList {
    external_id: String,
    data: Vec<u8>,
    refining_data: Vec<u8>,
    refining_offsets: Vec<u32>,
    record_boost_bits: u16,
    roles: Vec<String>,
    payload: Option<Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct SerializedForward {
    lists: Vec<SerializedForwardList>,
    external: Vec<(String, u32)>,
    deleted: Vec<u32>,
}

#[derive(Serialize, Deserialize)]
struct SerializedInverted {
    /// Per list id: (record, half-precision score bits), score-descending.
    lists: Vec<Vec<(u32, u16)>>,
}

/// The writer-side state reconstructed by `load_from_dir`.
pub struct LoadedIndex {
    pub schema: Schema,
    pub trie: TrieWriter,
    pub forward: ForwardWriter,
    pub inverted: InvertedWriter,
    pub feedback: FeedbackWriter,
}

/// Write one file per index plus the header. Bodies are the in-memory
/// layouts (forward lists as their packed buffers, the trie as its node
/// arena, inverted lists as posting arrays), compressed and checksummed.
pub fn save_to_dir(
    dir: &Path,
    schema: &Schema,
    trie: &TrieWriter,
    forward: &ForwardWriter,
    inverted: &InvertedWriter,
    feedback: &FeedbackWriter,
) -> Result<()> {
    fs::create_dir_all(dir)?;

    let header = SerializedHeader { schema: schema.clone(), record_count: forward.record_count() };
    write_index_file(&dir.join(HEADER_FILE), &header)?;

    let trie_view = trie.read_view();
    let body = SerializedTrie {
        nodes: (*trie_view.nodes).clone(),
        keyword_count: trie.keyword_count(),
        next_list_id: trie.next_list_id(),
    };
    write_index_file(&dir.join(TRIE_FILE), &body)?;

    let lists = forward
        .lists()
        .iter()
        .map(|list| {
            let (refining_data, refining_offsets) = list.refining.raw_parts();
            SerializedForwardList {
                external_id: list.external_id.clone(),
                data: list.raw_data().to_vec(),
                refining_data: refining_data.to_vec(),
                refining_offsets: refining_offsets.to_vec(),
                record_boost_bits: list.record_boost.to_bits(),
                roles: list.acl.roles(),
                payload: list.payload.as_ref().map(|p| p.to_vec()),
            }
        })
        .collect();
    let body = SerializedForward {
        lists,
        external: forward.external_map().iter().map(|(k, v)| (k.clone(), v.0)).collect(),
        deleted: forward.deleted_bitmap().iter().collect(),
    };
    write_index_file(&dir.join(FORWARD_FILE), &body)?;

    let body = SerializedInverted {
        lists: inverted
            .lists()
            .iter()
            .map(|list| list.raw_postings().iter().map(|&(rec, score)| (rec.0, score.to_bits())).collect())
            .collect(),
    };
    write_index_file(&dir.join(INVERTED_FILE), &body)?;

    write_index_file(&dir.join(FEEDBACK_FILE), &feedback.snapshot_parts())?;
    Ok(())
}

pub fn load_from_dir(dir: &Path) -> Result<LoadedIndex> {
    let header: SerializedHeader = read_index_file(&dir.join(HEADER_FILE))?;

    let trie_body: SerializedTrie = read_index_file(&dir.join(TRIE_FILE))?;
    let trie = TrieWriter::from_parts(trie_body.nodes, trie_body.keyword_count, trie_body.next_list_id);

    let forward_body: SerializedForward = read_index_file(&dir.join(FORWARD_FILE))?;
    if forward_body.lists.len() != header.record_count as usize {
        return Err(Error::new(
            ErrorKind::IndexFileCorrupt,
            "forward index does not match the header record count",
        ));
    }
    let lists = forward_body
        .lists
        .into_iter()
        .map(|list| {
            Arc::new(ForwardList::from_raw(
                list.external_id,
                list.data,
                RefiningBlock::from_raw(list.refining_data, list.refining_offsets),
                f16::from_bits(list.record_boost_bits),
                list.roles,
                list.payload.map(Bytes::from),
            ))
        })
        .collect();
    let external: HashMap<String, RecordId> = forward_body
        .external
        .into_iter()
        .map(|(k, v)| (k, RecordId(v)))
        .collect();
    let deleted: RoaringBitmap = forward_body.deleted.into_iter().collect();
    let forward = ForwardWriter::restore(lists, external, deleted);

    let inverted_body: SerializedInverted = read_index_file(&dir.join(INVERTED_FILE))?;
    let inverted = InvertedWriter::restore(
        inverted_body
            .lists
            .into_iter()
            .map(|postings| {
                Arc::new(InvertedListReadView::from_sorted_postings(
                    postings
                        .into_iter()
                        .map(|(rec, bits)| (RecordId(rec), f16::from_bits(bits)))
                        .collect(),
                ))
            })
            .collect(),
    );

    let feedback_body: FeedbackSnapshot = read_index_file(&dir.join(FEEDBACK_FILE))?;
    let feedback = FeedbackWriter::restore(feedback_body);

    Ok(LoadedIndex { schema: header.schema, trie, forward, inverted, feedback })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_header_is_eight_bytes() {
        let encoded = bincode::serialize(&IndexVersion::current()).unwrap();
        assert_eq!(encoded.len(), VERSION_BYTES);
    }

    #[test]
    fn corrupt_body_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.slx");
        write_index_file(&path, &vec![1u32, 2, 3]).unwrap();

        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        let err = read_index_file::<Vec<u32>>(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IndexFileCorrupt);
    }

    #[test]
    fn version_mismatch_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.slx");
        write_index_file(&path, &vec![1u32]).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[0] = raw[0].wrapping_add(1); // bump the stored counter
        fs::write(&path, raw).unwrap();

        let err = read_index_file::<Vec<u32>>(&path).unwrap_err();
        assert_eq!(err.kind, ErrorKind::IncompatibleIndexVersion);
    }

    #[test]
    fn round_trip_preserves_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.slx");
        let body = vec![(1u32, 2u16), (3, 4)];
        write_index_file(&path, &body).unwrap();
        let loaded: Vec<(u32, u16)> = read_index_file(&path).unwrap();
        assert_eq!(loaded, body);
    }
}
