//! JSON index files, one per game context.
//!
//! A record stores the vocabulary (terms, document frequencies, IDF table,
//! generation) together with the chunks and vectors embedded against it,
//! so vectors are never restored without the vocabulary that produced them.
//!
//! # Format versions
//!
//! | Version | Contents | On load |
//! |---------|----------|---------|
//! | 1 / none | chunks + vectors, no vocabulary | [`LoadOutcome::Legacy`] |
//! | 2 | full record | [`LoadOutcome::Loaded`] |
//!
//! Files that fail validation load as [`LoadOutcome::Invalid`]. Both
//! non-loaded outcomes leave the context stale until it is rebuilt.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use lorekeeper_core::embedding::{Generation, Vector, Vocabulary};
use lorekeeper_core::index::{IndexEntry, IndexSnapshot};
use lorekeeper_core::models::Chunk;

use crate::error::PersistenceError;

pub const FORMAT_VERSION: u32 = 2;

const IDF_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    context_id: String,
    generation: String,
    saved_at: String,
    /// Enabled packs that were indexed, including ones without chunks.
    #[serde(default)]
    packs: Vec<String>,
    vocabulary: BTreeMap<String, u32>,
    document_frequency: Vec<u32>,
    idf: BTreeMap<u32, f32>,
    total_documents: u32,
    chunks: Vec<Chunk>,
    vectors: Vec<PersistedVector>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedVector {
    chunk_id: String,
    weights: BTreeMap<u32, f32>,
}

/// Result of reading a context's index file.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(IndexSnapshot),
    NotFound,
    /// Pre-vocabulary format; must be rebuilt before it can be queried.
    Legacy(String),
    /// Unreadable or internally inconsistent.
    Invalid(String),
}

/// Reads and writes index files under one directory.
#[derive(Debug, Clone)]
pub struct IndexPersistence {
    dir: PathBuf,
}

impl IndexPersistence {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `context_id`'s index.
    pub fn path_for(&self, context_id: &str) -> PathBuf {
        self.dir.join(file_name_for(context_id))
    }

    /// Write `snapshot` atomically (temp file then rename).
    pub fn save(&self, snapshot: &IndexSnapshot) -> Result<PathBuf, PersistenceError> {
        let record = to_record(snapshot);
        let json = serde_json::to_vec(&record)?;

        std::fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(snapshot.context_id());
        let tmp = path.with_extension("json.tmp");
        let io = |source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        };
        {
            let mut file = std::fs::File::create(&tmp).map_err(io)?;
            file.write_all(&json).map_err(io)?;
            file.sync_all().map_err(io)?;
        }
        std::fs::rename(&tmp, &path).map_err(|source| PersistenceError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Read `context_id`'s index file.
    ///
    /// Only I/O failures other than a missing file are errors; every
    /// content problem maps to a non-`Loaded` outcome.
    pub fn load(&self, context_id: &str) -> Result<LoadOutcome, PersistenceError> {
        let path = self.path_for(context_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadOutcome::NotFound),
            Err(source) => return Err(PersistenceError::Io { path, source }),
        };
        Ok(decode(context_id, &bytes))
    }
}

/// `<sanitized id>-<8 hex of sha256(id)>.json`; distinct ids never collide
/// after sanitizing.
pub fn file_name_for(context_id: &str) -> String {
    let sanitized: String = context_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    let digest = Sha256::digest(context_id.as_bytes());
    let suffix = &hex::encode(digest)[..8];
    format!("{}-{}.json", sanitized, suffix)
}

fn to_record(snapshot: &IndexSnapshot) -> PersistedIndex {
    let vocab = snapshot.vocabulary();
    PersistedIndex {
        format_version: FORMAT_VERSION,
        context_id: snapshot.context_id().to_string(),
        generation: vocab.generation().to_string(),
        saved_at: chrono::Utc::now().to_rfc3339(),
        packs: snapshot.pack_ids().iter().cloned().collect(),
        vocabulary: vocab
            .terms()
            .iter()
            .map(|(t, d)| (t.clone(), *d))
            .collect(),
        document_frequency: vocab.document_frequencies().to_vec(),
        idf: vocab
            .idf_table()
            .iter()
            .enumerate()
            .map(|(d, w)| (d as u32, *w))
            .collect(),
        total_documents: vocab.total_documents(),
        chunks: snapshot.entries().iter().map(|e| e.chunk.clone()).collect(),
        vectors: snapshot
            .entries()
            .iter()
            .map(|e| PersistedVector {
                chunk_id: e.chunk.id.clone(),
                weights: e.vector.weights().iter().copied().collect(),
            })
            .collect(),
    }
}

fn decode(context_id: &str, bytes: &[u8]) -> LoadOutcome {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return LoadOutcome::Invalid(format!("malformed index file: {}", e)),
    };

    let version = value
        .get("format_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(1);
    if version < FORMAT_VERSION as u64 || value.get("vocabulary").is_none() {
        return LoadOutcome::Legacy(format!("legacy format (version {})", version));
    }
    if version > FORMAT_VERSION as u64 {
        return LoadOutcome::Invalid(format!("unknown format version {}", version));
    }

    let record: PersistedIndex = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => return LoadOutcome::Invalid(format!("incomplete index record: {}", e)),
    };
    match restore(context_id, record) {
        Ok(snapshot) => LoadOutcome::Loaded(snapshot),
        Err(reason) => LoadOutcome::Invalid(reason),
    }
}

fn restore(context_id: &str, record: PersistedIndex) -> Result<IndexSnapshot, String> {
    if record.context_id != context_id {
        return Err(format!(
            "file belongs to context '{}'",
            record.context_id
        ));
    }

    let generation = Generation::from_string(record.generation);
    let terms: HashMap<String, u32> = record.vocabulary.into_iter().collect();
    let vocabulary = Vocabulary::from_parts(
        generation.clone(),
        terms,
        record.document_frequency,
        record.total_documents,
    )
    .map_err(|e| e.to_string())?;

    for (dim, stored) in &record.idf {
        match vocabulary.idf(*dim) {
            Some(idf) if (idf - stored).abs() <= IDF_TOLERANCE => {}
            _ => return Err(format!("idf table disagrees at dimension {}", dim)),
        }
    }

    let mut by_id: HashMap<String, Chunk> = record
        .chunks
        .into_iter()
        .map(|c| (c.id.clone(), c))
        .collect();
    if by_id.len() != record.vectors.len() {
        return Err(format!(
            "{} chunks but {} vectors",
            by_id.len(),
            record.vectors.len()
        ));
    }

    let mut entries = Vec::with_capacity(record.vectors.len());
    for v in record.vectors {
        let chunk = by_id
            .remove(&v.chunk_id)
            .ok_or_else(|| format!("vector for unknown chunk {}", v.chunk_id))?;
        let vector = Vector::from_weights(generation.clone(), v.weights);
        entries.push(IndexEntry { chunk, vector });
    }
    entries.sort_by(|a, b| {
        a.chunk
            .pack_id
            .cmp(&b.chunk.pack_id)
            .then(a.chunk.sequence_no.cmp(&b.chunk.sequence_no))
    });

    let packs: BTreeSet<String> = record.packs.into_iter().collect();
    IndexSnapshot::from_parts(context_id, vocabulary, entries, packs).map_err(|e| e.to_string())
}
