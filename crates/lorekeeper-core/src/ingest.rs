//! Source ingestion boundary and the per-pack chunking pipeline.
//!
//! An [`IngestAdapter`] turns one [`KnowledgeSource`] into plain text.
//! [`ingest_pack`] drives an adapter over every source of a pack, chunks
//! the results, and reports per-source outcomes. A failing source is logged
//! and contributes zero chunks; it never aborts the rest of the pack.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::chunk::{chunk, ChunkingParams};
use crate::error::IngestError;
use crate::models::{Chunk, KnowledgePack, KnowledgeSource};

/// Converts a raw source into normalized plain text.
#[async_trait]
pub trait IngestAdapter: Send + Sync {
    /// One call per source. Errors are per-source.
    async fn ingest(&self, source: &KnowledgeSource) -> Result<String, IngestError>;
}

/// A source that produced no chunks, and why.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source_id: String,
    pub title: String,
    pub error: String,
}

/// Outcome of ingesting one pack.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PackIngestReport {
    pub pack_id: String,
    pub sources_total: usize,
    pub sources_indexed: usize,
    pub chunks: usize,
    pub failures: Vec<SourceFailure>,
}

impl PackIngestReport {
    /// e.g. `"3 of 4 sources indexed"`.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} sources indexed",
            self.sources_indexed, self.sources_total
        )
    }

    pub fn is_complete(&self) -> bool {
        self.sources_indexed == self.sources_total
    }
}

/// Ingest and chunk every source of `pack`, in order.
///
/// Sequence numbers are pack-wide and contiguous. Disabled packs are
/// skipped entirely and report zero sources indexed.
pub async fn ingest_pack(
    pack: &KnowledgePack,
    adapter: &dyn IngestAdapter,
    params: ChunkingParams,
) -> (Vec<Chunk>, PackIngestReport) {
    let mut report = PackIngestReport {
        pack_id: pack.id.clone(),
        sources_total: pack.sources.len(),
        ..Default::default()
    };
    let mut chunks = Vec::new();
    if !pack.enabled {
        return (chunks, report);
    }

    let params = params.clamped();
    for source in &pack.sources {
        match adapter.ingest(source).await {
            Ok(text) => {
                let pieces = chunk(&text, params.chunk_size, params.overlap);
                if pieces.is_empty() {
                    report.failures.push(failure(
                        source,
                        &IngestError::Empty {
                            origin: source.origin.clone(),
                        },
                    ));
                    continue;
                }
                debug!(
                    pack_id = %pack.id,
                    source_id = %source.id,
                    chunks = pieces.len(),
                    "source chunked"
                );
                for piece in pieces {
                    let seq = chunks.len() as u32;
                    chunks.push(Chunk::new(&pack.id, source, seq, piece));
                }
                report.sources_indexed += 1;
            }
            Err(e) => {
                warn!(
                    pack_id = %pack.id,
                    source_id = %source.id,
                    title = %source.title,
                    error = %e,
                    "source ingestion failed; skipping"
                );
                report.failures.push(failure(source, &e));
            }
        }
    }
    report.chunks = chunks.len();
    (chunks, report)
}

fn failure(source: &KnowledgeSource, error: &IngestError) -> SourceFailure {
    SourceFailure {
        source_id: source.id.clone(),
        title: source.title.clone(),
        error: error.to_string(),
    }
}

/// Normalize extracted text: unify line endings, strip control characters
/// other than `\n` and `\t`, and trim.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}
