//! Prompt-facing entry point for the chat loop.
//!
//! [`KnowledgeIntegration::get_context`] decides whether to query at all,
//! runs the query, and renders the hits as one delimited block ready to be
//! prepended to an LLM prompt.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use lorekeeper_core::models::RetrievedChunk;
use lorekeeper_core::search::{SearchParams, DEFAULT_MIN_SCORE, DEFAULT_TOP_K, MAX_TOP_K};

use crate::analytics::{QueryEvent, QueryLogSink};
use crate::config::RetrievalConfig;
use crate::index::VectorIndex;
use crate::logging::ANALYTICS_TARGET;

pub const CONTEXT_HEADER: &str = "=== Knowledge Base Context ===";
pub const CONTEXT_FOOTER: &str = "=== End Knowledge Base Context ===";

/// Caller-supplied retrieval settings.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct KnowledgeSettings {
    pub use_knowledge: bool,
    /// Number of chunks to include, `1..=10`.
    pub depth: usize,
    pub min_score: f64,
}

impl KnowledgeSettings {
    pub fn clamped(&self) -> Self {
        let params = SearchParams::new(self.depth, self.min_score).clamped();
        Self {
            use_knowledge: self.use_knowledge,
            depth: params.top_k,
            min_score: params.min_score,
        }
    }

    fn search_params(&self) -> SearchParams {
        SearchParams::new(self.depth, self.min_score).clamped()
    }
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            use_knowledge: true,
            depth: DEFAULT_TOP_K,
            min_score: DEFAULT_MIN_SCORE,
        }
    }
}

impl From<&RetrievalConfig> for KnowledgeSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            use_knowledge: config.use_knowledge,
            depth: config.top_k.min(MAX_TOP_K),
            min_score: config.min_score,
        }
    }
}

pub struct KnowledgeIntegration {
    index: Arc<VectorIndex>,
    query_log: Option<Arc<dyn QueryLogSink>>,
}

impl KnowledgeIntegration {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self {
            index,
            query_log: None,
        }
    }

    pub fn with_query_log(mut self, sink: Arc<dyn QueryLogSink>) -> Self {
        self.query_log = Some(sink);
        self
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Formatted knowledge block for `question`, or `None` when knowledge is
    /// turned off, the context has no enabled packs, or nothing cleared the
    /// threshold.
    pub async fn get_context(
        &self,
        context_id: &str,
        question: &str,
        settings: &KnowledgeSettings,
    ) -> Option<String> {
        if !settings.use_knowledge {
            return None;
        }
        if !self.index.has_enabled_packs(context_id).await {
            return None;
        }

        let hits = self
            .index
            .query(context_id, question, settings.search_params())
            .await;
        self.log_query(context_id, question, &hits);

        if hits.is_empty() {
            None
        } else {
            Some(format_context_block(&hits))
        }
    }

    fn log_query(&self, context_id: &str, question: &str, hits: &[RetrievedChunk]) {
        let top_score = hits.first().map(|h| h.score);
        info!(
            target: ANALYTICS_TARGET,
            context = %context_id,
            question = %question,
            chunks = hits.len(),
            top_score = top_score.unwrap_or(0.0),
            "knowledge query"
        );
        let Some(sink) = &self.query_log else {
            return;
        };
        let event = QueryEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            context_id: context_id.to_string(),
            question: question.to_string(),
            chunks_returned: hits.len(),
            top_score,
        };
        if let Err(e) = sink.record(&event) {
            warn!(error = %e, "query log write failed; dropping event");
        }
    }
}

/// Render hits in rank order between the header and footer lines.
pub fn format_context_block(hits: &[RetrievedChunk]) -> String {
    let mut out = String::new();
    out.push_str(CONTEXT_HEADER);
    out.push('\n');
    for (i, hit) in hits.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!(
            "[{}] Source: {} (pack {}, relevance {:.2})\n",
            i + 1,
            hit.source_title,
            hit.pack_id,
            hit.score
        ));
        out.push_str(hit.text.trim_end());
        out.push('\n');
    }
    out.push_str(CONTEXT_FOOTER);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, pack: &str, score: f64, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: format!("{}-{}", pack, title),
            text: text.to_string(),
            score,
            source_title: title.to_string(),
            pack_id: pack.to_string(),
            sequence_no: 0,
        }
    }

    #[test]
    fn test_format_block() {
        let block = format_context_block(&[
            hit("Boss Guide", "p1", 0.8123, "Dodge the fire."),
            hit("Wiki", "p2", 0.5, "Use ice."),
        ]);
        let expected = "=== Knowledge Base Context ===\n\
[1] Source: Boss Guide (pack p1, relevance 0.81)\n\
Dodge the fire.\n\
\n\
[2] Source: Wiki (pack p2, relevance 0.50)\n\
Use ice.\n\
=== End Knowledge Base Context ===";
        assert_eq!(block, expected);
    }

    #[test]
    fn test_settings_clamped() {
        let s = KnowledgeSettings {
            use_knowledge: true,
            depth: 0,
            min_score: 3.0,
        }
        .clamped();
        assert_eq!(s.depth, 1);
        assert_eq!(s.min_score, 1.0);
        let s = KnowledgeSettings {
            use_knowledge: false,
            depth: 99,
            min_score: -0.5,
        }
        .clamped();
        assert_eq!((s.use_knowledge, s.depth, s.min_score), (false, 10, 0.0));
    }

    #[test]
    fn test_settings_from_retrieval_config() {
        let s = KnowledgeSettings::from(&RetrievalConfig::default());
        assert_eq!(s, KnowledgeSettings::default());
    }
}
