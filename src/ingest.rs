//! Concrete [`IngestAdapter`] for notes, local files and directories, and URLs.
//!
//! | Kind | Origin | Conversion |
//! |------|--------|------------|
//! | `note` | inline text | used as-is |
//! | `file` | file path | PDF/DOCX through [`extract`](crate::extract), other files as UTF-8 |
//! | `file` | directory path | every supported file, sorted by path, joined by blank lines |
//! | `url` | http(s) URL | HTML through `html2text`, other text types as-is, PDF extracted |
//!
//! All output is normalized with [`normalize_text`]; an empty result is
//! [`IngestError::Empty`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};
use walkdir::WalkDir;

use lorekeeper_core::ingest::{normalize_text, IngestAdapter};
use lorekeeper_core::models::{KnowledgeSource, SourceKind};
use lorekeeper_core::IngestError;

use crate::config::IngestConfig;
use crate::extract::{extract_text, DocumentKind};

/// File extensions picked up when a directory is imported.
pub const DIRECTORY_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "json", "toml", "pdf", "docx"];

/// Default ingestion adapter.
#[derive(Debug, Clone)]
pub struct SourceIngestor {
    client: reqwest::Client,
    max_source_bytes: u64,
}

impl SourceIngestor {
    pub fn new(config: &IngestConfig) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(config.url_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| IngestError::Fetch {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            max_source_bytes: config.max_source_bytes,
        })
    }

    async fn ingest_path(&self, origin: &str) -> Result<String, IngestError> {
        let path = PathBuf::from(origin);
        let limit = self.max_source_bytes;
        let origin = origin.to_string();
        tokio::task::spawn_blocking(move || {
            if path.is_dir() {
                read_directory(&path, limit)
            } else {
                read_file(&path, limit)
            }
        })
        .await
        .map_err(|e| IngestError::Io {
            origin,
            message: e.to_string(),
        })?
    }

    async fn ingest_url(&self, url: &str) -> Result<String, IngestError> {
        let fetch_err = |message: String| IngestError::Fetch {
            url: url.to_string(),
            message,
        };

        let parsed = reqwest::Url::parse(url).map_err(|e| fetch_err(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(fetch_err(format!("unsupported scheme '{}'", parsed.scheme())));
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_err(format!("HTTP {}", response.status())));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_source_bytes {
                return Err(IngestError::TooLarge {
                    origin: url.to_string(),
                    limit: self.max_source_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .unwrap_or_else(|| "text/html".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| fetch_err(e.to_string()))?;
        if bytes.len() as u64 > self.max_source_bytes {
            return Err(IngestError::TooLarge {
                origin: url.to_string(),
                limit: self.max_source_bytes,
            });
        }

        match content_type.as_str() {
            "text/html" | "application/xhtml+xml" => {
                let html = String::from_utf8_lossy(&bytes);
                Ok(html2text::from_read(html.as_bytes(), 80))
            }
            "application/pdf" => {
                extract_text(&bytes, DocumentKind::Pdf).map_err(|e| IngestError::Extract {
                    origin: url.to_string(),
                    message: e.to_string(),
                })
            }
            ct if is_text_content(ct) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            ct => Err(IngestError::Unsupported {
                origin: url.to_string(),
                content_type: ct.to_string(),
            }),
        }
    }
}

#[async_trait]
impl IngestAdapter for SourceIngestor {
    async fn ingest(&self, source: &KnowledgeSource) -> Result<String, IngestError> {
        let raw = match source.kind {
            SourceKind::Note => {
                if source.origin.len() as u64 > self.max_source_bytes {
                    return Err(IngestError::TooLarge {
                        origin: source.title.clone(),
                        limit: self.max_source_bytes,
                    });
                }
                source.origin.clone()
            }
            SourceKind::File => self.ingest_path(&source.origin).await?,
            SourceKind::Url => self.ingest_url(&source.origin).await?,
        };

        let text = normalize_text(&raw);
        if text.is_empty() {
            return Err(IngestError::Empty {
                origin: source.origin.clone(),
            });
        }
        debug!(source_id = %source.id, kind = %source.kind, chars = text.len(), "source ingested");
        Ok(text)
    }
}

fn is_text_content(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type == "application/json"
        || content_type == "application/xml"
        || content_type == "application/toml"
}

fn io_err(path: &Path, e: impl std::fmt::Display) -> IngestError {
    IngestError::Io {
        origin: path.display().to_string(),
        message: e.to_string(),
    }
}

fn read_file(path: &Path, limit: u64) -> Result<String, IngestError> {
    let metadata = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    if metadata.len() > limit {
        return Err(IngestError::TooLarge {
            origin: path.display().to_string(),
            limit,
        });
    }
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;

    match DocumentKind::from_path(path) {
        Some(kind) => extract_text(&bytes, kind).map_err(|e| IngestError::Extract {
            origin: path.display().to_string(),
            message: e.to_string(),
        }),
        None => String::from_utf8(bytes).map_err(|_| IngestError::Unsupported {
            origin: path.display().to_string(),
            content_type: "non-UTF-8 binary".to_string(),
        }),
    }
}

fn is_supported_in_directory(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            DIRECTORY_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Concatenate every supported file under `root`; unreadable files are skipped.
fn read_directory(root: &Path, limit: u64) -> Result<String, IngestError> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_supported_in_directory(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();

    let mut out = String::new();
    let mut total: u64 = 0;
    for path in &paths {
        match read_file(path, limit) {
            Ok(text) => {
                total += text.len() as u64;
                if total > limit {
                    return Err(IngestError::TooLarge {
                        origin: root.display().to_string(),
                        limit,
                    });
                }
                if !out.is_empty() {
                    out.push_str("\n\n");
                }
                out.push_str(&text);
            }
            Err(IngestError::TooLarge { .. }) => {
                return Err(IngestError::TooLarge {
                    origin: root.display().to_string(),
                    limit,
                })
            }
            Err(e) => warn!(path = %path.display(), error = %e, "skipping file in directory source"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ingestor(max_source_bytes: u64) -> SourceIngestor {
        SourceIngestor::new(&IngestConfig {
            max_source_bytes,
            ..IngestConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_note_is_normalized() {
        let source = KnowledgeSource::note("tip", "  first line\r\nsecond\u{0} line  ");
        let text = ingestor(1024).ingest(&source).await.unwrap();
        assert_eq!(text, "first line\nsecond line");
    }

    #[tokio::test]
    async fn test_blank_note_is_empty_error() {
        let source = KnowledgeSource::note("blank", " \n\t ");
        let err = ingestor(1024).ingest(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::Empty { .. }));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let source = KnowledgeSource::new(SourceKind::File, "gone", "/definitely/not/here.md");
        let err = ingestor(1024).ingest(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[tokio::test]
    async fn test_file_over_limit() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("big.txt");
        std::fs::write(&path, "word ".repeat(100)).unwrap();
        let source = KnowledgeSource::new(SourceKind::File, "big", path.to_string_lossy());
        let err = ingestor(64).ingest(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::TooLarge { limit: 64, .. }));
    }

    #[tokio::test]
    async fn test_binary_file_unsupported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob.bin");
        std::fs::write(&path, [0xffu8, 0xfe, 0x00, 0x81]).unwrap();
        let source = KnowledgeSource::new(SourceKind::File, "blob", path.to_string_lossy());
        let err = ingestor(1024).ingest(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_directory_reads_supported_files_in_order() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("b.md"), "bravo").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "alpha").unwrap();
        std::fs::write(tmp.path().join("sub").join("c.md"), "charlie").unwrap();
        std::fs::write(tmp.path().join("skip.png"), [0u8, 1, 2]).unwrap();

        let source =
            KnowledgeSource::new(SourceKind::File, "guides", tmp.path().to_string_lossy());
        let text = ingestor(1024).ingest(&source).await.unwrap();
        assert_eq!(text, "alpha\n\nbravo\n\ncharlie");
    }

    #[tokio::test]
    async fn test_non_http_url_rejected() {
        let source = KnowledgeSource::new(SourceKind::Url, "ftp", "ftp://example.com/x");
        let err = ingestor(1024).ingest(&source).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
    }
}
