//! In-memory range source.
//!
//! Serves reads from a buffer held in memory. Used for archives loaded from
//! local disk and as a stand-in origin in tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::error::SourceError;
use super::range::{RangeResponse, RangeSource};

/// Range source over an in-memory buffer.
#[derive(Debug)]
pub struct MemoryRangeSource {
    key: String,
    state: RwLock<MemoryState>,
    reads: AtomicUsize,
}

#[derive(Debug)]
struct MemoryState {
    data: Bytes,
    etag: Option<String>,
}

impl MemoryRangeSource {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            state: RwLock::new(MemoryState {
                data: data.into(),
                etag: None,
            }),
            reads: AtomicUsize::new(0),
        }
    }

    /// Sets the strong ETag reported with every read.
    pub fn with_etag(self, etag: impl Into<String>) -> Self {
        self.state.write().etag = Some(etag.into());
        self
    }

    /// Loads a local archive file.
    pub async fn from_file(path: &Path) -> Result<Self, SourceError> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SourceError::NotFound {
                    url: path.display().to_string(),
                }
            } else {
                SourceError::Http {
                    url: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        Ok(Self::new(path.display().to_string(), data))
    }

    /// Swaps the contents, as if the origin published a new archive.
    pub fn replace(&self, data: impl Into<Bytes>, etag: Option<String>) {
        let mut state = self.state.write();
        state.data = data.into();
        state.etag = etag;
    }

    /// Number of reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn read(
        &self,
        offset: u64,
        length: u64,
        known_etag: Option<&str>,
    ) -> Result<RangeResponse, SourceError> {
        let state = self.state.read();
        if let (Some(known), Some(current)) = (known_etag, state.etag.as_deref()) {
            if known != current {
                return Err(SourceError::EtagMismatch {
                    url: self.key.clone(),
                });
            }
        }

        let len = state.data.len() as u64;
        if offset >= len && length > 0 {
            return Err(SourceError::EtagMismatch {
                url: self.key.clone(),
            });
        }
        let end = offset.saturating_add(length).min(len);
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(RangeResponse {
            data: state.data.slice(offset as usize..end as usize),
            etag: state.etag.clone(),
            cache_control: None,
            expires: None,
        })
    }
}

impl RangeSource for MemoryRangeSource {
    fn key(&self) -> &str {
        &self.key
    }

    fn get_bytes<'a>(
        &'a self,
        offset: u64,
        length: u64,
        cancel: Option<&'a CancellationToken>,
        known_etag: Option<&'a str>,
    ) -> BoxFuture<'a, Result<RangeResponse, SourceError>> {
        Box::pin(async move {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(SourceError::Aborted);
            }
            self.read(offset, length, known_etag)
        })
    }
}
