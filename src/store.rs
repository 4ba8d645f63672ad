//! The record store collaborator: an opaque spreadsheet service reached over
//! HTTP, plus an in-memory stand-in for tests and demo mode.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::DeskError;
use crate::member::{AnnotationEdit, MembershipRecord};

pub type SharedStore = Arc<dyn RecordStore>;

/// Narrow contract with the external store. Every call is treated as a
/// fallible, possibly-slow remote operation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<MembershipRecord>, DeskError>;

    /// One bulk write per flush cycle. The queue owns batching and retry.
    async fn write_annotations_batch(&self, edits: &[AnnotationEdit]) -> Result<(), DeskError>;

    /// Drop any locally cached annotation rows so the next read observes the
    /// most recent batch write.
    async fn invalidate_annotations_cache(&self);

    /// Case-insensitive scan of raw annotation rows.
    async fn search_annotations(&self, term: &str) -> Result<Vec<serde_json::Value>, DeskError>;
}

fn store_err(e: reqwest::Error) -> DeskError {
    DeskError::Store(e.to_string())
}

/// HTTP client for the spreadsheet service. The wire shape is the service's
/// own; we only rely on the three endpoints below.
pub struct SheetStore {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    annotations_cache: RwLock<Option<Vec<serde_json::Value>>>,
}

impl SheetStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, DeskError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(store_err)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
            annotations_cache: RwLock::new(None),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut b = self.client.request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            b = b.header("Authorization", format!("Bearer {key}"));
        }
        b
    }

    async fn annotation_rows(&self) -> Result<Vec<serde_json::Value>, DeskError> {
        if let Some(rows) = self.annotations_cache.read().as_ref() {
            return Ok(rows.clone());
        }
        let resp = self
            .request(reqwest::Method::GET, "/annotations")
            .send()
            .await
            .map_err(store_err)?
            .error_for_status()
            .map_err(store_err)?;
        let rows: Vec<serde_json::Value> = resp.json().await.map_err(store_err)?;
        debug!(rows = rows.len(), "annotation rows fetched");
        *self.annotations_cache.write() = Some(rows.clone());
        Ok(rows)
    }
}

#[async_trait]
impl RecordStore for SheetStore {
    async fn fetch_all(&self) -> Result<Vec<MembershipRecord>, DeskError> {
        let resp = self
            .request(reqwest::Method::GET, "/records")
            .send()
            .await
            .map_err(store_err)?
            .error_for_status()
            .map_err(store_err)?;
        resp.json().await.map_err(store_err)
    }

    async fn write_annotations_batch(&self, edits: &[AnnotationEdit]) -> Result<(), DeskError> {
        self.request(reqwest::Method::POST, "/annotations/batch")
            .json(&edits)
            .send()
            .await
            .map_err(store_err)?
            .error_for_status()
            .map_err(store_err)?;
        Ok(())
    }

    async fn invalidate_annotations_cache(&self) {
        *self.annotations_cache.write() = None;
    }

    async fn search_annotations(&self, term: &str) -> Result<Vec<serde_json::Value>, DeskError> {
        let rows = self.annotation_rows().await?;
        Ok(filter_rows(&rows, term))
    }
}

/// Substring match across every string value of a row.
fn filter_rows(rows: &[serde_json::Value], term: &str) -> Vec<serde_json::Value> {
    let term = term.to_lowercase();
    rows.iter()
        .filter(|row| {
            row.as_object().is_some_and(|obj| {
                obj.values()
                    .filter_map(|v| v.as_str())
                    .any(|s| s.to_lowercase().contains(&term))
            })
        })
        .cloned()
        .collect()
}

/// In-memory store for tests and `--demo`. Tracks write calls and can be
/// told to fail the next N batch writes so retry paths are testable.
#[derive(Default)]
pub struct MemStore {
    records: RwLock<Vec<MembershipRecord>>,
    written: RwLock<Vec<Vec<AnnotationEdit>>>,
    write_calls: AtomicUsize,
    fail_writes: AtomicUsize,
    cache_invalidations: AtomicUsize,
}

impl MemStore {
    pub fn new(records: Vec<MembershipRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Default::default()
        }
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn cache_invalidations(&self) -> usize {
        self.cache_invalidations.load(Ordering::SeqCst)
    }

    /// Every batch that reached a successful write, in call order.
    pub fn written_batches(&self) -> Vec<Vec<AnnotationEdit>> {
        self.written.read().clone()
    }
}

#[async_trait]
impl RecordStore for MemStore {
    async fn fetch_all(&self) -> Result<Vec<MembershipRecord>, DeskError> {
        Ok(self.records.read().clone())
    }

    async fn write_annotations_batch(&self, edits: &[AnnotationEdit]) -> Result<(), DeskError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(DeskError::Store("injected write failure".into()));
        }
        // Apply to the record set so reads observe the edit, like the sheet
        // service would.
        {
            let mut records = self.records.write();
            for edit in edits {
                if let Some(r) = records.iter_mut().find(|r| r.member_id == edit.member_id) {
                    r.comments = edit.comments.clone();
                    r.notes = edit.notes.clone();
                    r.tags = edit.tags.clone();
                }
            }
        }
        self.written.write().push(edits.to_vec());
        Ok(())
    }

    async fn invalidate_annotations_cache(&self) {
        self.cache_invalidations.fetch_add(1, Ordering::SeqCst);
    }

    async fn search_annotations(&self, term: &str) -> Result<Vec<serde_json::Value>, DeskError> {
        let rows: Vec<serde_json::Value> = self
            .records
            .read()
            .iter()
            .filter(|r| r.has_annotations())
            .map(|r| {
                serde_json::json!({
                    "memberId": r.member_id,
                    "email": r.email,
                    "comments": r.comments,
                    "notes": r.notes,
                    "tags": r.tags,
                })
            })
            .collect();
        Ok(filter_rows(&rows, term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rows_matches_any_string_field() {
        let rows = vec![
            serde_json::json!({"memberId": "M1", "comments": "wants a Discount"}),
            serde_json::json!({"memberId": "M2", "comments": "loves the classes"}),
        ];
        let hits = filter_rows(&rows, "discount");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["memberId"], "M1");
        assert!(filter_rows(&rows, "nothing-matches").is_empty());
    }

    #[tokio::test]
    async fn mem_store_applies_batch_writes() {
        let store = MemStore::new(vec![MembershipRecord {
            member_id: "M1".into(),
            ..Default::default()
        }]);
        let edit = AnnotationEdit {
            member_id: "M1".into(),
            email: String::new(),
            comments: "called, considering renewal".into(),
            notes: String::new(),
            tags: vec!["follow-up".into()],
            associate_name: None,
            timestamp: Some(1),
        };
        store.write_annotations_batch(&[edit]).await.unwrap();
        let records = store.fetch_all().await.unwrap();
        assert_eq!(records[0].comments, "called, considering renewal");
        assert_eq!(store.write_calls(), 1);
    }

    #[tokio::test]
    async fn mem_store_injected_failures_are_consumed() {
        let store = MemStore::new(vec![]);
        store.fail_next_writes(1);
        assert!(store.write_annotations_batch(&[]).await.is_err());
        assert!(store.write_annotations_batch(&[]).await.is_ok());
        assert_eq!(store.write_calls(), 2);
    }
}
