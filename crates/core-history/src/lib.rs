//! Workout history: the async CRUD contract UIs and storage backends meet
//! at, plus the two bundled providers (in-memory and JSON file).
//!
//! Providers are deliberately dumb: entries in, entries out, capability
//! flags describing what the backend permits. Nothing here knows about
//! the VM; a completed run is summarized into a `HistoryEntry` by the
//! caller.

use core_runtime::ExecutionSpan;
use core_script::CodeStatement;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, info};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    /// A fixed catalog (samples, templates); read-only.
    Static,
    /// User history; read-write.
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_write: bool,
    pub can_delete: bool,
    pub can_filter: bool,
    pub can_multi_select: bool,
    pub supports_history: bool,
}

impl Capabilities {
    pub const READ_ONLY: Capabilities = Capabilities {
        can_write: false,
        can_delete: false,
        can_filter: true,
        can_multi_select: false,
        supports_history: false,
    };

    pub const FULL: Capabilities = Capabilities {
        can_write: true,
        can_delete: true,
        can_filter: true,
        can_multi_select: true,
        supports_history: true,
    };
}

/// Result block attached once a workout has been run to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutResults {
    pub completed_at: u64,
    pub duration_ms: u64,
    pub log: Vec<ExecutionSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub title: String,
    pub created_at: u64,
    pub updated_at: u64,
    /// The workout text exactly as the user wrote it.
    pub raw_content: String,
    pub statements: Vec<CodeStatement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<WorkoutResults>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub schema_version: u32,
}

/// Partial update; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub results: Option<WorkoutResults>,
}

/// Query filter. `days_back` is sugar for a date range ending at `now`,
/// resolved by the provider at call time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Inclusive epoch-ms bounds on `created_at`.
    pub date_range: Option<(u64, u64)>,
    pub days_back: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl HistoryQuery {
    pub fn days_back(days: u32) -> Self {
        Self {
            days_back: Some(days),
            ..Default::default()
        }
    }

    fn effective_range(&self, now: u64) -> Option<(u64, u64)> {
        if let Some(range) = self.date_range {
            return Some(range);
        }
        self.days_back
            .map(|days| (now.saturating_sub(u64::from(days) * 86_400_000), now))
    }

    fn matches(&self, entry: &HistoryEntry, now: u64) -> bool {
        if let Some((from, to)) = self.effective_range(now)
            && !(from..=to).contains(&entry.created_at)
        {
            return false;
        }
        self.tags.iter().all(|tag| entry.tags.contains(tag))
    }

    fn page<T>(&self, mut items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0);
        if offset >= items.len() {
            return Vec::new();
        }
        let mut items = items.split_off(offset);
        if let Some(limit) = self.limit {
            items.truncate(limit);
        }
        items
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("provider is read-only")]
    ReadOnly,
    #[error("entry {0} not found")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

/// The async CRUD contract. Write operations must check capabilities and
/// fail with `ReadOnly` rather than silently dropping data.
pub trait ContentProvider: Send + Sync {
    fn mode(&self) -> ProviderMode;
    fn capabilities(&self) -> Capabilities;

    fn get_entries(
        &self,
        query: Option<&HistoryQuery>,
    ) -> impl Future<Output = Result<Vec<HistoryEntry>, HistoryError>> + Send;
    fn get_entry(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<HistoryEntry>, HistoryError>> + Send;
    fn save_entry(
        &self,
        entry: HistoryEntry,
    ) -> impl Future<Output = Result<HistoryEntry, HistoryError>> + Send;
    fn update_entry(
        &self,
        id: &str,
        patch: EntryPatch,
    ) -> impl Future<Output = Result<HistoryEntry, HistoryError>> + Send;
    fn delete_entry(&self, id: &str) -> impl Future<Output = Result<(), HistoryError>> + Send;
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn apply_patch(entry: &mut HistoryEntry, patch: EntryPatch) {
    if let Some(title) = patch.title {
        entry.title = title;
    }
    if let Some(notes) = patch.notes {
        entry.notes = Some(notes);
    }
    if let Some(tags) = patch.tags {
        entry.tags = tags;
    }
    if let Some(results) = patch.results {
        entry.results = Some(results);
    }
    entry.updated_at = now_ms();
}

/// In-memory provider; the default history backend for tests and
/// ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    entries: Mutex<BTreeMap<String, HistoryEntry>>,
    next_id: Mutex<u64>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_id(&self) -> String {
        let mut next = self.next_id.lock().expect("id lock");
        *next += 1;
        format!("entry-{next}")
    }
}

impl ContentProvider for MemoryProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::History
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    async fn get_entries(
        &self,
        query: Option<&HistoryQuery>,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let now = now_ms();
        let entries = self.entries.lock().expect("entries lock");
        let matched: Vec<HistoryEntry> = entries
            .values()
            .filter(|e| query.is_none_or(|q| q.matches(e, now)))
            .cloned()
            .collect();
        Ok(match query {
            Some(q) => q.page(matched),
            None => matched,
        })
    }

    async fn get_entry(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.entries.lock().expect("entries lock").get(id).cloned())
    }

    async fn save_entry(&self, mut entry: HistoryEntry) -> Result<HistoryEntry, HistoryError> {
        if entry.id.is_empty() {
            entry.id = self.mint_id();
        }
        let now = now_ms();
        if entry.created_at == 0 {
            entry.created_at = now;
        }
        entry.updated_at = now;
        entry.schema_version = SCHEMA_VERSION;
        debug!(target: "history", id = %entry.id, "entry saved");
        self.entries
            .lock()
            .expect("entries lock")
            .insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update_entry(
        &self,
        id: &str,
        patch: EntryPatch,
    ) -> Result<HistoryEntry, HistoryError> {
        let mut entries = self.entries.lock().expect("entries lock");
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))?;
        apply_patch(entry, patch);
        Ok(entry.clone())
    }

    async fn delete_entry(&self, id: &str) -> Result<(), HistoryError> {
        let mut entries = self.entries.lock().expect("entries lock");
        entries
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| HistoryError::NotFound(id.to_string()))
    }
}

/// JSON-file-backed provider: one file holding every entry, rewritten on
/// each mutation. Small-history scale by design.
#[derive(Debug)]
pub struct JsonFileProvider {
    path: PathBuf,
    inner: MemoryProvider,
}

impl JsonFileProvider {
    pub fn open(path: PathBuf) -> Result<Self, HistoryError> {
        let inner = MemoryProvider::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| HistoryError::Storage(e.to_string()))?;
            let entries: Vec<HistoryEntry> =
                serde_json::from_str(&raw).map_err(|e| HistoryError::Storage(e.to_string()))?;
            info!(target: "history", path = %path.display(), count = entries.len(), "history loaded");
            let mut map = inner.entries.lock().expect("entries lock");
            let mut max_id = 0u64;
            for entry in entries {
                if let Some(n) = entry
                    .id
                    .strip_prefix("entry-")
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    max_id = max_id.max(n);
                }
                map.insert(entry.id.clone(), entry);
            }
            drop(map);
            *inner.next_id.lock().expect("id lock") = max_id;
        }
        Ok(Self { path, inner })
    }

    fn persist(&self) -> Result<(), HistoryError> {
        let entries = self.inner.entries.lock().expect("entries lock");
        let all: Vec<&HistoryEntry> = entries.values().collect();
        let raw = serde_json::to_string_pretty(&all)
            .map_err(|e| HistoryError::Storage(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| HistoryError::Storage(e.to_string()))
    }
}

impl ContentProvider for JsonFileProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::History
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::FULL
    }

    async fn get_entries(
        &self,
        query: Option<&HistoryQuery>,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        self.inner.get_entries(query).await
    }

    async fn get_entry(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        self.inner.get_entry(id).await
    }

    async fn save_entry(&self, entry: HistoryEntry) -> Result<HistoryEntry, HistoryError> {
        let saved = self.inner.save_entry(entry).await?;
        self.persist()?;
        Ok(saved)
    }

    async fn update_entry(
        &self,
        id: &str,
        patch: EntryPatch,
    ) -> Result<HistoryEntry, HistoryError> {
        let updated = self.inner.update_entry(id, patch).await?;
        self.persist()?;
        Ok(updated)
    }

    async fn delete_entry(&self, id: &str) -> Result<(), HistoryError> {
        self.inner.delete_entry(id).await?;
        self.persist()
    }
}

/// Read-only catalog provider (benchmark workouts, samples). Writes fail
/// with `ReadOnly` per its capabilities.
#[derive(Debug)]
pub struct StaticProvider {
    entries: Vec<HistoryEntry>,
}

impl StaticProvider {
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        Self { entries }
    }
}

impl ContentProvider for StaticProvider {
    fn mode(&self) -> ProviderMode {
        ProviderMode::Static
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ_ONLY
    }

    async fn get_entries(
        &self,
        query: Option<&HistoryQuery>,
    ) -> Result<Vec<HistoryEntry>, HistoryError> {
        let now = now_ms();
        let matched: Vec<HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| query.is_none_or(|q| q.matches(e, now)))
            .cloned()
            .collect();
        Ok(match query {
            Some(q) => q.page(matched),
            None => matched,
        })
    }

    async fn get_entry(&self, id: &str) -> Result<Option<HistoryEntry>, HistoryError> {
        Ok(self.entries.iter().find(|e| e.id == id).cloned())
    }

    async fn save_entry(&self, _entry: HistoryEntry) -> Result<HistoryEntry, HistoryError> {
        Err(HistoryError::ReadOnly)
    }

    async fn update_entry(
        &self,
        _id: &str,
        _patch: EntryPatch,
    ) -> Result<HistoryEntry, HistoryError> {
        Err(HistoryError::ReadOnly)
    }

    async fn delete_entry(&self, _id: &str) -> Result<(), HistoryError> {
        Err(HistoryError::ReadOnly)
    }
}

/// Build a history entry from a run's inputs and its execution log.
pub fn entry_from_run(
    title: impl Into<String>,
    raw_content: impl Into<String>,
    statements: Vec<CodeStatement>,
    completed_at: u64,
    duration_ms: u64,
    log: Vec<ExecutionSpan>,
) -> HistoryEntry {
    HistoryEntry {
        id: String::new(),
        title: title.into(),
        created_at: 0,
        updated_at: 0,
        raw_content: raw_content.into(),
        statements,
        results: Some(WorkoutResults {
            completed_at,
            duration_ms,
            log,
        }),
        tags: Vec::new(),
        notes: None,
        schema_version: SCHEMA_VERSION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(title: &str, created_at: u64, tags: &[&str]) -> HistoryEntry {
        HistoryEntry {
            id: String::new(),
            title: title.to_string(),
            created_at,
            updated_at: created_at,
            raw_content: "30 Situps".to_string(),
            statements: Vec::new(),
            results: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            notes: None,
            schema_version: SCHEMA_VERSION,
        }
    }

    #[tokio::test]
    async fn memory_provider_crud_round_trip() {
        let provider = MemoryProvider::new();
        let saved = provider
            .save_entry(entry("Fran", 0, &["benchmark"]))
            .await
            .expect("save");
        assert!(!saved.id.is_empty());
        let fetched = provider
            .get_entry(&saved.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(fetched.title, "Fran");

        let updated = provider
            .update_entry(
                &saved.id,
                EntryPatch {
                    notes: Some("felt heavy".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(updated.notes.as_deref(), Some("felt heavy"));

        provider.delete_entry(&saved.id).await.expect("delete");
        assert!(
            provider
                .get_entry(&saved.id)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_entry_updates_fail_cleanly() {
        let provider = MemoryProvider::new();
        let err = provider
            .update_entry("entry-404", EntryPatch::default())
            .await
            .expect_err("missing entry");
        assert_eq!(err, HistoryError::NotFound("entry-404".to_string()));
    }

    #[tokio::test]
    async fn tag_and_days_back_filtering() {
        let provider = MemoryProvider::new();
        let now = now_ms();
        provider
            .save_entry(entry("old", now.saturating_sub(10 * 86_400_000), &["wod"]))
            .await
            .expect("save old");
        provider
            .save_entry(entry("recent", now.saturating_sub(3_600_000), &["wod"]))
            .await
            .expect("save recent");
        provider
            .save_entry(entry("untagged", now, &[]))
            .await
            .expect("save untagged");

        let recent = provider
            .get_entries(Some(&HistoryQuery::days_back(2)))
            .await
            .expect("query");
        assert_eq!(recent.len(), 2, "old entry filtered out");

        let query = HistoryQuery {
            tags: vec!["wod".to_string()],
            ..Default::default()
        };
        let tagged = provider.get_entries(Some(&query)).await.expect("query");
        assert_eq!(tagged.len(), 2);
    }

    #[tokio::test]
    async fn paging_applies_offset_then_limit() {
        let provider = MemoryProvider::new();
        for i in 0..5 {
            provider
                .save_entry(entry(&format!("e{i}"), 1_000 + i, &[]))
                .await
                .expect("save");
        }
        let query = HistoryQuery {
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        };
        let page = provider.get_entries(Some(&query)).await.expect("query");
        assert_eq!(page.len(), 2);
    }

    #[tokio::test]
    async fn static_provider_rejects_writes() {
        let provider = StaticProvider::new(vec![entry("Fran", 1, &["benchmark"])]);
        assert_eq!(provider.mode(), ProviderMode::Static);
        assert!(!provider.capabilities().can_write);
        let err = provider
            .save_entry(entry("new", 0, &[]))
            .await
            .expect_err("read-only");
        assert_eq!(err, HistoryError::ReadOnly);
    }

    #[tokio::test]
    async fn json_provider_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        {
            let provider = JsonFileProvider::open(path.clone()).expect("open");
            provider
                .save_entry(entry("Cindy", 0, &["amrap"]))
                .await
                .expect("save");
        }
        let provider = JsonFileProvider::open(path).expect("reopen");
        let entries = provider.get_entries(None).await.expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "Cindy");
        // Fresh ids never collide with persisted ones.
        let saved = provider
            .save_entry(entry("Murph", 0, &[]))
            .await
            .expect("save");
        assert_ne!(saved.id, entries[0].id);
    }
}
