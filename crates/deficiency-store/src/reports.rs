//! Deficiency report persistence.
//!
//! Saving is idempotent per `report_id`: the first save wins and later saves
//! of the same id are reported as [`SaveOutcome::AlreadyExists`] without
//! touching the stored copy. Attorney revisions are the only mutation, and
//! they append to an item's audit trail rather than replace anything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use deficiency_core::{DeficiencyReport, ItemRevision};
use tracing::{debug, info};

use crate::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    AlreadyExists,
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, report: &DeficiencyReport) -> Result<SaveOutcome, StoreError>;

    async fn load(&self, report_id: &str) -> Result<DeficiencyReport, StoreError>;

    /// Append an attorney revision to one item and return the updated report.
    async fn append_revision(
        &self,
        report_id: &str,
        request_number: &str,
        revision: ItemRevision,
    ) -> Result<DeficiencyReport, StoreError>;
}

fn apply_revision(
    report: &mut DeficiencyReport,
    request_number: &str,
    revision: ItemRevision,
) -> Result<(), StoreError> {
    if report.append_revision(request_number, revision) {
        Ok(())
    } else {
        Err(StoreError::ItemNotFound {
            report_id: report.report_id.clone(),
            request_number: request_number.to_string(),
        })
    }
}

// ── MemoryReportStore ──

/// Reports held in process memory.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: Mutex<HashMap<String, DeficiencyReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, DeficiencyReport>>, StoreError> {
        self.reports
            .lock()
            .map_err(|_| StoreError::Other("mutex poisoned".into()))
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, report: &DeficiencyReport) -> Result<SaveOutcome, StoreError> {
        let mut reports = self.lock()?;
        if reports.contains_key(&report.report_id) {
            debug!(report_id = %report.report_id, "report already stored");
            return Ok(SaveOutcome::AlreadyExists);
        }
        reports.insert(report.report_id.clone(), report.clone());
        Ok(SaveOutcome::Created)
    }

    async fn load(&self, report_id: &str) -> Result<DeficiencyReport, StoreError> {
        self.lock()?
            .get(report_id)
            .cloned()
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))
    }

    async fn append_revision(
        &self,
        report_id: &str,
        request_number: &str,
        revision: ItemRevision,
    ) -> Result<DeficiencyReport, StoreError> {
        let mut reports = self.lock()?;
        let report = reports
            .get_mut(report_id)
            .ok_or_else(|| StoreError::ReportNotFound(report_id.to_string()))?;
        apply_revision(report, request_number, revision)?;
        Ok(report.clone())
    }
}

// ── JsonFileReportStore ──

/// One pretty-printed JSON file per report under a directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partial report.
#[derive(Debug)]
pub struct JsonFileReportStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileReportStore {
    /// Open (creating if needed) a report directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "opened report store");
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a report's file. Ids are restricted to `[A-Za-z0-9_-]` so
    /// they cannot escape the directory.
    pub fn report_path(&self, report_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !report_id.is_empty()
            && report_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(report_id.to_string()));
        }
        Ok(self.dir.join(format!("{report_id}.json")))
    }

    async fn write(&self, path: &Path, report: &DeficiencyReport) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(report)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read(&self, report_id: &str, path: &Path) -> Result<DeficiencyReport, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ReportNotFound(report_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ReportStore for JsonFileReportStore {
    async fn save(&self, report: &DeficiencyReport) -> Result<SaveOutcome, StoreError> {
        let path = self.report_path(&report.report_id)?;
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            debug!(report_id = %report.report_id, "report file already exists");
            return Ok(SaveOutcome::AlreadyExists);
        }
        self.write(&path, report).await?;
        info!(
            report_id = %report.report_id,
            path = %path.display(),
            items = report.items.len(),
            "saved report"
        );
        Ok(SaveOutcome::Created)
    }

    async fn load(&self, report_id: &str) -> Result<DeficiencyReport, StoreError> {
        let path = self.report_path(report_id)?;
        self.read(report_id, &path).await
    }

    async fn append_revision(
        &self,
        report_id: &str,
        request_number: &str,
        revision: ItemRevision,
    ) -> Result<DeficiencyReport, StoreError> {
        let path = self.report_path(report_id)?;
        let _guard = self.write_lock.lock().await;
        let mut report = self.read(report_id, &path).await?;
        apply_revision(&mut report, request_number, revision)?;
        self.write(&path, &report).await?;
        info!(report_id, request_number, "appended revision");
        Ok(report)
    }
}
