use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tiller_runtime::{AvailableModelsSource, RuntimeClient, RuntimeError};
use tiller_store::Store;
use tracing::{debug, info, instrument, warn};

use crate::cache::AvailableModelsCache;
use crate::catalog;
use crate::download::{self, DownloadJob};
use crate::error::{ModelError, Result};
use crate::types::{
    CacheInfo, DownloadStatus, ModelConfig, ModelConfigPatch, ModelPatch, ModelRecord, ModelStatus,
};

/// The model lifecycle manager: persistent catalog, background download
/// jobs, and the installable-models cache.
pub struct ModelManager {
    store: Store,
    runtime: Arc<dyn RuntimeClient>,
    jobs: Arc<DashMap<String, DownloadJob>>,
    cache: AvailableModelsCache,
}

impl ModelManager {
    pub fn new(
        store: Store,
        runtime: Arc<dyn RuntimeClient>,
        source: Arc<dyn AvailableModelsSource>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            store,
            runtime,
            jobs: Arc::new(DashMap::new()),
            cache: AvailableModelsCache::new(source, cache_ttl),
        }
    }

    pub fn get(&self, id: &str) -> Result<ModelRecord> {
        catalog::get(&self.store.lock(), id)
    }

    pub fn get_by_name(&self, name: &str) -> Result<Option<ModelRecord>> {
        catalog::get_by_name(&self.store.lock(), name)
    }

    pub fn list(&self, available_only: bool) -> Result<Vec<ModelRecord>> {
        catalog::list(&self.store.lock(), available_only)
    }

    /// The usable default model, when one is set.
    pub fn default_model(&self) -> Result<Option<ModelRecord>> {
        catalog::default_model(&self.store.lock())
    }

    /// Reconcile the catalog with what the runtime actually has installed.
    ///
    /// Installed descriptors are upserted (preserving `is_default` and
    /// `is_enabled`); local rows the runtime no longer knows become
    /// `removed`. Rows mid-download are left alone; their own job owns
    /// their terminal state. A dead runtime yields the current catalog plus
    /// a soft error instead of failing the call.
    #[instrument(skip(self))]
    pub async fn sync_with_runtime(&self) -> Result<(Vec<ModelRecord>, Option<String>)> {
        let installed = match self.runtime.list_installed().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "catalog sync degraded: runtime unreachable");
                let models = self.list(false)?;
                return Ok((models, Some(e.to_string())));
            }
        };

        let conn = self.store.lock();
        for desc in &installed {
            catalog::upsert_descriptor(&conn, desc)?;
        }

        let installed_names: std::collections::HashSet<&str> =
            installed.iter().map(|d| d.name.as_str()).collect();
        for row in catalog::list(&conn, false)? {
            let gone = !installed_names.contains(row.name.as_str());
            let reapable = matches!(row.status, ModelStatus::Available | ModelStatus::Installing);
            if gone && reapable {
                catalog::set_status(&conn, &row.id, ModelStatus::Removed)?;
            }
        }

        let models = catalog::list(&conn, false)?;
        info!(installed = installed.len(), catalog = models.len(), "catalog synced");
        Ok((models, None))
    }

    /// Start downloading `name` from the runtime's registry. The row is
    /// created (or revived) in `downloading` state and a background job
    /// drives it to `available` or `error`.
    #[instrument(skip(self, display_name, description), fields(name))]
    pub fn request_download(
        &self,
        name: &str,
        display_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ModelRecord> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ModelError::Validation("model name is empty".into()));
        }

        // Map entry creation is the job-uniqueness gate; entry() makes the
        // check-and-insert atomic.
        let job = DownloadJob::new();
        match self.jobs.entry(name.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ModelError::AlreadyDownloading(name.to_string()));
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(job.clone());
            }
        }

        let row_result = {
            let conn = self.store.lock();
            match catalog::get_by_name(&conn, name) {
                Ok(None) => catalog::insert_downloading(&conn, name, display_name, description),
                Ok(Some(row)) => match row.status {
                    ModelStatus::Removed | ModelStatus::Error => {
                        catalog::reset_to_downloading(&conn, &row.id)
                    }
                    // A downloading row with no live job is an orphan from a
                    // previous process; revive it.
                    ModelStatus::Downloading => catalog::reset_to_downloading(&conn, &row.id),
                    other => Err(ModelError::InvalidState(format!(
                        "model {name} is {other}; only absent, removed, or errored models can be downloaded"
                    ))),
                },
                Err(e) => Err(e),
            }
        };
        let record = match row_result {
            Ok(record) => record,
            Err(e) => {
                self.jobs.remove(name);
                return Err(e);
            }
        };

        download::spawn(
            self.store.clone(),
            self.runtime.clone(),
            self.jobs.clone(),
            job,
            record.id.clone(),
            name.to_string(),
        );
        info!(model = %name, "download started");
        Ok(record)
    }

    /// Cancel an in-flight download. The row goes to `error` immediately;
    /// the background job observes the token and exits.
    #[instrument(skip(self), fields(id))]
    pub fn cancel_download(&self, id: &str) -> Result<ModelRecord> {
        let record = self.get(id)?;
        if record.status != ModelStatus::Downloading {
            return Err(ModelError::InvalidState(format!(
                "model {} is {}, not downloading",
                record.name, record.status
            )));
        }

        {
            let conn = self.store.lock();
            catalog::set_error(&conn, id, "download cancelled")?;
        }
        if let Some(job) = self.jobs.get(&record.name) {
            job.cancel.cancel();
        }
        info!(model = %record.name, "download cancelled");
        self.get(id)
    }

    /// Live download snapshot: row state plus the job's in-memory progress
    /// when one is running (fresher than the coalesced DB writes).
    pub fn download_status(&self, id: &str) -> Result<DownloadStatus> {
        let record = self.get(id)?;
        let live = self.jobs.get(&record.name).map(|j| j.progress());
        let progress = match record.status {
            ModelStatus::Available => 100.0,
            _ => live.or(record.progress).unwrap_or(0.0),
        };
        Ok(DownloadStatus {
            id: record.id,
            name: record.name,
            status: record.status,
            progress,
            error: match record.status {
                ModelStatus::Error => Some(record.description),
                _ => None,
            },
        })
    }

    /// Hard delete: drop the catalog rows and best-effort remove the model
    /// from the runtime, tolerating not-found.
    #[instrument(skip(self), fields(id))]
    pub async fn force_remove(&self, id: &str) -> Result<()> {
        let record = self.get(id)?;
        {
            let conn = self.store.lock();
            catalog::delete_rows(&conn, id)?;
        }
        match self.runtime.delete(&record.name).await {
            Ok(()) => {}
            Err(RuntimeError::NotFound(_)) => {
                debug!(model = %record.name, "runtime had no copy to delete");
            }
            Err(e) => warn!(model = %record.name, error = %e, "runtime delete failed"),
        }
        info!(model = %record.name, "model hard-deleted");
        Ok(())
    }

    /// Soft delete: mark the row `removed` without touching the runtime.
    pub fn soft_remove(&self, id: &str) -> Result<ModelRecord> {
        let record = self.get(id)?;
        if record.status == ModelStatus::Removed {
            return Err(ModelError::InvalidState(format!(
                "model {} is already removed",
                record.name
            )));
        }
        {
            let conn = self.store.lock();
            catalog::set_status(&conn, id, ModelStatus::Removed)?;
        }
        self.get(id)
    }

    /// Bring a removed model back, re-checking the runtime actually still
    /// has it. Absent there, the row stays `removed`.
    #[instrument(skip(self), fields(id))]
    pub async fn restore(&self, id: &str) -> Result<ModelRecord> {
        let record = self.get(id)?;
        if record.status != ModelStatus::Removed {
            return Err(ModelError::InvalidState(format!(
                "model {} is {}, not removed",
                record.name, record.status
            )));
        }

        let installed = self.runtime.list_installed().await?;
        if let Some(desc) = installed.iter().find(|d| d.name == record.name) {
            let conn = self.store.lock();
            catalog::upsert_descriptor(&conn, desc)?;
        } else {
            warn!(model = %record.name, "restore requested but runtime has no copy");
        }
        self.get(id)
    }

    /// Make `id` the default model. Runs as one transaction: the old
    /// default is cleared and the new one set with no window where zero or
    /// two defaults are visible.
    #[instrument(skip(self), fields(id))]
    pub fn set_default(&self, id: &str) -> Result<ModelRecord> {
        let id = id.to_string();
        self.store.with_tx(|tx| -> Result<()> {
            let record = catalog::get(tx, &id)?;
            if record.status != ModelStatus::Available || !record.is_enabled {
                return Err(ModelError::InvalidState(format!(
                    "model {} must be available and enabled to be default",
                    record.name
                )));
            }
            let now = chrono::Utc::now().to_rfc3339();
            tx.execute(
                "UPDATE models SET is_default = 0, updated_at = ?1 WHERE is_default = 1",
                [&now],
            )?;
            tx.execute(
                "UPDATE models SET is_default = 1, updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            Ok(())
        })?;
        self.get(&id)
    }

    /// Patch editable catalog fields.
    pub fn update(&self, id: &str, patch: &ModelPatch) -> Result<ModelRecord> {
        let record = self.get(id)?;
        let now = chrono::Utc::now().to_rfc3339();
        let display_name = patch.display_name.as_deref().unwrap_or(&record.display_name);
        let description = patch.description.as_deref().unwrap_or(&record.description);
        let is_enabled = patch.is_enabled.unwrap_or(record.is_enabled);

        {
            let conn = self.store.lock();
            conn.execute(
                "UPDATE models
                 SET display_name = ?1, description = ?2, is_enabled = ?3, updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![display_name, description, is_enabled, now, id],
            )?;
            // A disabled model cannot stay default.
            if !is_enabled && record.is_default {
                conn.execute(
                    "UPDATE models SET is_default = 0 WHERE id = ?1",
                    [id],
                )?;
            }
        }
        self.get(id)
    }

    pub fn get_config(&self, id: &str) -> Result<ModelConfig> {
        self.get(id)?;
        catalog::get_config(&self.store.lock(), id)
    }

    /// Upsert the model's generation config, merged over current values.
    pub fn update_config(&self, id: &str, patch: &ModelConfigPatch) -> Result<ModelConfig> {
        self.get(id)?;
        let conn = self.store.lock();
        let merged = catalog::get_config(&conn, id)?.apply(patch);
        catalog::upsert_config(&conn, id, &merged)?;
        Ok(merged)
    }

    /// Best-effort `last_used_at` bump; never fails the caller.
    pub fn mark_used(&self, name: &str) {
        let conn = self.store.lock();
        if let Err(e) = catalog::mark_used(&conn, name) {
            debug!(model = %name, error = %e, "mark_used skipped");
        }
    }

    /// Installable model names, served from the TTL cache.
    pub async fn available_models(&self, force_refresh: bool) -> Result<Vec<String>> {
        self.cache.get(force_refresh).await
    }

    pub async fn cache_info(&self) -> CacheInfo {
        self.cache.info().await
    }

    /// Number of live download jobs (used by tests and the health probe).
    pub fn active_downloads(&self) -> usize {
        self.jobs.len()
    }
}
