use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use assets::{stage_assets, AssetConfig, StagedAssets};
use ffgraph::{OutputFormat, OutputOptions, Quality};
use timeline::TimelineDocument;

use crate::store::{JobStore, RenderJob};
use crate::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderBackend {
    /// ffmpeg filter-graph encode.
    Codec,
    /// Frame-by-frame CPU composition piped to ffmpeg.
    Composition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub doc: TimelineDocument,
    #[serde(default = "default_backend")]
    pub backend: RenderBackend,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub quality: Quality,
}

fn default_backend() -> RenderBackend {
    RenderBackend::Codec
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Per-job working directories are created under this root.
    pub work_root: PathBuf,
    pub asset_config: AssetConfig,
    /// Jobs older than this are removed by `sweep`, along with their
    /// workdirs.
    pub retention: Duration,
    /// When set, completed jobs expose `{base}/{id}/{filename}` instead of
    /// the local output path.
    pub output_url_base: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("renderline"),
            asset_config: AssetConfig::default(),
            retention: Duration::from_secs(24 * 60 * 60),
            output_url_base: None,
        }
    }
}

/// Owns render-job lifecycles: submission spawns the render task and
/// returns immediately; status lives in the injected [`JobStore`].
pub struct JobManager {
    store: Arc<dyn JobStore>,
    config: ManagerConfig,
    cancels: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl JobManager {
    pub fn new(store: Arc<dyn JobStore>, config: ManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            cancels: Mutex::new(HashMap::new()),
        })
    }

    pub fn job(&self, id: &str) -> Option<RenderJob> {
        self.store.get(id)
    }

    /// Validate the document and spawn the render task. Returns the job id
    /// without waiting for any render work.
    pub fn submit(self: &Arc<Self>, request: RenderRequest) -> Result<String, JobError> {
        request.doc.validate()?;
        if request.backend == RenderBackend::Composition && request.format != OutputFormat::Mp4 {
            return Err(JobError::UnsupportedFormat(request.format));
        }

        let id = Uuid::new_v4().to_string();
        let workdir = self.config.work_root.join(&id);
        std::fs::create_dir_all(&workdir)?;

        self.store.insert(RenderJob::new(id.clone(), workdir.clone()));
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancels.lock().insert(id.clone(), cancel.clone());

        info!(job = %id, backend = ?request.backend, "render job submitted");
        let manager = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            manager.run(job_id, request, workdir, cancel).await;
        });
        Ok(id)
    }

    /// Request cancellation. Returns false for unknown or already-finished
    /// jobs.
    pub fn cancel(&self, id: &str) -> bool {
        match self.cancels.lock().get(id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                info!(job = %id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    async fn run(
        self: Arc<Self>,
        id: String,
        request: RenderRequest,
        workdir: PathBuf,
        cancel: Arc<AtomicBool>,
    ) {
        let outcome = self
            .render_job(&id, request, &workdir, cancel.clone())
            .await;
        match outcome {
            Ok(output) => {
                let url = self.output_url(&id, &output);
                info!(job = %id, output = %output.display(), "render job completed");
                self.store.mark_completed(&id, url);
            }
            Err(message) => {
                error!(job = %id, error = %message, "render job failed");
                self.store.mark_failed(&id, message);
            }
        }
        self.cancels.lock().remove(&id);
    }

    async fn render_job(
        &self,
        id: &str,
        request: RenderRequest,
        workdir: &Path,
        cancel: Arc<AtomicBool>,
    ) -> Result<PathBuf, String> {
        let doc = Arc::new(request.doc);
        let staged = self
            .stage(doc.clone(), workdir.to_path_buf())
            .await
            .map_err(|e| e.to_string())?;
        for skipped in &staged.skipped {
            warn!(job = %id, src = %skipped.src, reason = %skipped.reason, "asset skipped");
        }

        let output = workdir.join(format!("output.{}", request.format.extension()));
        let store = self.store.clone();
        let job_id = id.to_string();
        let progress = move |pct: u8| store.update_progress(&job_id, pct);

        match request.backend {
            RenderBackend::Codec => {
                let mut opts = OutputOptions::from_document(&doc);
                opts.format = request.format;
                opts.quality = request.quality;
                ffgraph::render(&doc, &staged, &opts, &output, &progress, &cancel)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            RenderBackend::Composition => {
                let workdir = workdir.to_path_buf();
                let out = output.clone();
                tokio::task::spawn_blocking(move || {
                    composer::render(&doc, &staged, &workdir, &out, &progress, &cancel)
                })
                .await
                .map_err(|e| e.to_string())?
                .map_err(|e| e.to_string())?;
            }
        }
        Ok(output)
    }

    async fn stage(
        &self,
        doc: Arc<TimelineDocument>,
        workdir: PathBuf,
    ) -> Result<StagedAssets, assets::AssetError> {
        let config = self.config.asset_config.clone();
        tokio::task::spawn_blocking(move || stage_assets(&doc, &config, &workdir))
            .await
            .unwrap_or_else(|e| {
                Err(assets::AssetError::Io(std::io::Error::other(e.to_string())))
            })
    }

    fn output_url(&self, id: &str, output: &Path) -> String {
        match (&self.config.output_url_base, output.file_name()) {
            (Some(base), Some(name)) => {
                format!("{}/{}/{}", base.trim_end_matches('/'), id, name.to_string_lossy())
            }
            _ => output.display().to_string(),
        }
    }

    /// Drop jobs past the retention window and delete their workdirs. Jobs
    /// still running get their cancel flag set first.
    pub fn sweep(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        for job in self.store.sweep_created_before(cutoff) {
            if let Some(flag) = self.cancels.lock().remove(&job.id) {
                flag.store(true, Ordering::Relaxed);
            }
            if let Err(e) = std::fs::remove_dir_all(&job.workdir) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(job = %job.id, error = %e, "failed to delete workdir");
                }
            }
            info!(job = %job.id, "swept expired render job");
        }
    }

    /// Periodic sweep as a background task.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep();
            }
        })
    }
}
