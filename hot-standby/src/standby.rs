//! Hot standby synchronization.
//!
//! For every configured hot standby root of a server, in order, the
//! destination `<root>/<server>` is brought in line with the latest backup:
//!
//! 1. pick a strategy ([`select_strategy`]),
//! 2. either apply the manifest diff of the two latest backups, or delete
//!    the destination and copy the whole backup again,
//! 3. copy the overrides directory on top.
//!
//! Each phase is dispatched to the worker pool and closed by a barrier. A
//! failing directory is counted and skipped; it never stops the pass.

use crate::backup::{
    list_backups, tablespace_dir, Backup, ChainExtractor, Extraction, Extractor, DATA_DIR,
};
use crate::config::{Config, ServerConfig};
use crate::fs::ops;
use crate::fs::walker::{walk_directory, WalkOptions};
use crate::manifest;
use crate::utils::errors::{Result, SyncError};
use crate::utils::format::{format_bytes, format_elapsed};
use crate::workers::{WorkerJob, WorkerPool};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// What triggered the pass: the backup just taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub label: String,
    /// The backup is incremental and must be materialized before use
    pub incremental: bool,
}

/// One hot standby directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub root: PathBuf,
    /// `<root>/<server name>`
    pub destination: PathBuf,
    pub overrides: Option<PathBuf>,
    pub incremental: bool,
}

impl SyncTarget {
    pub fn new(root: &Path, server: &ServerConfig, incremental: bool) -> Self {
        Self {
            root: root.to_path_buf(),
            destination: root.join(&server.name),
            overrides: server.hot_standby_overrides.clone(),
            incremental,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Apply the diff between the two most recent backups
    IncrementalApply,
    /// Delete the destination and copy the whole backup
    FullResync,
}

/// Incremental apply needs a plain (non-incremental) backup, an existing
/// destination, and two backups to diff. Anything else resyncs fully.
pub fn select_strategy(incremental: bool, destination_exists: bool, backup_count: usize) -> Strategy {
    if !incremental && destination_exists && backup_count >= 2 {
        Strategy::IncrementalApply
    } else {
        Strategy::FullResync
    }
}

/// Outcome of one pass over all hot standby directories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub total: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub jobs_completed: usize,
    pub bytes_copied: u64,
}

impl SyncReport {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// The hot standby controller for one server.
pub struct HotStandby {
    server: ServerConfig,
    backups_dir: PathBuf,
    workspace: PathBuf,
    workers: usize,
    extractor: Box<dyn Extractor>,
}

impl HotStandby {
    pub fn new(config: &Config, server: &ServerConfig) -> Result<Self> {
        Ok(Self {
            server: server.clone(),
            backups_dir: config.server_backup_dir(&server.name),
            workspace: config.main.workspace.clone(),
            workers: config.number_of_workers(server),
            extractor: Box::new(ChainExtractor::new(config.codec()?)),
        })
    }

    /// Replace the incremental backup materializer.
    pub fn with_extractor(mut self, extractor: Box<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn targets(&self, request: &SyncRequest) -> Vec<SyncTarget> {
        self.server
            .hot_standby
            .iter()
            .map(|root| SyncTarget::new(root, &self.server, request.incremental))
            .collect()
    }

    /// Synchronize every hot standby directory. The report's `failed` count
    /// is the number of directories that could not be brought up to date.
    pub fn execute(&self, request: &SyncRequest) -> SyncReport {
        let targets = self.targets(request);
        if targets.is_empty() {
            debug!(server = %self.server.name, "No hot standby configured");
            return SyncReport::default();
        }

        debug!("Hot standby (execute): {}/{}", self.server.name, request.label);
        let start = Instant::now();

        let backups = list_backups(&self.backups_dir).unwrap_or_else(|e| {
            warn!(
                "Unable to list backups in {}: {}",
                self.backups_dir.display(),
                e
            );
            Vec::new()
        });

        let mut pass = Pass {
            standby: self,
            request,
            backups,
            pool: None,
            extraction: None,
        };

        let total = targets.len();
        let mut failed = 0usize;

        for (i, target) in targets.iter().enumerate() {
            info!(
                "Processing hot standby directory {}/{}: {}",
                i + 1,
                total,
                target.root.display()
            );

            if let Err(e) = pass.sync_target(target) {
                pass.drain();
                failed += 1;
                error!(
                    "Failed to process hot standby directory {}: {}",
                    target.root.display(),
                    e
                );
            }
        }

        let (jobs_completed, bytes_copied) = pass
            .pool
            .as_ref()
            .map(|pool| (pool.jobs_completed(), pool.bytes_copied()))
            .unwrap_or_default();

        // Tears down the pool and removes the extraction root
        drop(pass);

        let report = SyncReport {
            total,
            failed,
            elapsed: start.elapsed(),
            jobs_completed,
            bytes_copied,
        };

        info!(
            "Hot standby: {}/{} - Processed {}/{} directories successfully (Elapsed: {}, Jobs: {}, Copied: {})",
            self.server.name,
            request.label,
            report.succeeded(),
            report.total,
            format_elapsed(report.elapsed),
            report.jobs_completed,
            format_bytes(report.bytes_copied)
        );

        report
    }
}

/// Per-pass state: the worker pool and the extracted backup are created on
/// first use, shared by every directory, and released when the pass ends.
struct Pass<'a> {
    standby: &'a HotStandby,
    request: &'a SyncRequest,
    backups: Vec<Backup>,
    pool: Option<WorkerPool>,
    extraction: Option<Extraction>,
}

impl Pass<'_> {
    fn pool(&mut self) -> Result<&mut WorkerPool> {
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => WorkerPool::new(self.standby.workers)?,
        };
        Ok(self.pool.insert(pool))
    }

    /// Barrier: wait for the phase and fail if any of its jobs failed.
    fn barrier(&mut self, phase: &str) -> Result<()> {
        let pool = self.pool()?;
        pool.wait();
        if pool.outcome() {
            Ok(())
        } else {
            Err(SyncError::Workers(format!("{} jobs failed", phase)))
        }
    }

    /// Let jobs of a failed directory finish before the next one starts.
    fn drain(&mut self) {
        if let Some(pool) = self.pool.as_mut() {
            pool.wait();
        }
    }

    fn sync_target(&mut self, target: &SyncTarget) -> Result<()> {
        let strategy = select_strategy(
            target.incremental,
            ops::exists(&target.destination),
            self.backups.len(),
        );
        debug!(destination = %target.destination.display(), ?strategy, "Strategy chosen");

        match strategy {
            Strategy::IncrementalApply => self.apply_diff(target)?,
            Strategy::FullResync => self.full_resync(target)?,
        }
        self.barrier("synchronization")?;

        self.apply_overrides(target)
    }

    fn apply_diff(&mut self, target: &SyncTarget) -> Result<()> {
        let (old, new) = match self.backups.as_slice() {
            [.., old, new] => (old, new),
            _ => {
                return Err(SyncError::NoBackups(
                    self.standby.backups_dir.display().to_string(),
                ))
            }
        };
        let source = new.data_dir();
        let old_manifest = old.manifest_path();
        let new_manifest = new.manifest_path();

        trace!("old_manifest: {}", old_manifest.display());
        trace!("new_manifest: {}", new_manifest.display());

        let diff = manifest::compare(&old_manifest, &new_manifest)?;
        let destination = &target.destination;
        let pool = self.pool()?;

        for path in diff.deleted.keys() {
            let file = destination.join(path);
            if ops::exists(&file) {
                pool.submit(WorkerJob::DeleteFile { path: file });
            } else {
                debug!("{} doesn't exist", file.display());
            }
        }

        for path in diff.changed.keys() {
            let (from, to) = (source.join(path), destination.join(path));
            trace!("hot_standby changed: {} -> {}", from.display(), to.display());
            pool.submit(WorkerJob::CopyFile { from, to });
        }

        for path in diff.added.keys() {
            let (from, to) = (source.join(path), destination.join(path));
            trace!("hot_standby new: {} -> {}", from.display(), to.display());
            pool.submit(WorkerJob::CopyFile { from, to });
        }

        info!(
            "Applying diff to {}: {} deleted, {} changed, {} added ({})",
            destination.display(),
            diff.deleted.len(),
            diff.changed.len(),
            diff.added.len(),
            format_bytes(diff.bytes_to_copy())
        );

        Ok(())
    }

    fn full_resync(&mut self, target: &SyncTarget) -> Result<()> {
        let standby = self.standby;
        let request = self.request;
        let label = &request.label;

        let source_root = if target.incremental {
            if self.extraction.is_none() {
                let extraction = standby
                    .extractor
                    .extract(&standby.backups_dir, label, &standby.workspace)
                    .inspect_err(|_| error!("Hot standby: Unable to extract backup {}", label))?;
                self.extraction = Some(extraction);
            }
            match &self.extraction {
                Some(extraction) => extraction.root().to_path_buf(),
                None => return Err(SyncError::Extraction(label.clone())),
            }
        } else {
            standby.backups_dir.join(label)
        };

        let source = source_root.join(DATA_DIR);
        if !ops::is_directory(&source) {
            return Err(SyncError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backup data {} not found", source.display()),
            )));
        }

        let destination = &target.destination;
        let pool = self.pool()?;

        if ops::exists(destination) {
            ops::delete_directory(destination)?;
        }
        ops::mkdir(&target.root)?;
        ops::mkdir(destination)?;

        let files = dispatch_copy_directory(pool, &source, destination)?;

        for (name, tablespace) in &standby.server.hot_standby_tablespaces {
            let from = tablespace_dir(&source_root, name);
            if !ops::is_directory(&from) {
                debug!("Tablespace {} not in backup {}", name, label);
                continue;
            }
            ops::delete_directory(tablespace)?;
            ops::mkdir(tablespace)?;
            pool.submit(WorkerJob::CopyDirectory {
                from,
                to: tablespace.clone(),
            });
        }

        debug!("hot_standby source:      {}", source.display());
        debug!("hot_standby destination: {}", destination.display());
        info!(
            "Full resync of {} from {} ({} files)",
            destination.display(),
            label,
            files
        );

        Ok(())
    }

    fn apply_overrides(&mut self, target: &SyncTarget) -> Result<()> {
        let Some(overrides) = target.overrides.as_deref() else {
            return Ok(());
        };
        if !ops::exists(overrides) || !ops::is_directory(overrides) {
            return Ok(());
        }

        debug!("hot_standby_overrides source:      {}", overrides.display());
        debug!("hot_standby_overrides destination: {}", target.destination.display());

        let pool = self.pool()?;
        dispatch_copy_directory(pool, overrides, &target.destination)?;
        self.barrier("overrides")
    }
}

/// Create the directory skeleton of `from` under `to` on this thread and
/// submit one copy job per file. Returns the number of jobs submitted.
fn dispatch_copy_directory(pool: &WorkerPool, from: &Path, to: &Path) -> Result<usize> {
    let mut jobs = 0usize;

    for entry in walk_directory(from, WalkOptions::tree())? {
        let target = to.join(&entry.relative_path);
        if entry.is_dir {
            ops::mkdir(&target)?;
        } else {
            pool.submit(WorkerJob::CopyFile {
                from: entry.path,
                to: target,
            });
            jobs += 1;
        }
    }

    Ok(jobs)
}
