//! Worker pool for file-level jobs.
//!
//! The controller submits jobs for one phase, then calls [`WorkerPool::wait`]
//! as a barrier. After the barrier, [`WorkerPool::outcome`] reports whether
//! every job of that phase succeeded. A failing job never stops its siblings;
//! it only flips the phase outcome.

use crate::fs::ops;
use crate::utils::errors::{Result, SyncError};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{debug, error, trace, warn};

/// A unit of work for the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerJob {
    CopyFile { from: PathBuf, to: PathBuf },
    DeleteFile { path: PathBuf },
    CopyDirectory { from: PathBuf, to: PathBuf },
}

impl WorkerJob {
    /// Execute on the current thread, returning the bytes copied.
    fn run(&self) -> io::Result<u64> {
        match self {
            WorkerJob::CopyFile { from, to } => {
                trace!(from = %from.display(), to = %to.display(), "Copy file");
                ops::copy_file(from, to)
            }
            WorkerJob::DeleteFile { path } => {
                if !ops::delete_file(path)? {
                    debug!(path = %path.display(), "Already deleted");
                }
                Ok(0)
            }
            WorkerJob::CopyDirectory { from, to } => {
                trace!(from = %from.display(), to = %to.display(), "Copy directory");
                ops::copy_tree(from, to)
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            WorkerJob::CopyFile { from, to } => {
                format!("copy {} -> {}", from.display(), to.display())
            }
            WorkerJob::DeleteFile { path } => format!("delete {}", path.display()),
            WorkerJob::CopyDirectory { from, to } => {
                format!("copy directory {} -> {}", from.display(), to.display())
            }
        }
    }
}

/// State shared between the controller and the worker threads.
struct Shared {
    pending: Mutex<usize>,
    idle: Condvar,
    outcome: AtomicBool,
    jobs_completed: AtomicUsize,
    bytes_copied: AtomicU64,
}

impl Shared {
    fn record(&self, job: &WorkerJob, result: io::Result<u64>) {
        match result {
            Ok(bytes) => {
                self.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Job failed ({}): {}", job.describe(), e);
                self.outcome.fetch_and(false, Ordering::SeqCst);
            }
        }
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Releases one pending slot when a spawned job ends, even by panic.
struct PendingGuard(Arc<Shared>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.outcome.fetch_and(false, Ordering::SeqCst);
        }
        let mut pending = self.0.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending -= 1;
        if *pending == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// A fixed-size pool of worker threads, or an inline executor when sized 0.
pub struct WorkerPool {
    threads: Option<rayon::ThreadPool>,
    shared: Arc<Shared>,
    last_outcome: bool,
}

impl WorkerPool {
    /// Create a pool of `workers` threads. Zero workers runs jobs inline.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Ok(Self::inline());
        }

        let threads = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("hot-standby-worker-{}", i))
            .panic_handler(|_| error!("Worker job panicked"))
            .build()
            .map_err(|e| SyncError::Workers(e.to_string()))?;

        debug!("Started {} worker threads", workers);

        Ok(Self::with_threads(Some(threads)))
    }

    /// A pool that executes every job on the submitting thread.
    pub fn inline() -> Self {
        Self::with_threads(None)
    }

    fn with_threads(threads: Option<rayon::ThreadPool>) -> Self {
        Self {
            threads,
            shared: Arc::new(Shared {
                pending: Mutex::new(0),
                idle: Condvar::new(),
                outcome: AtomicBool::new(true),
                jobs_completed: AtomicUsize::new(0),
                bytes_copied: AtomicU64::new(0),
            }),
            last_outcome: true,
        }
    }

    /// Number of worker threads (0 when inline).
    pub fn workers(&self) -> usize {
        self.threads
            .as_ref()
            .map(rayon::ThreadPool::current_num_threads)
            .unwrap_or(0)
    }

    /// Queue a job. Runs it immediately when the pool is inline.
    pub fn submit(&self, job: WorkerJob) {
        let Some(threads) = &self.threads else {
            let result = job.run();
            self.shared.record(&job, result);
            return;
        };

        *self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner) += 1;

        let guard = PendingGuard(Arc::clone(&self.shared));
        threads.spawn(move || {
            let result = job.run();
            guard.0.record(&job, result);
            drop(guard);
        });
    }

    /// Block until every submitted job has finished, then latch the outcome
    /// of this phase and start a fresh one.
    pub fn wait(&mut self) {
        self.wait_idle();
        self.last_outcome = self.shared.outcome.swap(true, Ordering::SeqCst);
    }

    fn wait_idle(&self) {
        let mut pending = self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending > 0 {
            pending = self
                .shared
                .idle
                .wait(pending)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether every job of the most recently completed phase succeeded.
    pub fn outcome(&self) -> bool {
        self.last_outcome
    }

    pub fn jobs_completed(&self) -> usize {
        self.shared.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn bytes_copied(&self) -> u64 {
        self.shared.bytes_copied.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn copy_jobs(temp_dir: &TempDir, count: usize) -> std::io::Result<Vec<WorkerJob>> {
        let source = temp_dir.path().join("source");
        fs::create_dir_all(&source)?;

        let mut jobs = Vec::with_capacity(count);
        for i in 0..count {
            let from = source.join(format!("{}", 16384 + i));
            fs::write(&from, format!("relation {}", i))?;
            jobs.push(WorkerJob::CopyFile {
                from,
                to: temp_dir.path().join("target").join(format!("{}", 16384 + i)),
            });
        }
        Ok(jobs)
    }

    #[test]
    fn test_threaded_pool_runs_all_jobs() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let jobs = copy_jobs(&temp_dir, 64)?;

        let mut pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.workers(), 4);

        for job in jobs.iter().cloned() {
            pool.submit(job);
        }
        pool.wait();

        assert!(pool.outcome());
        assert_eq!(pool.jobs_completed(), 64);
        for (i, job) in jobs.iter().enumerate() {
            let WorkerJob::CopyFile { to, .. } = job else { unreachable!() };
            assert_eq!(fs::read_to_string(to)?, format!("relation {}", i));
        }
        Ok(())
    }

    #[test]
    fn test_failed_job_flips_outcome_without_stopping_siblings() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let jobs = copy_jobs(&temp_dir, 8)?;

        let mut pool = WorkerPool::new(2).unwrap();
        pool.submit(WorkerJob::CopyFile {
            from: temp_dir.path().join("does-not-exist"),
            to: temp_dir.path().join("target/never"),
        });
        for job in jobs {
            pool.submit(job);
        }
        pool.wait();

        assert!(!pool.outcome());
        assert_eq!(pool.jobs_completed(), 9);
        assert_eq!(fs::read_dir(temp_dir.path().join("target"))?.count(), 8);
        Ok(())
    }

    #[test]
    fn test_outcome_reflects_latest_phase() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let mut pool = WorkerPool::new(2).unwrap();

        pool.submit(WorkerJob::CopyFile {
            from: temp_dir.path().join("missing"),
            to: temp_dir.path().join("out"),
        });
        pool.wait();
        assert!(!pool.outcome());

        for job in copy_jobs(&temp_dir, 3)? {
            pool.submit(job);
        }
        pool.wait();
        assert!(pool.outcome());
        Ok(())
    }

    #[test]
    fn test_inline_pool() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let jobs = copy_jobs(&temp_dir, 3)?;

        let mut pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.workers(), 0);

        for job in jobs {
            pool.submit(job);
        }
        assert_eq!(pool.jobs_completed(), 3);

        pool.submit(WorkerJob::CopyFile {
            from: temp_dir.path().join("missing"),
            to: temp_dir.path().join("out"),
        });
        pool.wait();
        assert!(!pool.outcome());
        Ok(())
    }

    #[test]
    fn test_deleting_absent_file_succeeds() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let present = temp_dir.path().join("present");
        fs::write(&present, b"x")?;

        let mut pool = WorkerPool::new(2).unwrap();
        pool.submit(WorkerJob::DeleteFile { path: present.clone() });
        pool.submit(WorkerJob::DeleteFile {
            path: temp_dir.path().join("absent"),
        });
        pool.wait();

        assert!(pool.outcome());
        assert!(!present.exists());
        Ok(())
    }

    #[test]
    fn test_copy_directory_job_counts_bytes() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let from = temp_dir.path().join("tblspc_fast");
        fs::create_dir_all(from.join("PG_17_202406281"))?;
        fs::write(from.join("PG_17_202406281/16390"), b"12345")?;

        let to = temp_dir.path().join("restored");
        let mut pool = WorkerPool::new(1).unwrap();
        pool.submit(WorkerJob::CopyDirectory {
            from,
            to: to.clone(),
        });
        pool.wait();

        assert!(pool.outcome());
        assert_eq!(pool.bytes_copied(), 5);
        assert_eq!(fs::read(to.join("PG_17_202406281/16390"))?, b"12345");
        Ok(())
    }

    #[test]
    fn test_drop_waits_for_outstanding_jobs() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let jobs = copy_jobs(&temp_dir, 16)?;

        {
            let pool = WorkerPool::new(3).unwrap();
            for job in jobs.iter().cloned() {
                pool.submit(job);
            }
        }

        assert_eq!(fs::read_dir(temp_dir.path().join("target"))?.count(), 16);
        Ok(())
    }
}
