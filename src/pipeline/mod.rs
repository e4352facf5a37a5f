//! Concurrent backup ingestion pipeline.
//!
//! A fixed pool of scanning workers walks the group's tracked roots and
//! produces [`Metadata`] for every discovered file; a fixed pool of
//! writer workers pops metadata, streams each file through a fresh
//! fragment session, and hands the updated metadata to the tracking
//! index. The single bounded channel between the pools is the only
//! synchronization point: a full queue blocks scanners, an empty queue
//! blocks writers, and every codec instance is owned exclusively by the
//! writer thread using it.
//!
//! Shutdown is cooperative. Workers observe the shared flag at their next
//! natural checkpoint (after the current file, never mid-fragment), any
//! carrier opened but not yet finalized is finalized partial, and the
//! orchestrator joins every thread before returning.

mod group;
mod metadata;

pub use group::TrackingGroup;
pub use metadata::{
    hash_path, InMemoryIndex, Metadata, RecordError, TrackingIndex, TrackingRecord,
    RECORD_DELIMITER,
};

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::carrier::{CarrierError, CarrierFactory};
use crate::config::ConfigError;
use crate::fragment::{FragmentError, FragmentSummary, FragmentWriter};

/// Errors that abort a pipeline run before or while workers exist.
/// Per-file failures do not abort the run; they are counted and logged.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("carrier error: {0}")]
    Carrier(#[from] CarrierError),

    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// Worker counts, queue depth and output location for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of scanning worker threads.
    pub scanner_count: usize,
    /// Number of writer worker threads.
    pub writer_count: usize,
    /// Bound of the metadata queue between the pools.
    pub queue_depth: usize,
    /// Directory finished carriers are persisted into.
    pub staging_dir: PathBuf,
}

impl PipelineConfig {
    /// A small default sizing writing into `staging_dir`.
    pub fn new<P: Into<PathBuf>>(staging_dir: P) -> Self {
        Self {
            scanner_count: 2,
            writer_count: 2,
            queue_depth: 64,
            staging_dir: staging_dir.into(),
        }
    }
}

/// Per-category counts for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Files discovered by scanners.
    pub scanned: u64,
    /// Files embedded into fresh carrier streams.
    pub embedded: u64,
    /// Files whose index record was refreshed without re-embedding.
    pub metadata_only: u64,
    /// Files skipped as completely unchanged.
    pub skipped: u64,
    /// Files that failed to scan or embed.
    pub failed: u64,
}

impl PipelineReport {
    fn merge(&mut self, other: PipelineReport) {
        self.scanned += other.scanned;
        self.embedded += other.embedded;
        self.metadata_only += other.metadata_only;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Drives tracked files through the fragment engine during a backup run.
pub struct IngestionPipeline {
    group: Arc<TrackingGroup>,
    index: Arc<dyn TrackingIndex>,
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl IngestionPipeline {
    /// Builds a pipeline over a read-only tracking group.
    pub fn new(
        group: TrackingGroup,
        index: Arc<dyn TrackingIndex>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            group: Arc::new(group),
            index,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle another thread can use to request cooperative shutdown.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Runs the pipeline to completion (or cooperative shutdown), joining
    /// every worker thread before returning.
    pub fn run(self) -> Result<PipelineReport, PipelineError> {
        fs::create_dir_all(&self.config.staging_dir)?;

        // Pending roots are claimed dynamically: a scanner finishing one
        // root simply takes the next, so no root assignment is static
        let roots = Arc::new(Mutex::new(self.group.tracked_roots.clone()));
        let (tx, rx) = channel::bounded::<Metadata>(self.config.queue_depth.max(1));

        let mut scanners = Vec::with_capacity(self.config.scanner_count);
        for _ in 0..self.config.scanner_count.max(1) {
            let roots = Arc::clone(&roots);
            let group = Arc::clone(&self.group);
            let shutdown = Arc::clone(&self.shutdown);
            let tx = tx.clone();
            scanners.push(thread::spawn(move || {
                scanner_worker(roots, group, tx, shutdown)
            }));
        }
        // Writers learn the scanners are done when every sender is gone
        drop(tx);

        let mut writers = Vec::with_capacity(self.config.writer_count);
        for _ in 0..self.config.writer_count.max(1) {
            let group = Arc::clone(&self.group);
            let index = Arc::clone(&self.index);
            let shutdown = Arc::clone(&self.shutdown);
            let staging = self.config.staging_dir.clone();
            let rx = rx.clone();
            writers.push(thread::spawn(move || {
                writer_worker(group, index, rx, staging, shutdown)
            }));
        }
        drop(rx);

        // Every thread is joined even if one of them panicked
        let mut report = PipelineReport::default();
        let mut panicked = false;
        for handle in scanners.into_iter().chain(writers) {
            match handle.join() {
                Ok(worker_report) => report.merge(worker_report),
                Err(_) => panicked = true,
            }
        }
        if panicked {
            return Err(PipelineError::WorkerPanicked);
        }

        info!(
            group = %self.group.name,
            scanned = report.scanned,
            embedded = report.embedded,
            metadata_only = report.metadata_only,
            skipped = report.skipped,
            failed = report.failed,
            "pipeline run complete"
        );
        Ok(report)
    }
}

fn scanner_worker(
    roots: Arc<Mutex<Vec<PathBuf>>>,
    group: Arc<TrackingGroup>,
    tx: Sender<Metadata>,
    shutdown: Arc<AtomicBool>,
) -> PipelineReport {
    let mut report = PipelineReport::default();
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let Some(root) = roots.lock().ok().and_then(|mut r| r.pop()) else {
            break;
        };
        debug!(root = %root.display(), "scanning root");
        scan_root(&root, &group, &tx, &shutdown, &mut report);
    }
    report
}

fn scan_root(
    root: &Path,
    group: &TrackingGroup,
    tx: &Sender<Metadata>,
    shutdown: &AtomicBool,
    report: &mut PipelineReport,
) {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "directory unreadable");
                report.failed += 1;
                continue;
            }
        };
        for entry in entries.flatten() {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let path = entry.path();
            if group.is_untracked(&path) {
                continue;
            }
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if !path.is_file() {
                continue;
            }

            report.scanned += 1;
            let meta = match Metadata::for_file(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "file unreadable");
                    report.failed += 1;
                    continue;
                }
            };

            // Blocks while the queue is full; that back-pressure is the
            // pipeline's only flow control
            if tx.send(meta).is_err() {
                return;
            }
        }
    }
}

fn writer_worker(
    group: Arc<TrackingGroup>,
    index: Arc<dyn TrackingIndex>,
    rx: Receiver<Metadata>,
    staging: PathBuf,
    shutdown: Arc<AtomicBool>,
) -> PipelineReport {
    let mut report = PipelineReport::default();
    loop {
        // Checked between files only; the current file always completes
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let Ok(mut meta) = rx.recv() else {
            break;
        };

        // Change detection happens here so a stalled index blocks only
        // this writer thread, never the scanners
        if group.use_index {
            if let Some(record) = index.lookup(&meta.path_hash()) {
                if record.file_hash == meta.file_hash {
                    if record.created_ms == meta.created_ms
                        && record.modified_ms == meta.modified_ms
                        && record.permissions == meta.permissions
                    {
                        report.skipped += 1;
                        continue;
                    }
                    // Content unchanged: keep the existing stream and only
                    // refresh the record
                    meta.product_uuid = record.product_uuid;
                    meta.metadata_update = true;
                }
            }
        }

        if meta.metadata_update {
            index.save(meta.to_record());
            report.metadata_only += 1;
            continue;
        }

        match embed_file(&mut meta, &group, &staging) {
            Ok(summary) => {
                index.save(meta.to_record());
                report.embedded += 1;
                debug!(
                    file = %meta.path.display(),
                    fragments = summary.fragment_count(),
                    bytes = summary.bytes_written,
                    "file embedded"
                );
            }
            Err(e) => {
                warn!(file = %meta.path.display(), error = %e, "embedding failed");
                report.failed += 1;
            }
        }
    }
    report
}

fn embed_file(
    meta: &mut Metadata,
    group: &TrackingGroup,
    staging: &Path,
) -> Result<FragmentSummary, PipelineError> {
    let factory = CarrierFactory::new(group.config.clone())?;
    let mut writer = FragmentWriter::create(factory, group.key.clone(), staging.to_path_buf())?;
    meta.product_uuid = Some(writer.first_product_uuid());

    match stream_file(&meta.path, &mut writer) {
        Ok(()) => Ok(writer.finish()?),
        Err(e) => {
            // Keep whatever was embedded so far; the partial carrier is
            // finalized, not discarded
            let _ = writer.finish();
            Err(e)
        }
    }
}

fn stream_file(path: &Path, writer: &mut FragmentWriter) -> Result<(), PipelineError> {
    let mut file = fs::File::open(path)?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n])?;
    }
}
