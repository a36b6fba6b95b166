use crate::disk::{Block, DiskImage};
use crate::error::{RecoveryError, Result};
use crate::identify::FragmentIdentifier;
use crate::types::{Fragment, Identification, ScanConfig, ScanProgress, ScanStats};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Sender;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag, checked between blocks
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a scan ended
#[derive(Debug)]
pub enum ScanStatus {
    Completed,
    /// Stopped at a block boundary by the token or the block limit
    Cancelled,
    /// A read failed; everything before it was identified
    Failed {
        blocks_processed: u64,
        error: RecoveryError,
    },
}

/// Identified fragments plus how far the scan got
#[derive(Debug)]
pub struct ScanOutcome {
    /// Empty when the fragments were handed to a sink instead
    pub fragments: Vec<Fragment>,
    pub stats: ScanStats,
    pub status: ScanStatus,
    /// Offset of the first block not identified
    pub next_offset: u64,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self.status, ScanStatus::Completed)
    }

    /// Split into the fragments identified so far and the scan verdict.
    /// A failed scan still hands back everything identified before the
    /// fault, alongside `RecoveryError::ScanFailed`.
    pub fn into_parts(self) -> (Vec<Fragment>, Result<()>) {
        let verdict = match self.status {
            ScanStatus::Failed {
                blocks_processed,
                error,
            } => Err(RecoveryError::ScanFailed {
                blocks_processed,
                source: Box::new(error),
            }),
            ScanStatus::Completed | ScanStatus::Cancelled => Ok(()),
        };
        (self.fragments, verdict)
    }
}

/// Block scanner that identifies batches of blocks in parallel.
///
/// Reads stay sequential so an I/O fault has a well-defined position;
/// identification of each batch fans out over rayon. Fragments come back in
/// ascending offset order, ready for the stream solver.
pub struct ParallelScanner {
    pub config: ScanConfig,
}

impl ParallelScanner {
    pub fn new(config: ScanConfig) -> Self {
        // Configure global thread pool if requested
        if config.num_threads > 0 {
            let _ = rayon::ThreadPoolBuilder::new()
                .num_threads(config.num_threads)
                .build_global();
        }

        Self { config }
    }

    /// Scan a disk image with optional progress updates via tokio channel.
    /// Progress is best-effort: a full channel drops updates rather than
    /// stalling the scan.
    pub fn scan(
        &self,
        disk: &DiskImage,
        identifier: &FragmentIdentifier,
        cancel: &CancelToken,
        sender: Option<Sender<ScanProgress>>,
    ) -> ScanOutcome {
        let mut fragments = Vec::new();
        let mut outcome =
            self.scan_into(disk, identifier, cancel, sender, |fragment| fragments.push(fragment));
        outcome.fragments = fragments;
        outcome
    }

    /// Like [`ParallelScanner::scan`], but hands each fragment to `sink` in
    /// offset order as soon as its batch is identified. Nothing is kept in
    /// the returned outcome's `fragments`.
    pub fn scan_into<F>(
        &self,
        disk: &DiskImage,
        identifier: &FragmentIdentifier,
        cancel: &CancelToken,
        sender: Option<Sender<ScanProgress>>,
        mut sink: F,
    ) -> ScanOutcome
    where
        F: FnMut(Fragment),
    {
        let start_time = Instant::now();
        let batch_size = self.config.batch_blocks.max(1);
        let mut blocks = disk.scan_blocks_from(self.config.start_offset);

        info!(
            image = disk.path(),
            start = blocks.next_offset(),
            blocks = blocks.remaining(),
            block_size = disk.block_size(),
            "scan started"
        );

        let mut stats = ScanStats::new();
        let mut status = ScanStatus::Completed;

        loop {
            let mut batch: Vec<Block<'_>> = Vec::with_capacity(batch_size);
            let mut read_error = None;
            let mut stopped = false;

            while batch.len() < batch_size {
                if blocks.remaining() == 0 {
                    break;
                }
                let limit_reached = self
                    .config
                    .max_blocks
                    .map_or(false, |max| stats.blocks_scanned + batch.len() as u64 >= max);
                if cancel.is_cancelled() || limit_reached {
                    stopped = true;
                    break;
                }

                match blocks.next() {
                    Some(Ok(block)) => batch.push(block),
                    Some(Err(err)) => {
                        read_error = Some(err);
                        break;
                    }
                    None => break,
                }
            }

            let identified: Vec<Identification> = batch
                .par_iter()
                .map(|block| identifier.identify(&block.data))
                .collect();

            for (block, identification) in batch.into_iter().zip(identified) {
                stats.record(&identification, block.data.len());
                if identification.is_header() {
                    debug!(offset = block.offset, kind = %identification.kind, "header signature");
                    send(
                        &sender,
                        ScanProgress::SignatureFound {
                            offset: block.offset,
                            kind: identification.kind,
                        },
                    );
                }
                sink(Fragment::new(block.offset, block.data.into_owned(), identification));
            }
            send(&sender, ScanProgress::BlocksScanned(stats.blocks_scanned));

            if let Some(error) = read_error {
                warn!(
                    offset = blocks.next_offset(),
                    blocks_processed = stats.blocks_scanned,
                    %error,
                    "read failed, scan aborted"
                );
                status = ScanStatus::Failed {
                    blocks_processed: stats.blocks_scanned,
                    error,
                };
                break;
            }
            if stopped {
                info!(
                    next_offset = blocks.next_offset(),
                    blocks_processed = stats.blocks_scanned,
                    "scan stopped at block boundary"
                );
                status = ScanStatus::Cancelled;
                break;
            }
            if blocks.remaining() == 0 {
                break;
            }
        }

        stats.duration_secs = start_time.elapsed().as_secs_f64();
        send(&sender, ScanProgress::Finished(stats.blocks_scanned));

        info!(
            blocks = stats.blocks_scanned,
            headers = stats.signature_blocks,
            zero_blocks = stats.zero_blocks,
            duration_secs = stats.duration_secs,
            "scan finished"
        );

        ScanOutcome {
            fragments: Vec::new(),
            stats,
            status,
            next_offset: blocks.next_offset(),
        }
    }
}

fn send(sender: &Option<Sender<ScanProgress>>, message: ScanProgress) {
    if let Some(s) = sender {
        if !s.is_closed() {
            let _ = s.try_send(message);
        }
    }
}
