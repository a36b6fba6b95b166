use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use carve_recovery::checkpoint::{
    create_checkpoint, load_checkpoint, restore_fragments, save_checkpoint, validate_resume,
};
use carve_recovery::cli::{Args, Mode};
use carve_recovery::oracle::{HeuristicOracle, NoOracle, ScoringOracle};
use carve_recovery::{
    carve_image, CancelToken, CarveSignature, CarvedFile, DiskImage, FileKind, Fragment,
    FragmentIdentifier, ParallelScanner, ReassembledFile, ScanProgress, StreamSolver,
};

const PROGRESS_CHANNEL_CAPACITY: usize = 256;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = args.validate() {
        bail!("Invalid arguments: {}", e);
    }

    let opened = if args.buffered {
        DiskImage::open_buffered(&args.image)
    } else {
        DiskImage::open(&args.image)
    };
    let disk = opened
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .with_block_size(args.block_size)?;

    println!("Carve Recovery v{}", env!("CARGO_PKG_VERSION"));
    println!("{}", "=".repeat(60));
    println!("  Image:              {}", args.image.display());
    println!(
        "  Image size:         {} bytes ({:.2} MB)",
        disk.size().as_u64(),
        disk.size().as_u64() as f64 / (1024.0 * 1024.0)
    );
    println!("  Block size:         {}", disk.block_size());
    println!("  Blocks:             {}", disk.block_count());
    println!();

    match args.mode {
        Mode::Carve => run_carve(&args, &disk),
        Mode::Reconstruct => run_reconstruct(&args, &disk),
    }
}

fn run_carve(args: &Args, disk: &DiskImage) -> Result<()> {
    let kind = FileKind::from(args.kind);
    let signature = CarveSignature::for_kind(kind)
        .with_context(|| format!("no carving signature for {}", kind))?;

    let carved = carve_image(disk, signature)?;

    println!("Carved {} {} file(s)", carved.len(), kind);
    for (id, file) in carved.iter().enumerate() {
        println!(
            "  #{:<4} offset=0x{:X} size={}",
            id,
            file.start_offset,
            file.len()
        );
    }

    if let Some(dir) = &args.output {
        write_carved(dir, &carved)?;
    }
    Ok(())
}

fn run_reconstruct(args: &Args, disk: &DiskImage) -> Result<()> {
    let oracle: Arc<dyn ScoringOracle> = if args.no_oracle {
        Arc::new(NoOracle)
    } else {
        Arc::new(HeuristicOracle::new())
    };
    let identifier = FragmentIdentifier::new(Arc::clone(&oracle), args.confidence_threshold);

    let mut scan_config = args.scan_config();
    let mut solver = StreamSolver::new(args.reassembly_config(), oracle);

    if let Some(resume_path) = &args.resume {
        let checkpoint = load_checkpoint(resume_path)
            .with_context(|| format!("failed to load checkpoint {}", resume_path.display()))?;
        let validation = validate_resume(&args.image, disk.block_size(), &checkpoint)?;
        if !validation.is_valid {
            bail!(
                "checkpoint rejected: {}",
                validation.reason.unwrap_or_default()
            );
        }
        let restored = restore_fragments(disk, &checkpoint)?;
        info!(
            position = checkpoint.position,
            fragments = restored.len(),
            "resuming from checkpoint"
        );
        for fragment in restored {
            solver.push(fragment);
        }
        scan_config.start_offset = checkpoint.position;
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
    let progress = thread::spawn(move || {
        let mut headers = 0u64;
        while let Some(message) = rx.blocking_recv() {
            match message {
                ScanProgress::BlocksScanned(n) => tracing::debug!(blocks = n, "progress"),
                ScanProgress::SignatureFound { .. } => headers += 1,
                ScanProgress::Finished(n) => {
                    info!(blocks = n, headers, "identification finished");
                }
            }
        }
    });

    let scanner = ParallelScanner::new(scan_config);
    let outcome = scanner.scan_into(disk, &identifier, &CancelToken::new(), Some(tx), |fragment| {
        solver.push(fragment)
    });
    let _ = progress.join();

    println!(
        "Identified {} blocks: {} header, {} zero, {} oracle-confident, {} low-confidence",
        outcome.stats.blocks_scanned,
        outcome.stats.signature_blocks,
        outcome.stats.zero_blocks,
        outcome.stats.ai_high_confidence,
        outcome.stats.ai_low_confidence
    );

    let checkpoint_saved = if outcome.is_complete() {
        Ok(())
    } else {
        warn!(next_offset = outcome.next_offset, "scan stopped before end of image");
        save_resume_point(args, disk, outcome.next_offset, solver.retained_fragments())
    };
    let (_, verdict) = outcome.into_parts();

    // whatever was identified before a stop or fault is still reconstructed
    let files = solver.finish();

    println!("Reconstructed {} file(s)", files.len());
    for file in &files {
        println!(
            "  #{:<4} {:<5} offset=0x{:X} size={} fragments={} completed={} gap_bytes={}",
            file.id,
            file.kind,
            file.start_offset().unwrap_or_default(),
            file.len(),
            file.fragment_offsets.len(),
            file.completed,
            file.gap_bytes
        );
    }

    if let Some(dir) = &args.output {
        write_reassembled(dir, &files)?;
    }

    checkpoint_saved?;
    verdict.context("image read failed; partial results above")?;
    Ok(())
}

/// Persist a checkpoint when one was requested and the scan stopped early
fn save_resume_point(
    args: &Args,
    disk: &DiskImage,
    position: u64,
    fragments: &[Fragment],
) -> Result<()> {
    let Some(path) = &args.checkpoint else {
        return Ok(());
    };
    let checkpoint = create_checkpoint(&args.image, disk.block_size(), position, fragments)?;
    save_checkpoint(path, &checkpoint, true)
        .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
    Ok(())
}

fn write_carved(dir: &Path, files: &[CarvedFile]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for (id, file) in files.iter().enumerate() {
        let path = dir.join(format!("{}_{}.{}", id, file.start_offset, file.kind.extension()));
        fs::write(&path, &file.data).with_context(|| format!("failed to write {}", path.display()))?;
    }
    info!(dir = %dir.display(), files = files.len(), "carved files written");
    Ok(())
}

fn write_reassembled(dir: &Path, files: &[ReassembledFile]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    for file in files {
        let path = dir.join(format!(
            "{}_{}.{}",
            file.id,
            file.start_offset().unwrap_or_default(),
            file.kind.extension()
        ));
        fs::write(&path, &file.data).with_context(|| format!("failed to write {}", path.display()))?;
    }
    info!(dir = %dir.display(), files = files.len(), "reconstructed files written");
    Ok(())
}
