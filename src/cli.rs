use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::types::{
    FileKind, ReassemblyConfig, ScanConfig, DEFAULT_BLOCK_SIZE, DEFAULT_CONFIDENCE_THRESHOLD,
    DEFAULT_SEARCH_RADIUS,
};

/// Recovery path to run over the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Identify every block and rebuild interleaved streams
    Reconstruct,
    /// Sequential header/footer carving of one file type
    Carve,
}

/// File type for carve mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CarveKind {
    Jpeg,
    Pdf,
}

impl From<CarveKind> for FileKind {
    fn from(kind: CarveKind) -> Self {
        match kind {
            CarveKind::Jpeg => FileKind::Jpeg,
            CarveKind::Pdf => FileKind::Pdf,
        }
    }
}

/// Carve Recovery - block-level file recovery from raw disk images
#[derive(Parser, Debug, Clone)]
#[command(name = "carve-recovery")]
#[command(version)]
#[command(about = "Recover JPEG and PDF files from raw storage images", long_about = None)]
pub struct Args {
    /// Disk image file to scan (opened read-only)
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,

    /// Recovery mode
    #[arg(long, value_enum, default_value = "reconstruct")]
    pub mode: Mode,

    /// File type for carve mode
    #[arg(long, value_enum, default_value = "jpeg")]
    pub kind: CarveKind,

    /// Block size in bytes
    #[arg(long = "block-size", default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Minimum oracle probability to trust its label
    #[arg(long = "confidence-threshold", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    pub confidence_threshold: f64,

    /// Maximum forward distance in bytes for a stream continuation
    #[arg(long = "search-radius", default_value_t = DEFAULT_SEARCH_RADIUS)]
    pub search_radius: u64,

    /// Identify with signatures only
    #[arg(long = "no-oracle")]
    pub no_oracle: bool,

    /// Use positional reads instead of memory mapping
    #[arg(long = "buffered")]
    pub buffered: bool,

    /// Identification threads (0 = all cores)
    #[arg(long = "threads", default_value = "0")]
    pub threads: usize,

    /// Stop after N blocks (0 = no limit)
    #[arg(long = "max-blocks", default_value = "0")]
    pub max_blocks: u64,

    /// Save a checkpoint here if the scan stops early
    #[arg(long = "checkpoint")]
    pub checkpoint: Option<PathBuf>,

    /// Resume from a checkpoint
    #[arg(long = "resume")]
    pub resume: Option<PathBuf>,

    /// Write recovered candidates into this directory
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Validate the arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.image.as_os_str().is_empty() {
            return Err("Image path cannot be empty".to_string());
        }

        if self.block_size == 0 {
            return Err("block-size must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence-threshold ({}) must be within [0, 1]",
                self.confidence_threshold
            ));
        }

        if self.search_radius == 0 {
            return Err("search-radius must be greater than 0".to_string());
        }

        if self.mode == Mode::Carve && self.resume.is_some() {
            return Err("--resume only applies to reconstruct mode".to_string());
        }

        Ok(())
    }

    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            block_size: self.block_size,
            confidence_threshold: self.confidence_threshold,
            num_threads: self.threads,
            max_blocks: (self.max_blocks > 0).then_some(self.max_blocks),
            ..ScanConfig::default()
        }
    }

    pub fn reassembly_config(&self) -> ReassemblyConfig {
        ReassemblyConfig::new(self.block_size, self.search_radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["carve-recovery", "disk.img"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.mode, Mode::Reconstruct);
        assert_eq!(args.block_size, 512);
        assert_eq!(args.search_radius, 1_048_576);
        assert!(args.scan_config().max_blocks.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse(&["--block-size", "0"]).validate().is_err());
        assert!(parse(&["--confidence-threshold", "1.5"]).validate().is_err());
        assert!(parse(&["--search-radius", "0"]).validate().is_err());
        assert!(parse(&["--mode", "carve", "--resume", "cp.json"]).validate().is_err());
    }

    #[test]
    fn test_config_conversion() {
        let args = parse(&["--block-size", "4096", "--max-blocks", "10", "--search-radius", "8192"]);
        let scan = args.scan_config();
        assert_eq!(scan.block_size, 4096);
        assert_eq!(scan.max_blocks, Some(10));

        let reassembly = args.reassembly_config();
        assert_eq!(reassembly.block_size, 4096);
        assert_eq!(reassembly.search_radius, 8192);
    }

    #[test]
    fn test_carve_kind() {
        let args = parse(&["--mode", "carve", "--kind", "pdf"]);
        assert_eq!(FileKind::from(args.kind), FileKind::Pdf);
    }
}
