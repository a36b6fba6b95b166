use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// Default block size in bytes (one sector)
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default forward window for stream continuation (1 MiB)
pub const DEFAULT_SEARCH_RADIUS: u64 = 1_048_576;

/// Default minimum oracle probability for a trusted classification
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Oracle score a mismatched fragment must strictly exceed to join a stream
pub const DEFAULT_AI_ATTACH_THRESHOLD: f64 = 0.8;

/// Newtype wrapper for byte offsets in disk images
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Offset(pub u64);

impl Offset {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, size: Size) -> Option<Offset> {
        self.0.checked_add(size.0).map(Offset)
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// Newtype wrapper for sizes in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Size(pub u64);

impl Size {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn as_usize(&self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

/// File type a block can be classified as.
///
/// The variant order is the label order used by classification oracles:
/// index 0 is JPEG, 1 is PDF, 2 is everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Jpeg,
    Pdf,
    Other,
}

impl FileKind {
    /// Shared label ordering for oracle distributions
    pub const ALL: [FileKind; 3] = [FileKind::Jpeg, FileKind::Pdf, FileKind::Other];

    pub fn index(self) -> usize {
        match self {
            FileKind::Jpeg => 0,
            FileKind::Pdf => 1,
            FileKind::Other => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            FileKind::Jpeg => "jpeg",
            FileKind::Pdf => "pdf",
            FileKind::Other => "other",
        }
    }

    /// File extension used when exporting candidates
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Jpeg => "jpg",
            FileKind::Pdf => "pdf",
            FileKind::Other => "bin",
        }
    }

    pub fn is_concrete(self) -> bool {
        self != FileKind::Other
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which rule produced an identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationSource {
    ZeroBlock,
    Signature,
    AiHighConfidence,
    AiLowConfidence,
}

/// Classification of a single block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub kind: FileKind,
    pub confidence: f64,
    pub source: IdentificationSource,
}

impl Identification {
    pub fn new(kind: FileKind, confidence: f64, source: IdentificationSource) -> Self {
        Self {
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            source,
        }
    }

    pub fn zero_block() -> Self {
        Self::new(FileKind::Other, 1.0, IdentificationSource::ZeroBlock)
    }

    pub fn signature(kind: FileKind) -> Self {
        Self::new(kind, 1.0, IdentificationSource::Signature)
    }

    /// True when a header was positively recognized in this block
    pub fn is_header(&self) -> bool {
        self.source == IdentificationSource::Signature
    }
}

/// A block enriched with its identification; the unit consumed by reassembly
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub offset: u64,
    pub data: Vec<u8>,
    pub identification: Identification,
}

impl Fragment {
    pub fn new(offset: u64, data: impl Into<Vec<u8>>, identification: Identification) -> Self {
        Self {
            offset,
            data: data.into(),
            identification,
        }
    }

    pub fn kind(&self) -> FileKind {
        self.identification.kind
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn end_offset(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Block size in bytes
    pub block_size: usize,

    /// Minimum oracle probability to keep the oracle's label
    pub confidence_threshold: f64,

    /// Number of identification threads (0 = auto)
    pub num_threads: usize,

    /// Blocks read per identification batch
    pub batch_blocks: usize,

    /// Offset the scan starts at (rounded down to a block boundary)
    pub start_offset: u64,

    /// Stop after this many blocks
    pub max_blocks: Option<u64>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            num_threads: 0,
            batch_blocks: 4096,
            start_offset: 0,
            max_blocks: None,
        }
    }
}

impl ScanConfig {
    pub fn new(block_size: usize, confidence_threshold: f64) -> Result<Self> {
        let config = Self {
            block_size,
            confidence_threshold,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(RecoveryError::Config("block size must be greater than 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(RecoveryError::Config(format!(
                "confidence threshold {} is outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.batch_blocks == 0 {
            return Err(RecoveryError::Config("batch size must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// Stream reconstruction configuration
#[derive(Debug, Clone)]
pub struct ReassemblyConfig {
    /// Distance that counts as a perfectly sequential continuation
    pub block_size: usize,

    /// Maximum forward distance from a stream's last fragment
    pub search_radius: u64,

    /// Oracle score a mismatched fragment must exceed to attach
    pub ai_attach_threshold: f64,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            search_radius: DEFAULT_SEARCH_RADIUS,
            ai_attach_threshold: DEFAULT_AI_ATTACH_THRESHOLD,
        }
    }
}

impl ReassemblyConfig {
    pub fn new(block_size: usize, search_radius: u64) -> Self {
        Self {
            block_size,
            search_radius,
            ..Default::default()
        }
    }
}

/// Progress update sent via tokio channel
#[derive(Debug, Clone)]
pub enum ScanProgress {
    /// Blocks identified so far
    BlocksScanned(u64),
    /// A header signature was recognized
    SignatureFound { offset: u64, kind: FileKind },
    /// Scan stopped; total blocks identified
    Finished(u64),
}

/// Scan statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanStats {
    pub blocks_scanned: u64,
    pub bytes_scanned: u64,
    pub zero_blocks: u64,
    pub signature_blocks: u64,
    pub ai_high_confidence: u64,
    pub ai_low_confidence: u64,
    pub jpeg_blocks: u64,
    pub pdf_blocks: u64,
    pub other_blocks: u64,
    pub duration_secs: f64,
}

impl ScanStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identification: &Identification, len: usize) {
        self.blocks_scanned += 1;
        self.bytes_scanned += len as u64;

        match identification.source {
            IdentificationSource::ZeroBlock => self.zero_blocks += 1,
            IdentificationSource::Signature => self.signature_blocks += 1,
            IdentificationSource::AiHighConfidence => self.ai_high_confidence += 1,
            IdentificationSource::AiLowConfidence => self.ai_low_confidence += 1,
        }

        match identification.kind {
            FileKind::Jpeg => self.jpeg_blocks += 1,
            FileKind::Pdf => self.pdf_blocks += 1,
            FileKind::Other => self.other_blocks += 1,
        }
    }
}
