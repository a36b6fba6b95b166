use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::disk::DiskImage;
use crate::error::{RecoveryError, Result};
use crate::types::{Fragment, Identification, Offset};

const CHECKPOINT_VERSION: u32 = 1;
const HASH_READ_LIMIT: usize = 1_048_576;

/// One identified block; bytes are re-read from the image on resume
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub offset: u64,
    pub identification: Identification,
}

/// Scan state saved at a block boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub image_path: String,
    pub image_hash: String,
    pub block_size: usize,
    /// Offset of the first block not yet identified
    pub position: u64,
    pub entries: Vec<CheckpointEntry>,
}

impl Checkpoint {
    pub fn new(
        image_path: impl Into<String>,
        image_hash: String,
        block_size: usize,
        position: u64,
        fragments: &[Fragment],
    ) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            image_path: image_path.into(),
            image_hash,
            block_size,
            position,
            entries: fragments
                .iter()
                .map(|f| CheckpointEntry {
                    offset: f.offset,
                    identification: f.identification,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResumeValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
}

impl ResumeValidation {
    fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// SHA-256 over the first MiB of the image plus its length
pub fn compute_image_hash(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    let mut buffer = Vec::with_capacity(HASH_READ_LIMIT);
    file.take(HASH_READ_LIMIT as u64).read_to_end(&mut buffer)?;

    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    hasher.update(metadata.len().to_le_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn create_checkpoint(
    image_path: &Path,
    block_size: usize,
    position: u64,
    fragments: &[Fragment],
) -> Result<Checkpoint> {
    let image_hash = compute_image_hash(image_path)?;
    Ok(Checkpoint::new(
        image_path.to_string_lossy().to_string(),
        image_hash,
        block_size,
        position,
        fragments,
    ))
}

pub fn validate_resume(
    image_path: &Path,
    block_size: usize,
    checkpoint: &Checkpoint,
) -> Result<ResumeValidation> {
    if checkpoint.version != CHECKPOINT_VERSION {
        return Ok(ResumeValidation::invalid(format!(
            "unsupported checkpoint version {}",
            checkpoint.version
        )));
    }

    let expected_path = image_path.to_string_lossy();
    if checkpoint.image_path != expected_path {
        return Ok(ResumeValidation::invalid("image path mismatch"));
    }

    if checkpoint.block_size != block_size {
        return Ok(ResumeValidation::invalid(format!(
            "block size mismatch: checkpoint {} vs scan {}",
            checkpoint.block_size, block_size
        )));
    }

    let computed_hash = compute_image_hash(image_path)?;
    if checkpoint.image_hash != computed_hash {
        return Ok(ResumeValidation::invalid("image hash mismatch"));
    }

    let size = fs::metadata(image_path)?.len();
    if checkpoint.position > size {
        return Ok(ResumeValidation::invalid("checkpoint position exceeds image size"));
    }

    Ok(ResumeValidation::valid())
}

pub fn load_checkpoint(path: &Path) -> Result<Checkpoint> {
    let data = fs::read(path)?;
    serde_json::from_slice(&data).map_err(|err| RecoveryError::Parse(err.to_string()))
}

/// Write atomically: temp file, fsync, rename. Keeps a `.bak` of the
/// previous checkpoint when `backup` is set.
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint, backup: bool) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(checkpoint)
        .map_err(|err| RecoveryError::Parse(err.to_string()))?;
    let tmp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serialized)?;
        file.sync_all()?;
    }

    if backup && path.exists() {
        let backup_path = path.with_extension("bak");
        if let Err(err) = fs::copy(path, &backup_path) {
            warn!(path = %backup_path.display(), %err, "checkpoint backup failed");
        }
    }

    fs::rename(tmp_path, path)?;
    info!(
        path = %path.display(),
        position = checkpoint.position,
        entries = checkpoint.entries.len(),
        "checkpoint saved"
    );
    Ok(())
}

/// Rebuild the fragments a checkpoint describes by re-reading their blocks
pub fn restore_fragments(disk: &DiskImage, checkpoint: &Checkpoint) -> Result<Vec<Fragment>> {
    let mut fragments = Vec::with_capacity(checkpoint.entries.len());

    for entry in &checkpoint.entries {
        let data = disk.read_at(Offset::new(entry.offset), checkpoint.block_size)?;
        if data.len() != checkpoint.block_size {
            return Err(RecoveryError::ResumeRejected(format!(
                "block at offset {} is no longer in the image",
                entry.offset
            )));
        }
        fragments.push(Fragment::new(entry.offset, data.into_owned(), entry.identification));
    }

    Ok(fragments)
}
