//! Block-level file recovery from raw storage images
//!
//! The crate reads an image as fixed-size blocks and recovers JPEG and PDF
//! content two ways:
//! - signature carving: a two-state header/footer carver over the block stream
//! - stream reconstruction: every block is identified (zero block, header
//!   signature, or a pluggable scoring oracle) and the stream solver threads
//!   interleaved fragments back into per-file byte streams
//!
//! Block identification runs in parallel with rayon; progress is streamed
//! over a tokio mpsc channel and interrupted scans can be checkpointed.

pub mod carver;
pub mod checkpoint;
pub mod cli;
pub mod disk;
pub mod entropy;
pub mod error;
pub mod identify;
pub mod oracle;
pub mod scanner;
pub mod search;
pub mod signatures;
pub mod stream_solver;
pub mod types;

// Re-export commonly used types
pub use carver::{carve_image, CarvedFile, WindowedCarver};
pub use checkpoint::{create_checkpoint, load_checkpoint, save_checkpoint, validate_resume, Checkpoint};
pub use disk::{Block, ClusterGeometry, DiskImage};
pub use entropy::{calculate_shannon_entropy, entropy_category, is_compressed_like};
pub use error::{RecoveryError, Result};
pub use identify::FragmentIdentifier;
pub use oracle::{ClassProbabilities, HeuristicOracle, NoOracle, ScoringOracle};
pub use scanner::{CancelToken, ParallelScanner, ScanOutcome, ScanStatus};
pub use signatures::CarveSignature;
pub use stream_solver::{reconstruct_streams, reconstruct_streams_with, ReassembledFile, StreamSolver};
pub use types::{FileKind, Fragment, Identification, IdentificationSource, Offset, Size};
pub use types::{ReassemblyConfig, ScanConfig, ScanProgress, ScanStats};
