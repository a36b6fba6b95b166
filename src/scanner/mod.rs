pub mod parallel;

pub use parallel::{CancelToken, ParallelScanner, ScanOutcome, ScanStatus};
