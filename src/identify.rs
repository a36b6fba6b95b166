use std::sync::Arc;

use crate::oracle::{NoOracle, ScoringOracle};
use crate::signatures::header_prefix;
use crate::types::{FileKind, Identification, IdentificationSource, DEFAULT_CONFIDENCE_THRESHOLD};

/// Classifies single blocks. Signatures are authoritative; the oracle is
/// consulted only when no signature matches.
#[derive(Clone)]
pub struct FragmentIdentifier {
    oracle: Arc<dyn ScoringOracle>,
    confidence_threshold: f64,
}

impl std::fmt::Debug for FragmentIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentIdentifier")
            .field("oracle_available", &self.oracle.is_available())
            .field("confidence_threshold", &self.confidence_threshold)
            .finish()
    }
}

impl Default for FragmentIdentifier {
    fn default() -> Self {
        Self::without_oracle()
    }
}

impl FragmentIdentifier {
    pub fn new(oracle: Arc<dyn ScoringOracle>, confidence_threshold: f64) -> Self {
        Self {
            oracle,
            confidence_threshold,
        }
    }

    pub fn without_oracle() -> Self {
        Self::new(Arc::new(NoOracle), DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn oracle(&self) -> &dyn ScoringOracle {
        self.oracle.as_ref()
    }

    pub fn shared_oracle(&self) -> Arc<dyn ScoringOracle> {
        Arc::clone(&self.oracle)
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Identify one block. Short blocks should be zero-padded by the caller
    /// (see [`crate::disk::pad_block`]).
    pub fn identify(&self, data: &[u8]) -> Identification {
        if data.iter().all(|&b| b == 0) {
            return Identification::zero_block();
        }

        // JPEG is tried before PDF
        for kind in [FileKind::Jpeg, FileKind::Pdf] {
            if header_prefix(kind).map_or(false, |prefix| data.starts_with(prefix)) {
                return Identification::signature(kind);
            }
        }

        if !self.oracle.is_available() {
            return Identification::new(FileKind::Other, 0.0, IdentificationSource::AiLowConfidence);
        }

        let (label, p) = self.oracle.classify(data).best();
        if p >= self.confidence_threshold {
            Identification::new(label, p, IdentificationSource::AiHighConfidence)
        } else {
            // Only the confidence survives a low-confidence verdict
            Identification::new(FileKind::Other, p, IdentificationSource::AiLowConfidence)
        }
    }
}
