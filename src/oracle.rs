//! Scoring oracles consulted when no signature decides a block.
//!
//! The engine only needs two questions answered: "what is this block?" and
//! "how likely is it to belong to a file of this kind?". A trained model can
//! sit behind [`ScoringOracle`]; [`HeuristicOracle`] answers from byte
//! statistics alone and [`NoOracle`] stands in when nothing is configured.

use crate::entropy::calculate_shannon_entropy;
use crate::search::contains_pattern;
use crate::types::FileKind;

/// Probability distribution over the label set
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClassProbabilities {
    pub jpeg: f64,
    pub pdf: f64,
    pub other: f64,
}

impl ClassProbabilities {
    pub fn new(jpeg: f64, pdf: f64, other: f64) -> Self {
        Self { jpeg, pdf, other }
    }

    /// Build from values indexed in `FileKind::ALL` order
    pub fn from_array(values: [f64; 3]) -> Self {
        Self::new(values[0], values[1], values[2])
    }

    /// Values in `FileKind::ALL` order
    pub fn to_array(&self) -> [f64; 3] {
        [self.jpeg, self.pdf, self.other]
    }

    pub fn get(&self, kind: FileKind) -> f64 {
        self.to_array()[kind.index()]
    }

    /// Argmax; ties go to the label listed first
    pub fn best(&self) -> (FileKind, f64) {
        let mut best = (FileKind::ALL[0], self.get(FileKind::ALL[0]));
        for kind in FileKind::ALL.iter().skip(1) {
            let p = self.get(*kind);
            if p > best.1 {
                best = (*kind, p);
            }
        }
        best
    }

    /// Rescale to sum to one; an all-zero distribution becomes certain `Other`
    pub fn normalized(&self) -> Self {
        let jpeg = self.jpeg.max(0.0);
        let pdf = self.pdf.max(0.0);
        let other = self.other.max(0.0);
        let total = jpeg + pdf + other;
        if total <= 0.0 || !total.is_finite() {
            return Self::new(0.0, 0.0, 1.0);
        }
        Self::new(jpeg / total, pdf / total, other / total)
    }
}

/// Classification and scoring capability
pub trait ScoringOracle: Send + Sync {
    /// Distribution over {Jpeg, Pdf, Other} for one block
    fn classify(&self, data: &[u8]) -> ClassProbabilities;

    /// Probability that `data` belongs to a file of `target`
    fn score(&self, data: &[u8], target: FileKind) -> f64 {
        self.classify(data).get(target)
    }

    /// False for the null oracle
    fn is_available(&self) -> bool {
        true
    }
}

/// Absent oracle: zero everywhere
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOracle;

impl ScoringOracle for NoOracle {
    fn classify(&self, _data: &[u8]) -> ClassProbabilities {
        ClassProbabilities::default()
    }

    fn score(&self, _data: &[u8], _target: FileKind) -> f64 {
        0.0
    }

    fn is_available(&self) -> bool {
        false
    }
}

const PDF_TOKENS: [&[u8]; 9] = [
    b"obj", b"endobj", b"stream", b"/Type", b"/Length", b"xref", b"trailer", b"<<", b">>",
];

/// Byte-statistics oracle.
///
/// JPEG scan data is near-random with `FF 00` byte stuffing; PDF bodies are
/// mostly printable and dense with object syntax. Anything else keeps a
/// constant baseline so weak evidence stays below the confidence threshold.
#[derive(Debug, Clone)]
pub struct HeuristicOracle {
    pub other_baseline: f64,
    pub entropy_floor: f64,
    pub entropy_span: f64,
}

impl Default for HeuristicOracle {
    fn default() -> Self {
        Self {
            other_baseline: 0.25,
            entropy_floor: 6.0,
            entropy_span: 1.5,
        }
    }
}

impl HeuristicOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn jpeg_evidence(&self, data: &[u8], entropy: f64) -> f64 {
        let randomness = ((entropy - self.entropy_floor) / self.entropy_span).clamp(0.0, 1.0);
        let stuffing = if entropy > 5.0 && contains_pattern(data, b"\xff\x00") {
            0.5
        } else {
            0.0
        };
        randomness + stuffing
    }

    fn pdf_evidence(&self, data: &[u8]) -> f64 {
        let tokens = PDF_TOKENS
            .iter()
            .filter(|token| contains_pattern(data, token))
            .count()
            .min(4) as f64;
        0.25 * printable_ratio(data) + 0.75 * tokens / 4.0
    }
}

impl ScoringOracle for HeuristicOracle {
    fn classify(&self, data: &[u8]) -> ClassProbabilities {
        if data.is_empty() {
            return ClassProbabilities::new(0.0, 0.0, 1.0);
        }

        let entropy = calculate_shannon_entropy(data);
        ClassProbabilities::new(
            self.jpeg_evidence(data, entropy),
            self.pdf_evidence(data),
            self.other_baseline,
        )
        .normalized()
    }
}

fn printable_ratio(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let printable = data
        .iter()
        .filter(|&&b| (0x20..=0x7E).contains(&b) || b == b'\n' || b == b'\r' || b == b'\t')
        .count();
    printable as f64 / data.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Near-random bytes with JPEG byte stuffing sprinkled in
    pub(crate) fn jpeg_like_block(seed: u32) -> Vec<u8> {
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let mut block: Vec<u8> = (0..512)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                (state >> 16) as u8
            })
            .collect();
        for i in (40..500).step_by(97) {
            block[i] = 0xFF;
            block[i + 1] = 0x00;
        }
        // keep the block free of signatures and footers
        block[0] = 0x12;
        for i in 0..block.len() - 1 {
            if block[i] == 0xFF && block[i + 1] == 0xD9 {
                block[i + 1] = 0xD7;
            }
        }
        block
    }

    pub(crate) fn pdf_like_block() -> Vec<u8> {
        let text = b"4 0 obj\n<< /Type /Page /Length 44 >>\nstream\nBT /F1 12 Tf ET\nendstream\nendobj\n";
        text.iter().cycle().take(512).copied().collect()
    }

    #[test]
    fn test_best_ties_to_first_label() {
        let probs = ClassProbabilities::new(0.4, 0.4, 0.2);
        assert_eq!(probs.best(), (FileKind::Jpeg, 0.4));

        let probs = ClassProbabilities::from_array([0.1, 0.2, 0.7]);
        assert_eq!(probs.best(), (FileKind::Other, 0.7));
    }

    #[test]
    fn test_get_follows_label_order() {
        let probs = ClassProbabilities::from_array([0.1, 0.2, 0.7]);
        assert_eq!(probs.to_array(), [0.1, 0.2, 0.7]);
        for kind in FileKind::ALL {
            assert_eq!(probs.get(kind), probs.to_array()[kind.index()]);
        }
        assert_eq!(probs.get(FileKind::Pdf), 0.2);
    }

    #[test]
    fn test_normalized() {
        let probs = ClassProbabilities::new(2.0, 1.0, 1.0).normalized();
        assert!((probs.jpeg - 0.5).abs() < 1e-12);
        assert_eq!(ClassProbabilities::default().normalized().other, 1.0);
    }

    #[test]
    fn test_no_oracle_scores_zero() {
        let oracle = NoOracle;
        assert!(!oracle.is_available());
        assert_eq!(oracle.score(b"anything", FileKind::Jpeg), 0.0);
        assert_eq!(oracle.classify(b"anything").best().1, 0.0);
    }

    #[test]
    fn test_heuristic_recognizes_jpeg_scan_data() {
        let oracle = HeuristicOracle::new();
        let (kind, p) = oracle.classify(&jpeg_like_block(7)).best();
        assert_eq!(kind, FileKind::Jpeg);
        assert!(p >= 0.7, "p = {p}");
    }

    #[test]
    fn test_heuristic_recognizes_pdf_body() {
        let oracle = HeuristicOracle::new();
        let (kind, p) = oracle.classify(&pdf_like_block()).best();
        assert_eq!(kind, FileKind::Pdf);
        assert!(p >= 0.7, "p = {p}");
        assert!(oracle.score(&pdf_like_block(), FileKind::Jpeg) < 0.1);
    }

    #[test]
    fn test_heuristic_is_unsure_about_plain_text() {
        let oracle = HeuristicOracle::new();
        let text: Vec<u8> = b"the quick brown fox jumps over the lazy dog "
            .iter()
            .cycle()
            .take(512)
            .copied()
            .collect();
        let (_, p) = oracle.classify(&text).best();
        assert!(p < 0.7);
    }
}
