/// Shannon entropy over the 256-bin byte histogram
///
/// H = -Σ(p_i * log2(p_i)), in bits per byte.
/// Returns a value between 0.0 (a single repeated byte, or no data) and
/// 8.0 (every byte value equally likely).
pub fn calculate_shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut histogram = [0u64; 256];
    for &byte in data {
        histogram[byte as usize] += 1;
    }

    entropy_from_histogram(&histogram, data.len() as f64)
}

fn entropy_from_histogram(histogram: &[u64; 256], total_bytes: f64) -> f64 {
    let mut entropy = 0.0f64;

    for &count in histogram.iter() {
        if count > 0 {
            let probability = count as f64 / total_bytes;
            entropy -= probability * probability.log2();
        }
    }

    // A single distinct value yields -0.0
    entropy.max(0.0)
}

/// Check if data appears compressed or encrypted.
///
/// JPEG scan data sits above this line; PDF text objects normally do not.
#[inline]
pub fn is_compressed_like(data: &[u8]) -> bool {
    calculate_shannon_entropy(data) > 7.5
}

/// Get entropy category for logging/debugging
#[inline]
pub fn entropy_category(data: &[u8]) -> &'static str {
    let entropy = calculate_shannon_entropy(data);

    if entropy > 7.5 {
        "high_entropy_compressed"
    } else if entropy > 6.0 {
        "medium_entropy_mixed"
    } else if entropy > 3.5 {
        "structured_text"
    } else if entropy > 1.0 {
        "low_entropy_repetitive"
    } else {
        "very_low_entropy_uniform"
    }
}
