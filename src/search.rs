// Byte-pattern search shared by the identifier, the carver and the stream solver.
// Patterns here are signatures of two to five bytes, so a first-byte skip
// over the haystack is enough.

/// Returns offset of first match, or None
#[inline]
pub fn find_pattern(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    let first = needle[0];
    let last_start = haystack.len() - needle.len();
    let mut i = 0;

    while i <= last_start {
        match haystack[i..=last_start].iter().position(|&b| b == first) {
            Some(pos) => {
                let start = i + pos;
                if &haystack[start..start + needle.len()] == needle {
                    return Some(start);
                }
                i = start + 1;
            }
            None => return None,
        }
    }

    None
}

/// Search starting at `from`; the returned index is relative to `haystack`
#[inline]
pub fn find_pattern_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    find_pattern(&haystack[from..], needle).map(|pos| from + pos)
}

/// Earliest occurrence of any of `needles`; ties go to the earlier needle
pub fn find_earliest(haystack: &[u8], needles: &[&[u8]]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;

    for (variant, needle) in needles.iter().enumerate() {
        if let Some(pos) = find_pattern(haystack, needle) {
            if best.map_or(true, |(best_pos, _)| pos < best_pos) {
                best = Some((pos, variant));
            }
        }
    }

    best
}

#[inline]
pub fn contains_pattern(haystack: &[u8], needle: &[u8]) -> bool {
    find_pattern(haystack, needle).is_some()
}
