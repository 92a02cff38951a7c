//! Fractional sort keys for z-order.
//!
//! Keys are compared lexicographically. Bringing a batch of objects to the
//! front mints one key strictly above the current maximum and appends a
//! fixed-width base-26 suffix per object, so the batch keeps its relative
//! order and any batch size fits.

const SUFFIX_ALPHABET: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";

/// Short key strictly greater than `key`.
///
/// Bumps the first character below `z` after the last `|` band separator
/// and drops everything after it; if no such character exists, appends `a`.
pub fn key_after(key: &str) -> String {
    let band_end = key.rfind('|').map_or(0, |i| i + 1);
    for (i, c) in key[band_end..].char_indices() {
        if c < 'z' {
            if let Some(next) = char::from_u32(c as u32 + 1) {
                let at = band_end + i;
                let mut out = String::with_capacity(at + 1);
                out.push_str(&key[..at]);
                out.push(next);
                return out;
            }
        }
    }
    let mut out = key.to_string();
    out.push('a');
    out
}

/// Number of suffix characters needed to label `count` items.
fn suffix_width(count: usize) -> usize {
    let mut width = 1;
    let mut capacity = SUFFIX_ALPHABET.len();
    while capacity < count {
        width += 1;
        capacity = capacity.saturating_mul(SUFFIX_ALPHABET.len());
    }
    width
}

/// Mint `count` ascending keys, all strictly greater than `max_key`.
pub fn keys_above(max_key: Option<&str>, count: usize) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }
    let base = key_after(max_key.unwrap_or(""));
    let width = suffix_width(count);
    (0..count)
        .map(|index| {
            let mut digits = vec![b'a'; width];
            let mut rest = index;
            for slot in digits.iter_mut().rev() {
                *slot = SUFFIX_ALPHABET[rest % SUFFIX_ALPHABET.len()];
                rest /= SUFFIX_ALPHABET.len();
            }
            let mut key = base.clone();
            key.extend(digits.into_iter().map(char::from));
            key
        })
        .collect()
}
