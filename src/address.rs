//! Address normalization.
//!
//! Crime-incident extracts mix full-width and half-width forms of the same
//! address (`本郷７－３－１` vs `本郷7-3-1`). Cache keys are always the
//! half-width form so both spellings resolve to one entry.

use std::collections::BTreeSet;

const FULLWIDTH_START: u32 = 0xFF01;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFEE0;

/// Convert full-width ASCII letters, digits and symbols plus the ideographic
/// space to their half-width forms. Kana are left untouched.
///
/// Quotes, backslash and backtick follow the usual Japanese IME table rather
/// than the Unicode block: `”` `’` `‘` `￥` become `"` `'` `` ` `` `\`, while
/// `＂` `＇` `＼` `｀` are kept as they are.
pub fn zen_to_han(input: &str) -> String {
    input.chars().map(to_half_width).collect()
}

fn to_half_width(c: char) -> char {
    match c {
        '\u{3000}' => ' ',
        '\u{201D}' => '"',
        '\u{2019}' => '\'',
        '\u{2018}' => '`',
        '\u{FFE5}' => '\\',
        '\u{FF02}' | '\u{FF07}' | '\u{FF3C}' | '\u{FF40}' => c,
        _ => {
            let code = c as u32;
            if (FULLWIDTH_START..=FULLWIDTH_END).contains(&code) {
                char::from_u32(code - FULLWIDTH_OFFSET).unwrap_or(c)
            } else {
                c
            }
        }
    }
}

/// Normalize a raw address into a cache key. Returns `None` for empty
/// addresses. Surrounding whitespace is part of the key.
pub fn normalize_address(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(zen_to_han(raw))
    }
}

/// Normalize and deduplicate a batch of raw addresses.
pub fn normalize_all<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .filter_map(|a| normalize_address(a.as_ref()))
        .collect()
}
