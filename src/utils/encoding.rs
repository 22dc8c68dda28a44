use encoding_rs::{EUC_JP, ISO_2022_JP, SHIFT_JIS};

/// Decode a ZIP entry name that may not be UTF-8.
///
/// Legacy Windows archivers write entry names in the system code page without
/// setting the UTF-8 flag. Valid UTF-8 that reads sensibly is returned as-is;
/// otherwise Shift_JIS, EUC-JP and ISO-2022-JP are tried in that order and
/// the first clean decoding containing Japanese-script characters wins.
/// The heuristic is intentionally narrow.
pub fn decode_entry_name(raw: &[u8]) -> String {
    if let Ok(name) = std::str::from_utf8(raw) {
        if is_readable(name) {
            return name.to_string();
        }
    }

    for encoding in [SHIFT_JIS, EUC_JP, ISO_2022_JP] {
        let (decoded, _, had_errors) = encoding.decode(raw);
        if !had_errors && contains_japanese(&decoded) {
            return decoded.into_owned();
        }
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Hiragana, Katakana or Kanji present anywhere in the string.
fn contains_japanese(s: &str) -> bool {
    s.chars().any(|c| {
        let c = c as u32;
        (0x3040..=0x309F).contains(&c)
            || (0x30A0..=0x30FF).contains(&c)
            || (0x4E00..=0x9FAF).contains(&c)
    })
}

/// More than 70% of characters are printable ASCII, Japanese script, or
/// common path punctuation.
fn is_readable(s: &str) -> bool {
    if s.is_empty() {
        return true;
    }

    let total = s.chars().count();
    let readable = s
        .chars()
        .filter(|&c| {
            let u = c as u32;
            (0x20..=0x7E).contains(&u)
                || (0x3040..=0x309F).contains(&u)
                || (0x30A0..=0x30FF).contains(&u)
                || (0x4E00..=0x9FAF).contains(&u)
                || matches!(c, '/' | '\\' | '.' | '-' | '_')
        })
        .count();

    readable as f64 / total as f64 > 0.7
}
