/// A single inclusive byte range resolved against a known total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub fn len(&self) -> i64 {
        self.end - self.start + 1
    }
}

/// Parse an HTTP Range header against `total_size`.
///
/// Supports the three single-range forms `bytes=a-b`, `bytes=a-` and
/// `bytes=-n`. Multi-range requests and anything unparsable return None;
/// callers answer 416.
pub fn parse_range(header: &str, total_size: i64) -> Option<ByteRange> {
    let spec = header.strip_prefix("bytes=")?.trim();
    if spec.is_empty() || spec.contains(',') {
        return None;
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        // Suffix range: last n bytes
        let suffix: i64 = suffix.parse().ok()?;
        if suffix <= 0 {
            return None;
        }
        let start = (total_size - suffix).max(0);
        return Some(ByteRange {
            start,
            end: total_size - 1,
        });
    }

    if let Some(start) = spec.strip_suffix('-') {
        // Open-ended range: from start to EOF
        let start: i64 = start.parse().ok()?;
        if start >= total_size {
            return None;
        }
        return Some(ByteRange {
            start,
            end: total_size - 1,
        });
    }

    let (start, end) = spec.split_once('-')?;
    let start: i64 = start.parse().ok()?;
    let mut end: i64 = end.parse().ok()?;
    if start > end || start >= total_size {
        return None;
    }
    if end >= total_size {
        end = total_size - 1;
    }
    Some(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range() {
        let r = parse_range("bytes=0-1048575", 314572800).unwrap();
        assert_eq!(r.start, 0);
        assert_eq!(r.end, 1048575);
        assert_eq!(r.len(), 1048576);
    }

    #[test]
    fn test_open_ended() {
        let r = parse_range("bytes=500-", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 500, end: 999 });
    }

    #[test]
    fn test_suffix() {
        let r = parse_range("bytes=-200", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 800, end: 999 });

        // Suffix larger than the file clamps to the whole file
        let r = parse_range("bytes=-5000", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 0, end: 999 });
    }

    #[test]
    fn test_end_clamped_to_size() {
        let r = parse_range("bytes=100-99999", 1000).unwrap();
        assert_eq!(r, ByteRange { start: 100, end: 999 });
    }

    #[test]
    fn test_invalid() {
        assert!(parse_range("bytes=0-99,200-299", 1000).is_none());
        assert!(parse_range("bytes=500-100", 1000).is_none());
        assert!(parse_range("bytes=1000-", 1000).is_none());
        assert!(parse_range("bytes=", 1000).is_none());
        assert!(parse_range("items=0-5", 1000).is_none());
        assert!(parse_range("bytes=abc-def", 1000).is_none());
    }
}
