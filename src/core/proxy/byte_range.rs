/// An inclusive byte range `[start, end]` inside a file of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Outcome of interpreting a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// Serve 206 with exactly these bytes.
    Satisfiable(ByteRange),
    /// Serve 416; the range starts past the end of the file.
    Unsatisfiable,
}

impl ByteRange {
    /// Number of bytes in the range.
    pub fn byte_len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the `Content-Range` header.
    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }

    /// Interprets a single-range `Range` header for a file of `size` bytes.
    ///
    /// Accepts `bytes=A-B`, `bytes=A-` and `bytes=-N`. An end past the last
    /// byte is clamped. Returns `None` when the header should be ignored
    /// (wrong unit, garbage, multiple ranges, `B < A`), in which case the
    /// full file is served.
    pub fn parse(header: &str, size: u64) -> Option<RangeRequest> {
        let spec = header.trim().strip_prefix("bytes=")?.trim();
        if spec.contains(',') {
            return None;
        }
        let (first, last) = spec.split_once('-')?;
        let (first, last) = (first.trim(), last.trim());

        if first.is_empty() {
            // Suffix range: the final N bytes
            let suffix: u64 = last.parse().ok()?;
            if suffix == 0 || size == 0 {
                return Some(RangeRequest::Unsatisfiable);
            }
            return Some(RangeRequest::Satisfiable(ByteRange {
                start: size.saturating_sub(suffix),
                end: size - 1,
            }));
        }

        let start: u64 = first.parse().ok()?;
        let end: Option<u64> = if last.is_empty() {
            None
        } else {
            Some(last.parse().ok()?)
        };

        if matches!(end, Some(end) if end < start) {
            return None;
        }
        if start >= size {
            return Some(RangeRequest::Unsatisfiable);
        }

        let last_byte = size - 1;
        Some(RangeRequest::Satisfiable(ByteRange {
            start,
            end: end.map_or(last_byte, |end| end.min(last_byte)),
        }))
    }
}
