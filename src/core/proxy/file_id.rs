use std::fmt;

/// A backend file identifier with any `.ext` URL suffix removed.
///
/// Consumers like Notion only embed URLs that end in a file extension, so
/// `/img/1ABC.jpg` and `/img/1ABC` must resolve to the same file. Everything
/// from the first `.` on is dropped, which means identifiers themselves can
/// never contain a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileId(String);

impl FileId {
    /// Strips the extension suffix from a raw path segment.
    /// Returns `None` when nothing is left to look up (e.g. `".jpg"`).
    pub fn parse(raw: &str) -> Option<Self> {
        let id = raw.split('.').next().unwrap_or_default();
        if id.is_empty() {
            None
        } else {
            Some(Self(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
