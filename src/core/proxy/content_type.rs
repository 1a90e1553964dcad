// Content-Type derivation for proxied files.
//
// Drive reports a MIME type for every file, but files uploaded through some
// clients come back as `application/octet-stream` even when they are images.
// Notion refuses to embed those, so anything that is not already `image/*`
// falls back to a guess from the file name.

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Extension used by the redirect endpoint when the MIME type is unknown.
pub const DEFAULT_EXTENSION: &str = "jpg";

/// Extension → MIME type. Lookups are case-insensitive.
const EXTENSION_TABLE: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("svg", "image/svg+xml"),
    ("bmp", "image/bmp"),
    ("tiff", "image/tiff"),
    ("ico", "image/x-icon"),
];

/// MIME type → preferred extension, for building `/img/{id}.{ext}` URLs.
const MIME_TABLE: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/x-icon", "ico"),
];

/// Picks the `Content-Type` to serve.
///
/// `image/*` MIME types are trusted verbatim; everything else is derived from
/// the extension of `file_name`.
pub fn derive_content_type(mime_type: &str, file_name: &str) -> String {
    if mime_type.starts_with("image/") {
        return mime_type.to_string();
    }
    mime_from_file_name(file_name).to_string()
}

/// Looks up the MIME type for a file name's extension, defaulting to
/// `application/octet-stream`.
pub fn mime_from_file_name(file_name: &str) -> &'static str {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return OCTET_STREAM;
    };
    let ext = ext.to_ascii_lowercase();

    EXTENSION_TABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(OCTET_STREAM)
}

/// Picks the URL extension for a MIME type, defaulting to `jpg`.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    MIME_TABLE
        .iter()
        .find(|(known, _)| *known == mime_type)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}
