use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Derive a MIME type from the filename extension. Manual table first,
/// octet-stream as the final fallback.
pub fn mime_type_for(filename: &str) -> String {
    let extension = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();

    let mime = match extension.as_str() {
        "txt" => "text/plain",
        "json" => "application/json",
        "xml" => "application/xml",
        "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "csv" => "text/csv",
        "md" => "text/markdown",
        "log" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        _ => "application/octet-stream",
    };

    mime.to_string()
}

/// The preview surface only serves content a browser can render inline.
pub fn is_previewable(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
        || mime_type.starts_with("text/")
        || mime_type.starts_with("video/")
        || mime_type.starts_with("audio/")
        || mime_type == "application/json"
        || mime_type == "application/xml"
        || mime_type == "application/pdf"
}

pub fn is_media(mime_type: &str) -> bool {
    mime_type.starts_with("video/") || mime_type.starts_with("audio/")
}

pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// Everything outside RFC 5987's attr-char set gets percent-encoded in the
/// `filename*` parameter.
const RFC5987_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Longest plain-ASCII name offered to clients that ignore `filename*`.
const FALLBACK_NAME_MAX: usize = 80;

/// Build a Content-Disposition value per RFC 6266.
///
/// Plain ASCII names are quoted directly. Anything else is sent twice: a
/// fallback where every byte that cannot live in a quoted-string becomes
/// `_` (so the name keeps its length and extension position), plus the
/// RFC 5987 `filename*` form carrying the exact UTF-8 name.
pub fn content_disposition(filename: &str, inline: bool) -> String {
    let kind = if inline { "inline" } else { "attachment" };

    let mut fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' | ';' | ',' => '_',
            c if !c.is_ascii() || c.is_ascii_control() => '_',
            c => c,
        })
        .collect();
    fallback.truncate(FALLBACK_NAME_MAX);
    if fallback.chars().all(|c| c == '_' || c == ' ') {
        fallback = "download".to_string();
    }

    if fallback == filename {
        return format!("{}; filename=\"{}\"", kind, fallback);
    }

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        utf8_percent_encode(filename, RFC5987_ESCAPES)
    )
}
