//! Extension -> MIME type lookup for the fast-path responder. Plumbing, not
//! a goal in its own right (spec treats MIME guessing as an external
//! collaborator); deduplicated from this crate's predecessor's two copies
//! (`src/http/response.rs::get_mime_type`, `src/router.rs::DataProvider`).

pub fn lookup(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "wasm" => "application/wasm",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "adp" => "text/html",
        _ => "application/octet-stream",
    }
}

pub fn for_path(path: &std::path::Path) -> &'static str {
    path.extension()
        .and_then(|e| e.to_str())
        .map(lookup)
        .unwrap_or("application/octet-stream")
}
