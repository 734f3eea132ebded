//! Embedded static assets
//!
//! Falls back to serving from the filesystem when a file is not embedded.

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use rust_embed::Embed;
use std::borrow::Cow;
use std::path::PathBuf;

const UI_DIR: &str = "ui";

#[derive(Embed)]
#[folder = "ui"]
struct Assets;

fn load(path: &str) -> Option<Cow<'static, [u8]>> {
    if let Some(content) = Assets::get(path) {
        return Some(content.data);
    }
    // Development fallback
    std::fs::read(PathBuf::from(UI_DIR).join(path))
        .ok()
        .map(Cow::Owned)
}

/// Serve a file under the UI directory
pub async fn serve_static(Path(path): Path<String>) -> Response {
    let path = path.trim_start_matches('/');
    if path.split('/').any(|part| part == "..") {
        return (StatusCode::BAD_REQUEST, "Invalid path").into_response();
    }

    match load(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.as_ref().to_string())], content.into_owned())
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

/// Get the index.html content (embedded or from filesystem)
pub fn get_index_html() -> Option<String> {
    load("index.html").and_then(|content| String::from_utf8(content.into_owned()).ok())
}
