//! Preview HTTP server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tokio::sync::watch;
use tower::ServiceExt as _;
use tower_http::{services::ServeFile, trace::TraceLayer};

/// Endpoint returning the current build id as decimal text.
pub const BUILD_ID_PATH: &str = "/__kiln/build-id";

/// How often the injected script polls [`BUILD_ID_PATH`].
pub const POLL_INTERVAL_MS: u64 = 1000;

#[derive(Clone)]
struct AppState {
    root: Arc<PathBuf>,
    build_id: watch::Receiver<u64>,
}

/// Router serving `root` with the polling snippet injected into HTML.
pub fn router(root: PathBuf, build_id: watch::Receiver<u64>) -> Router {
    let state = AppState {
        root: Arc::new(root),
        build_id,
    };
    Router::new()
        .route(BUILD_ID_PATH, get(build_id_handler))
        .fallback(serve_output)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn build_id_handler(State(state): State<AppState>) -> impl IntoResponse {
    let id = *state.build_id.borrow();
    (
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        id.to_string(),
    )
}

async fn serve_output(State(state): State<AppState>, request: Request<Body>) -> Response {
    let Some(path) = resolve(&state.root, request.uri().path()).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if path.extension().is_some_and(|ext| ext == "html" || ext == "htm") {
        return match tokio::fs::read(&path).await {
            Ok(bytes) => Html(inject_reload_script(&String::from_utf8_lossy(&bytes))).into_response(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read page");
                StatusCode::NOT_FOUND.into_response()
            }
        };
    }

    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to serve file");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Map a request path onto the output tree: an exact file wins, then a
/// directory's `index.html`. Paths escaping the root resolve to nothing.
pub async fn resolve(root: &Path, uri_path: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for segment in uri_path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s if s.contains('\\') => return None,
            s => path.push(s),
        }
    }

    let metadata = tokio::fs::metadata(&path).await.ok()?;
    if metadata.is_file() {
        return Some(path);
    }
    if metadata.is_dir() {
        let index = path.join("index.html");
        if tokio::fs::metadata(&index).await.is_ok_and(|m| m.is_file()) {
            return Some(index);
        }
    }
    None
}

/// Insert the polling snippet before `</body>`, or append it when the page
/// has no closing body tag.
pub fn inject_reload_script(html: &str) -> String {
    let script = format!(
        r#"
<script>
(function() {{
    let baseline = null;
    async function poll() {{
        try {{
            const response = await fetch('{BUILD_ID_PATH}', {{ cache: 'no-store' }});
            const id = (await response.text()).trim();
            if (baseline === null) {{
                baseline = id;
            }} else if (id !== baseline) {{
                location.reload();
                return;
            }}
        }} catch (e) {{}}
        setTimeout(poll, {POLL_INTERVAL_MS});
    }}
    poll();
}})();
</script>
"#
    );

    if let Some(pos) = html.rfind("</body>") {
        let mut result = String::with_capacity(html.len() + script.len());
        result.push_str(&html[..pos]);
        result.push_str(&script);
        result.push_str(&html[pos..]);
        result
    } else {
        format!("{html}{script}")
    }
}
