//! Request handling.
//!
//! Every request is routed on its `Host` header, `<server>.<testcase>.<domain>`,
//! to the file `<root>/<testcase>/<server>/<path>`. A file `F` may be
//! accompanied by sidecars that override how it is served:
//!
//! | Sidecar | Effect |
//! |---|---|
//! | `F.status-code` | response status |
//! | `F.content-type` | content type, empty to omit the header |
//! | `F.charset` | charset parameter, empty to omit |
//! | `F.content-encoding` | `Content-Encoding`, empty to omit |
//! | `F.extra-headers` | one `Name: value` header per line |
//! | `F.delay` | milliseconds to wait before answering |
//! | `F.chunked` | present: stream the body with chunked transfer encoding |

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{CONTENT_ENCODING, CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::stream;

use crate::ServedUrlLog;

/// Sidecar suffixes hidden from directory listings.
const SIDECARS: [&str; 7] = [
    ".status-code",
    ".content-type",
    ".charset",
    ".content-encoding",
    ".extra-headers",
    ".delay",
    ".chunked",
];

const CHUNK_SIZE: usize = 1024;

/// Shared handler state.
#[derive(Debug)]
pub(crate) struct FixtureState {
    pub(crate) root: PathBuf,
    pub(crate) scheme: String,
    pub(crate) port: u16,
    pub(crate) log: ServedUrlLog,
}

/// Where a `Host` header points.
#[derive(Debug, PartialEq, Eq)]
struct Target<'a> {
    server: &'a str,
    testcase: &'a str,
    domain: String,
}

fn parse_host(host: &str) -> Option<Target<'_>> {
    let name = host.split(':').next().unwrap_or(host);
    let labels: Vec<&str> = name.split('.').collect();
    if labels.len() < 2 {
        return None;
    }
    Some(Target {
        server: labels[0],
        testcase: labels[1],
        domain: labels[2..].join("."),
    })
}

/// Content type and charset inferred from a file extension.
fn content_type_for(path: &str) -> (&'static str, Option<&'static str>) {
    let extension = path.rsplit('.').next().unwrap_or_default();
    match extension {
        "html" => ("text/html", Some("UTF-8")),
        "txt" => ("text/plain", Some("UTF-8")),
        "png" => ("image/png", None),
        "gif" => ("image/gif", None),
        "jpg" | "jpeg" => ("image/jpeg", None),
        "c" | "h" => ("text/x-csrc", Some("UTF-8")),
        "cc" | "cpp" | "hpp" => ("text/x-c++src", Some("UTF-8")),
        "pdf" => ("application/pdf", None),
        "docx" => ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", None),
        "pptx" => ("application/vnd.openxmlformats-officedocument.presentationml.presentation", None),
        "xlsx" => ("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", None),
        "odt" => ("application/vnd.oasis.opendocument.text", None),
        "odp" => ("application/vnd.oasis.opendocument.presentation", None),
        "ods" => ("application/vnd.oasis.opendocument.spreadsheet", None),
        _ => ("application/octet-stream", None),
    }
}

fn replace_bytes(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut rest = haystack;
    while let Some(pos) = rest.windows(needle.len()).position(|w| w == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

/// Render file content: placeholders substituted, a lone trailing newline stripped.
fn render(raw: &[u8], domain: &str, port: u16) -> Vec<u8> {
    let content = replace_bytes(raw, b"${DOMAIN}", domain.as_bytes());
    let mut content = replace_bytes(&content, b"${PORT}", port.to_string().as_bytes());
    if content.last() == Some(&b'\n') && content.iter().filter(|&&b| b == b'\n').count() == 1 {
        content.pop();
    }
    content
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn html_page(status: StatusCode, body: String) -> Response {
    (status, [(CONTENT_TYPE, "text/html")], body).into_response()
}

/// Fallback handler: every request lands here.
pub(crate) async fn serve(
    Extension(state): Extension<Arc<FixtureState>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let host = headers
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    state
        .log
        .record(format!("{}://{}{}", state.scheme, host, path_and_query));

    let Some(target) = parse_host(&host) else {
        tracing::debug!(host, "unknown host");
        return html_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("<html><body>Host {} is unknown</body></html>\n", html_escape(&host)),
        );
    };

    let path = urlencoding::decode(uri.path())
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| uri.path().to_string());
    tracing::debug!(testcase = target.testcase, server = target.server, path, "serving");

    serve_page(&state, &target, &path).await
}

async fn serve_page(state: &FixtureState, target: &Target<'_>, path: &str) -> Response {
    let testcase_dir = state.root.join(target.testcase);
    if !is_dir(&testcase_dir).await {
        return html_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("<html><body>testset {} is unknown</body></html>\n", html_escape(target.testcase)),
        );
    }
    let server_dir = testcase_dir.join(target.server);
    if !is_dir(&server_dir).await {
        return html_page(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("<html><body>server {} is unknown</body></html>\n", html_escape(target.server)),
        );
    }

    let Some(file) = resolve(&server_dir, path) else {
        return not_found(path);
    };
    if is_dir(&file).await {
        return serve_directory(&file, path).await;
    }
    let Ok(raw) = tokio::fs::read(&file).await else {
        return not_found(path);
    };

    let overrides = Overrides::load(&file, &target.domain, state.port).await;
    if let Some(delay) = overrides.delay {
        tokio::time::sleep(delay).await;
    }

    let body = render(&raw, &target.domain, state.port);
    overrides.respond(path, body)
}

/// Join a request path under `base`, refusing anything that climbs out of it.
fn resolve(base: &Path, path: &str) -> Option<PathBuf> {
    let mut resolved = base.to_path_buf();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(resolved)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}

fn not_found(path: &str) -> Response {
    html_page(
        StatusCode::NOT_FOUND,
        format!("<html><body>404 - {} was not found</body></html>\n", html_escape(path)),
    )
}

async fn serve_directory(dir: &Path, path: &str) -> Response {
    if tokio::fs::try_exists(dir.join("_noindex")).await.unwrap_or(false) {
        return StatusCode::NOT_FOUND.into_response();
    }
    if let Ok(index) = tokio::fs::read(dir.join("index.html")).await {
        return (StatusCode::OK, [(CONTENT_TYPE, "text/html")], index).into_response();
    }

    let mut names = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name != "README" && !SIDECARS.iter().any(|s| name.ends_with(s)) {
                names.push(name);
            }
        }
    }
    names.sort();

    let prefix = if path == "/" { "" } else { path.trim_end_matches('/') };
    let mut page = format!(
        "<html>\n<head>\n\t<title>Contents of {}</title>\n</head>\n<body>\n",
        html_escape(path)
    );
    for name in names {
        let name = html_escape(&name);
        page.push_str(&format!("<p><a href=\"{prefix}/{name}\">{name}</a></p>\n"));
    }
    page.push_str("</body>\n</html>\n");
    html_page(StatusCode::OK, page)
}

/// Sidecar overrides of one file.
#[derive(Debug, Default)]
struct Overrides {
    status: Option<String>,
    content_type: Option<String>,
    charset: Option<String>,
    content_encoding: Option<String>,
    extra_headers: Vec<String>,
    delay: Option<Duration>,
    chunked: bool,
}

impl Overrides {
    async fn load(file: &Path, domain: &str, port: u16) -> Self {
        let read = |suffix: &'static str| {
            let mut sidecar = file.as_os_str().to_owned();
            sidecar.push(suffix);
            async move {
                tokio::fs::read(PathBuf::from(sidecar))
                    .await
                    .ok()
                    .map(|raw| String::from_utf8_lossy(&render(&raw, domain, port)).into_owned())
            }
        };

        let mut chunked_path = file.as_os_str().to_owned();
        chunked_path.push(".chunked");

        Self {
            status: read(".status-code").await.map(|s| s.trim().to_string()),
            content_type: read(".content-type").await.map(|s| s.trim().to_string()),
            charset: read(".charset").await.map(|s| s.trim().to_string()),
            content_encoding: read(".content-encoding").await.map(|s| s.trim().to_string()),
            extra_headers: read(".extra-headers")
                .await
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default(),
            delay: read(".delay")
                .await
                .and_then(|s| s.trim().parse().ok())
                .map(Duration::from_millis),
            chunked: tokio::fs::try_exists(PathBuf::from(chunked_path))
                .await
                .unwrap_or(false),
        }
    }

    fn respond(self, path: &str, body: Vec<u8>) -> Response {
        let status = match self.status.as_deref().map(str::parse::<u16>) {
            None => StatusCode::OK,
            Some(Ok(code)) => StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Some(Err(_)) => {
                tracing::warn!(path, "unparsable .status-code sidecar");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let (default_type, default_charset) = content_type_for(path);
        let content_type = self.content_type.unwrap_or_else(|| default_type.to_string());
        let charset = self.charset.or_else(|| default_charset.map(str::to_string));

        let mut headers = HeaderMap::new();
        if !content_type.is_empty() {
            let value = match charset.filter(|c| !c.is_empty()) {
                Some(charset) => format!("{content_type}; charset={charset}"),
                None => content_type,
            };
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        if let Some(encoding) = self.content_encoding.filter(|e| !e.is_empty()) {
            if let Ok(value) = HeaderValue::from_str(&encoding) {
                headers.insert(CONTENT_ENCODING, value);
            }
        }
        for line in &self.extra_headers {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => tracing::warn!(path, line, "skipping invalid extra header"),
            }
        }

        let body = if self.chunked {
            let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
                body.chunks(CHUNK_SIZE).map(|c| Ok(c.to_vec())).collect();
            Body::from_stream(stream::iter(chunks))
        } else {
            Body::from(body)
        };

        (status, headers, body).into_response()
    }
}
