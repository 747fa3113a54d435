use super::debug::{HttpDebugConfig, header_lines, mask_body, truncate_for_log};
use crate::trace::{SessionTrace, TraceKind};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::fmt;
use std::io::{self, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// JSON-over-HTTP transport shared by the chat provider and the sandbox client.
///
/// Every exchange is written to the session trace (credentials masked, body in
/// full). With `--verbose` the same exchange is also mirrored to stderr with
/// secret body keys masked and long bodies truncated.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    debug: HttpDebugConfig,
    sink: DebugSink,
    trace: Option<SessionTrace>,
}

#[derive(Clone)]
enum DebugSink {
    Stderr,
    #[cfg(test)]
    Memory(Arc<Mutex<Vec<String>>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponseData {
    pub status: u16,
    pub body: String,
}

/// One direction of an exchange, rendered once for every sink.
struct Side<'a> {
    arrow: char,
    start: String,
    headers: Vec<String>,
    body: &'a str,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("debug", &self.debug)
            .field("traced", &self.trace.is_some())
            .finish()
    }
}

impl HttpClient {
    pub fn new(inner: Client, debug: HttpDebugConfig) -> Self {
        Self {
            inner,
            debug,
            sink: DebugSink::Stderr,
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: SessionTrace) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Sends `payload` as JSON. Non-2xx statuses are returned as data; only
    /// transport failures are errors.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
        payload: &T,
    ) -> Result<HttpResponseData, reqwest::Error> {
        let mut builder = self.inner.post(url).json(payload);
        if let Some(token) = bearer_token {
            builder = builder.bearer_auth(token);
        }
        let request = builder.build()?;

        let request_body = request
            .body()
            .and_then(|body| body.as_bytes())
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        self.emit(
            TraceKind::HttpRequest,
            &Side {
                arrow: '>',
                start: format!("{} {}", request.method(), request.url()),
                headers: header_lines(request.headers()),
                body: &request_body,
            },
        );

        let started = Instant::now();
        let response = match self.inner.execute(request).await {
            Ok(response) => response,
            Err(err) => {
                self.emit_failure(&err);
                return Err(err);
            }
        };
        let status = response.status().as_u16();
        let headers: HeaderMap = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                self.emit_failure(&err);
                return Err(err);
            }
        };

        self.emit(
            TraceKind::HttpResponse,
            &Side {
                arrow: '<',
                start: format!("HTTP {status} in {} ms", started.elapsed().as_millis()),
                headers: header_lines(&headers),
                body: &body,
            },
        );

        Ok(HttpResponseData { status, body })
    }

    fn emit(&self, kind: TraceKind, side: &Side<'_>) {
        if let Some(trace) = &self.trace {
            trace.log_http(kind, &side.start, &side.headers, side.body);
        }
        if self.debug.enabled {
            for line in debug_lines(self.debug, side) {
                self.write_debug(line);
            }
        }
    }

    fn emit_failure(&self, err: &reqwest::Error) {
        if let Some(trace) = &self.trace {
            trace.log_event(TraceKind::HttpError, &err.to_string());
        }
        if self.debug.enabled {
            self.write_debug(format!("[http-debug] ! {err}"));
        }
    }

    fn write_debug(&self, line: String) {
        match &self.sink {
            DebugSink::Stderr => {
                let _ = writeln!(io::stderr().lock(), "{line}");
            }
            #[cfg(test)]
            DebugSink::Memory(lines) => {
                if let Ok(mut lines) = lines.lock() {
                    lines.push(line);
                }
            }
        }
    }

    #[cfg(test)]
    fn with_memory_sink(inner: Client, debug: HttpDebugConfig) -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let client = Self {
            sink: DebugSink::Memory(Arc::clone(&lines)),
            ..Self::new(inner, debug)
        };
        (client, lines)
    }
}

fn debug_lines(debug: HttpDebugConfig, side: &Side<'_>) -> Vec<String> {
    let arrow = side.arrow;
    let mut lines = vec![format!("[http-debug] {arrow} {}", side.start)];
    lines.extend(
        side.headers
            .iter()
            .map(|header| format!("[http-debug] {arrow} {header}")),
    );
    lines.push(format!("[http-debug] {arrow}"));

    let body = truncate_for_log(&mask_body(side.body), debug.max_body_chars);
    if body.is_empty() {
        lines.push(format!("[http-debug] {arrow} <empty body>"));
    } else {
        lines.extend(body.lines().map(|line| format!("[http-debug] {arrow} {line}")));
    }
    lines
}
