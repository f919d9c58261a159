//! Network utilities and helpers

use std::collections::HashMap;
use std::time::Duration;

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Browser-like user agent; many CDNs refuse obviously scripted clients
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Headers and cookies the caller captured for a source, replayed on every request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub headers: HashMap<String, String>,
    pub cookies: Vec<(String, String)>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Value for a `Cookie` request header, `None` when there are no cookies
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Fill in defaults without overriding what the caller already set
    pub fn with_defaults(
        mut self,
        headers: &HashMap<String, String>,
        cookies: &HashMap<String, String>,
    ) -> Self {
        for (name, value) in headers {
            let already_set = self
                .headers
                .keys()
                .any(|existing| existing.eq_ignore_ascii_case(name));
            if !already_set {
                self.headers.insert(name.clone(), value.clone());
            }
        }
        for (name, value) in cookies {
            if !self.cookies.iter().any(|(existing, _)| existing == name) {
                self.cookies.push((name.clone(), value.clone()));
            }
        }
        self
    }
}

/// True when a body is an HTML document (typically a login wall) rather than a playlist
pub fn is_html_document(body: &str) -> bool {
    let head = body.trim_start_matches('\u{feff}').trim_start();
    let prefix: String = head.chars().take(5).collect::<String>().to_ascii_lowercase();
    prefix.starts_with("<!") || prefix.starts_with("<html")
}
