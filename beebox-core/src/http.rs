use std::time::Duration;

use crate::error::HttpError;

/// A fetched HTTP response, fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the response if the status is 200, otherwise a status error.
    pub fn ensure_ok(self, url: &str) -> Result<Self, HttpError> {
        if self.status == 200 {
            Ok(self)
        } else {
            Err(HttpError::Status {
                status: self.status,
                url: url.to_string(),
            })
        }
    }
}

/// The HTTP collaborator boundary.
///
/// Implementations must apply the given timeout to the whole request and
/// release any connection resource on every exit path, including errors.
/// The firmware backs this with `EspHttpConnection`; tests use an
/// in-memory map.
pub trait HttpClient {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, HttpError>;
}

/// Joins a repository base URL and a relative path with exactly one slash.
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h/repo/", "a.py"), "http://h/repo/a.py");
        assert_eq!(join_url("http://h/repo", "a.py"), "http://h/repo/a.py");
        assert_eq!(join_url("http://h/repo", "/sub/a.py"), "http://h/repo/sub/a.py");
    }

    #[test]
    fn ensure_ok_rejects_non_200() {
        let resp = HttpResponse { status: 404, body: Vec::new() };
        let err = resp.ensure_ok("http://h/x").unwrap_err();
        assert!(matches!(err, HttpError::Status { status: 404, .. }));
    }
}
