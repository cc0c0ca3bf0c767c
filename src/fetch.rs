//! Data sources for rendering.
//!
//! A [`Fetcher`] produces the data root a template renders against.
//! [`HttpFetcher`] walks a template's URL list and decodes the first good
//! response; [`FileFetcher`] reads a local JSON file.

use crate::config::TemplateConfig;
use crate::value::Value;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("all {tried} url(s) failed")]
    AllFailed { tried: usize },
    #[error("invalid JSON from {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Produces the data root for one render.
pub trait Fetcher {
    fn fetch(&self) -> Result<Value, FetchError>;
}

/// Decode a JSON document; `origin` labels errors.
pub fn decode(origin: &str, body: &[u8]) -> Result<Value, FetchError> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|source| FetchError::Json {
            origin: origin.to_string(),
            source,
        })?;
    Ok(Value::from(json))
}

/// Reads the data root from a local JSON file.
#[derive(Debug, Clone)]
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Fetcher for FileFetcher {
    fn fetch(&self) -> Result<Value, FetchError> {
        let body = fs::read(&self.path).map_err(|source| FetchError::Io {
            path: self.path.clone(),
            source,
        })?;
        decode(&self.path.display().to_string(), &body)
    }
}

/// Why a single URL was skipped.
#[derive(Error, Debug)]
enum AttemptError {
    #[error("bearer token {}: {source}", .path.display())]
    Token {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
}

/// Fetches JSON over HTTP, trying each configured URL in order.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    urls: Vec<String>,
    content_encoding: Option<String>,
    headers: Vec<(String, String)>,
    username: Option<String>,
    password: Option<String>,
    bearer_token: Option<PathBuf>,
}

impl HttpFetcher {
    pub fn new(config: &TemplateConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Self {
            client,
            urls: config.urls.clone(),
            content_encoding: config
                .content_encoding
                .clone()
                .filter(|encoding| !encoding.is_empty()),
            headers: config
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            username: config.username.clone(),
            password: config.password.clone(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn request(&self, url: &str) -> Result<RequestBuilder, AttemptError> {
        let mut request = self.client.get(url);
        // A token file that cannot be read fails the attempt even when basic
        // auth takes over the Authorization header.
        let token = match &self.bearer_token {
            Some(path) => Some(fs::read_to_string(path).map_err(|source| {
                AttemptError::Token {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };
        if let Some(encoding) = &self.content_encoding {
            request = request.header(CONTENT_ENCODING, encoding.as_str());
        }
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if self.username.is_some() || self.password.is_some() {
            request = request.basic_auth(
                self.username.as_deref().unwrap_or_default(),
                self.password.as_deref(),
            );
        } else if let Some(token) = token {
            request = request.header(
                AUTHORIZATION,
                format!("Bearer {}", token.trim_end_matches(['\r', '\n'])),
            );
        }
        Ok(request)
    }

    fn attempt(&self, url: &str) -> Result<Vec<u8>, AttemptError> {
        let response = self.request(url)?.send()?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(AttemptError::Status(status));
        }
        Ok(response.bytes()?.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self) -> Result<Value, FetchError> {
        for url in &self.urls {
            match self.attempt(url) {
                Ok(body) => {
                    debug!(url, bytes = body.len(), "fetched");
                    return decode(url, &body);
                }
                Err(err) => warn!(url, error = %err, "fetch failed, trying next url"),
            }
        }
        Err(FetchError::AllFailed {
            tried: self.urls.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::test_helpers::write_file;
    use serde_json::json;
    use tempfile::TempDir;

    fn template(extra: &str) -> TemplateConfig {
        let text = format!(
            "[[template]]\nurls = [\"http://127.0.0.1:1/a\", \"http://127.0.0.1:1/b\"]\n\
             src = \"t.j2\"\ndest = \"out\"\ntimeout = 1\n{extra}"
        );
        parse_config(&text).unwrap().templates.remove(0)
    }

    #[test]
    fn decode_object() {
        let value = decode("test", br#"{"n": 1, "f": 1.5}"#).unwrap();
        assert_eq!(value, Value::from(json!({"n": 1, "f": 1.5})));
    }

    #[test]
    fn decode_keeps_integers_and_floats_apart() {
        let value = decode("test", b"[3, 3.0]").unwrap();
        let Value::Seq(items) = value else {
            panic!("expected a sequence");
        };
        assert_eq!(items[0], Value::Int(3));
        assert_eq!(items[1], Value::Float(3.0));
    }

    #[test]
    fn decode_invalid_json() {
        let err = decode("http://x", b"{nope").unwrap_err();
        assert!(matches!(err, FetchError::Json { ref origin, .. } if origin == "http://x"));
    }

    #[test]
    fn file_fetcher_reads_json() {
        let tmp = TempDir::new().unwrap();
        let path = write_file(tmp.path(), "data.json", r#"{"name": "web"}"#);
        let value = FileFetcher::new(&path).fetch().unwrap();
        assert_eq!(value, Value::from(json!({"name": "web"})));
    }

    #[test]
    fn file_fetcher_missing_file() {
        let tmp = TempDir::new().unwrap();
        let result = FileFetcher::new(tmp.path().join("nope.json")).fetch();
        assert!(matches!(result, Err(FetchError::Io { .. })));
    }

    #[test]
    fn unreachable_urls_all_fail() {
        let fetcher = HttpFetcher::new(&template("")).unwrap();
        assert!(matches!(
            fetcher.fetch(),
            Err(FetchError::AllFailed { tried: 2 })
        ));
    }

    #[test]
    fn missing_bearer_token_skips_every_url() {
        let tmp = TempDir::new().unwrap();
        let token = tmp.path().join("token");
        let config = template(&format!("bearer_token = {:?}\n", token.display().to_string()));
        let fetcher = HttpFetcher::new(&config).unwrap();
        assert!(matches!(
            fetcher.attempt("http://127.0.0.1:1/a"),
            Err(AttemptError::Token { .. })
        ));
        assert!(matches!(
            fetcher.fetch(),
            Err(FetchError::AllFailed { tried: 2 })
        ));
    }

    #[test]
    fn request_carries_configured_headers() {
        let tmp = TempDir::new().unwrap();
        let token = write_file(tmp.path(), "token", "s3cret\n");
        let config = template(&format!(
            "bearer_token = {:?}\ncontent_encoding = \"gzip\"\nusername = \"u\"\n\
             [template.headers]\nHost = \"svc.internal\"\n",
            token.display().to_string()
        ));
        let fetcher = HttpFetcher::new(&config).unwrap();
        let request = fetcher
            .request("http://127.0.0.1:1/a")
            .unwrap()
            .build()
            .unwrap();
        let headers = request.headers();
        assert_eq!(headers["content-encoding"], "gzip");
        assert_eq!(headers["host"], "svc.internal");
        let auth: Vec<_> = headers.get_all("authorization").iter().collect();
        assert_eq!(auth.len(), 1);
        assert!(auth[0].to_str().unwrap().starts_with("Basic "));
    }

    #[test]
    fn bearer_token_is_trimmed() {
        let tmp = TempDir::new().unwrap();
        let token = write_file(tmp.path(), "token", "abc\n\n");
        let config = template(&format!("bearer_token = {:?}\n", token.display().to_string()));
        let fetcher = HttpFetcher::new(&config).unwrap();
        let request = fetcher
            .request("http://127.0.0.1:1/a")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers()["authorization"], "Bearer abc");
    }
}
