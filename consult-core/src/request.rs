//! Request descriptions and the cache keys derived from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// HTTP verbs used against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method, body, and headers of a request.
///
/// Headers live in a `BTreeMap` and JSON objects serialize with sorted keys,
/// so serializing the same options always yields the same string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: Method,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
            headers: BTreeMap::new(),
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            method: Method::Put,
            body: Some(body),
            headers: BTreeMap::new(),
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::Delete,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A request against the backend: a URL (absolute, or a path relative to
/// the configured origin) plus its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub url: String,
    #[serde(default)]
    pub options: RequestOptions,
}

impl HttpRequest {
    pub fn new(url: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            url: url.into(),
            options,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, RequestOptions::get())
    }

    pub fn method(&self) -> Method {
        self.options.method
    }

    /// Deterministic key identifying this request in the cache.
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_request(&self.url, &self.options)
    }

    /// URL with the query string stripped, used to bucket request counts.
    pub fn path(&self) -> &str {
        request_path(&self.url)
    }
}

/// Strip the query string (and fragment) from a URL.
pub fn request_path(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(index) => &url[..index],
        None => url,
    }
}

/// Identity of a request in the cache, derived from its URL and options.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(url: &str, options: &RequestOptions) -> Self {
        // Serializing a struct of strings and JSON values cannot fail.
        let options = serde_json::to_string(options).unwrap_or_default();
        Self(format!("{url}-{options}"))
    }

    /// Wrap an already-derived key, e.g. one handed around by a query layer.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this key was derived from a URL starting with `prefix`.
    pub fn has_url_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
