//! Request Descriptor Module
//!
//! Describes one logical remote call: method, target, payload, and caching
//! intent. The derived cache key doubles as the request's identity for
//! in-flight cancellation.

use serde_json::Value;

// == Method ==
/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    /// Only GET responses are cached.
    pub fn is_get(&self) -> bool {
        matches!(self, Method::Get)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// == Request Descriptor ==
/// One logical remote call.
///
/// Two descriptors with equal cache keys are the same logical request for
/// caching and cancellation purposes.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Path relative to the configured base URL, or an absolute URL
    pub url: String,
    /// JSON payload for write methods
    pub body: Option<Value>,
    /// Whether a successful GET response may be cached
    pub cacheable: bool,
    /// TTL for the cached response, overriding the store default
    pub ttl_override: Option<u64>,
}

impl RequestDescriptor {
    // == Builders ==
    /// A cacheable GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
            cacheable: true,
            ttl_override: None,
        }
    }

    /// A POST request carrying a JSON body; never cached.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
            cacheable: false,
            ttl_override: None,
        }
    }

    /// A request with an explicit method and optional body; never cached
    /// unless marked so afterwards.
    pub fn with_method(method: Method, url: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            url: url.into(),
            body,
            cacheable: false,
            ttl_override: None,
        }
    }

    /// Disables caching for this request.
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Sets a per-request TTL for the cached response.
    pub fn ttl_ms(mut self, ttl: u64) -> Self {
        self.ttl_override = Some(ttl);
        self
    }

    // == Cache Key ==
    /// Deterministic identity: method + url + serialized body. serde_json
    /// serializes object keys in sorted order, so equal bodies always yield
    /// equal keys.
    pub fn cache_key(&self) -> String {
        match &self.body {
            Some(body) => format!("{}:{}:{}", self.method, self.url, body),
            None => format!("{}:{}", self.method, self.url),
        }
    }

    // == Limiter Class ==
    /// The rate-limiter key class: method plus path with any query stripped.
    pub fn limiter_class(&self) -> String {
        let path = self.url.split('?').next().unwrap_or(&self.url);
        format!("{} {}", self.method, path)
    }
}
