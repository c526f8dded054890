//! # SwKit Net
//!
//! Request/response model, interception policy, and network fetching for the
//! SwKit offline worker.
//!
//! ## Design Goals
//!
//! 1. **One fetch seam**: everything that touches the network goes through [`Fetcher`]
//! 2. **Classified requests**: navigation vs. asset, with a destination category
//! 3. **Response provenance**: basic/cors/opaque typing decides what may be cached
//! 4. **Interception policy**: method, origin, and scheme filtering before dispatch

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use thiserror::Error;
use url::Url;

pub mod fetch;
pub mod intercept;

pub use fetch::{Fetcher, HttpFetcher, LoaderConfig};
pub use intercept::{InterceptDecision, InterceptPolicy, PassReason};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Offline")]
    Offline,

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Request mode, as seen by the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Loading a new document context.
    Navigate,
    /// Same-origin subresource.
    #[default]
    SameOrigin,
    /// Cross-origin without CORS; the response is opaque.
    NoCors,
    /// Cross-origin with CORS.
    Cors,
}

/// What the requesting page will do with the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Destination {
    Document,
    Image,
    Font,
    Style,
    Script,
    #[default]
    Other,
}

impl Destination {
    /// Guess the destination from the URL path's file extension.
    pub fn from_url(url: &Url) -> Self {
        match mime_guess::from_path(url.path()).first() {
            Some(m) => Self::from_mime(&m),
            None => Destination::Other,
        }
    }

    /// Map a MIME type onto a destination category.
    pub fn from_mime(m: &Mime) -> Self {
        let type_ = m.type_();
        let subtype = m.subtype().as_str();
        if type_ == mime::IMAGE {
            Destination::Image
        } else if type_ == mime::FONT
            || subtype.starts_with("font-")
            || subtype == "vnd.ms-fontobject"
        {
            Destination::Font
        } else if type_ == mime::TEXT && subtype == "css" {
            Destination::Style
        } else if type_ == mime::TEXT && subtype == "html" {
            Destination::Document
        } else if subtype == "javascript" || subtype == "ecmascript" {
            Destination::Script
        } else {
            Destination::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Document => "document",
            Destination::Image => "image",
            Destination::Font => "font",
            Destination::Style => "style",
            Destination::Script => "script",
            Destination::Other => "other",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Destination {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "document" => Ok(Destination::Document),
            "image" => Ok(Destination::Image),
            "font" => Ok(Destination::Font),
            "style" => Ok(Destination::Style),
            "script" => Ok(Destination::Script),
            "other" | "" => Ok(Destination::Other),
            other => Err(NetError::RequestFailed(format!(
                "unknown destination: {}",
                other
            ))),
        }
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub mode: RequestMode,
    pub destination: Destination,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET subresource request; the destination is guessed from the path.
    pub fn get(url: Url) -> Self {
        let destination = Destination::from_url(&url);
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::SameOrigin,
            destination,
            timeout: None,
        }
    }

    /// Create a navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            mode: RequestMode::Navigate,
            destination: Destination::Document,
            timeout: None,
        }
    }

    /// Set the method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the mode.
    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = mode;
        self
    }

    /// Override the guessed destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// Provenance of a response, deciding whether it may be inspected or cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Same-origin response.
    #[default]
    Basic,
    /// Cross-origin response shared through CORS.
    Cors,
    /// Cross-origin no-cors response; status and body are hidden.
    Opaque,
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub response_type: ResponseType,
    pub redirected: bool,
}

impl Response {
    /// Create a basic response with no headers.
    pub fn new(url: Url, status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            redirected: false,
        }
    }

    /// Create a response whose only header is a content type.
    pub fn with_content_type(
        url: Url,
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::new(url, status, body).header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static(content_type),
        )
    }

    /// Create an opaque response. `StatusCode` cannot hold 0, so the hidden
    /// status is reported as 200 with an empty body and no headers.
    pub fn opaque(url: Url) -> Self {
        Self {
            response_type: ResponseType::Opaque,
            ..Self::new(url, StatusCode::OK, Bytes::new())
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.response_type != ResponseType::Opaque && self.status.is_success()
    }

    /// Raw content type header.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Parsed content type.
    pub fn mime(&self) -> Option<Mime> {
        self.content_type().and_then(|s| s.parse::<Mime>().ok())
    }

    /// Whether a copy of this response may be stored: a same-origin,
    /// non-redirected 200.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK
            && self.response_type == ResponseType::Basic
            && !self.redirected
    }
}
