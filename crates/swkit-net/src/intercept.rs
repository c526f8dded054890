//! Request filtering ahead of dispatch.
//!
//! Only same-origin, read-only (`GET`) requests on a web scheme are handled by
//! the worker; everything else goes to the network untouched.

use http::Method;
use tracing::trace;
use url::{Origin, Url};

use crate::Request;

/// Browser-internal schemes the worker never sees through.
const EXTENSION_SCHEMES: &[&str] = &[
    "chrome-extension",
    "moz-extension",
    "safari-web-extension",
    "ms-browser-extension",
];

/// Outcome of filtering one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptDecision {
    /// Hand the request to the fetch dispatcher.
    Intercept,
    /// Let the request reach the network untouched.
    Passthrough(PassReason),
}

/// Why a request was not intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    /// Not the read-only retrieval method.
    Method,
    /// Origin differs from the worker's origin.
    CrossOrigin,
    /// Browser extension scheme.
    ExtensionScheme,
}

/// Method, origin and scheme filter for a worker bound to one origin.
#[derive(Debug, Clone)]
pub struct InterceptPolicy {
    origin: Origin,
    extension_schemes: Vec<String>,
}

impl InterceptPolicy {
    /// Create a policy for the worker served from `origin`.
    pub fn new(origin: &Url) -> Self {
        Self {
            origin: origin.origin(),
            extension_schemes: EXTENSION_SCHEMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Treat another scheme as browser-internal.
    pub fn with_extension_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.extension_schemes.push(scheme.into());
        self
    }

    /// The worker's own origin.
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Decide whether the worker handles `request`.
    pub fn decide(&self, request: &Request) -> InterceptDecision {
        let decision = if self
            .extension_schemes
            .iter()
            .any(|s| s == request.url.scheme())
        {
            InterceptDecision::Passthrough(PassReason::ExtensionScheme)
        } else if request.method != Method::GET {
            InterceptDecision::Passthrough(PassReason::Method)
        } else if request.url.origin() != self.origin {
            InterceptDecision::Passthrough(PassReason::CrossOrigin)
        } else {
            InterceptDecision::Intercept
        };

        trace!(url = %request.url, method = %request.method, decision = ?decision, "Filtered request");
        decision
    }
}
