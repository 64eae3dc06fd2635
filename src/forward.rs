//! Forwarding gateway to the single configured backend
//!
//! This module relays an admitted request to the backend origin and streams
//! the response back. It performs the standard reverse-proxy header
//! adjustments: the request URI and `Host` header are rewritten to the
//! backend origin, the client address is appended to `X-Forwarded-For`, and
//! hop-by-hop headers are stripped in both cases where they appear.

use crate::error::{GuardError, Result};
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use http::uri::{PathAndQuery, Uri};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tokio::time::timeout;

/// Boxed error type used by proxied bodies
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Body type flowing through the guard in both directions
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// Headers consumed by each hop rather than forwarded end to end
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Build a plain-text response body
pub fn text_body(text: &str) -> ProxyBody {
    Full::new(Bytes::copy_from_slice(text.as_bytes()))
        .map_err(|never| match never {})
        .boxed()
}

/// Build a plain-text response carrying the status' canonical reason phrase
pub fn status_response(status: StatusCode) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(text_body(status.canonical_reason().unwrap_or("error")))
        .unwrap()
}

/// Relay for admitted requests to the backend origin
pub struct ForwardingGateway {
    /// Pooled HTTP client shared across all requests
    client: Client<HttpConnector, ProxyBody>,

    /// Deadline for the backend round trip
    timeout: Duration,
}

impl ForwardingGateway {
    /// Create a gateway with the given backend round-trip deadline
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            timeout,
        }
    }

    /// Forward `req` to `origin` and return the backend's response.
    ///
    /// `origin` must carry a scheme and an authority; the caller validates
    /// this before handing the request over. Errors cover transport failures
    /// and the round-trip deadline only; backend HTTP error statuses are
    /// passed through untouched.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        origin: &Uri,
        client_ip: &str,
    ) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        let (mut parts, body) = req.into_parts();

        parts.uri = rewrite_uri(&parts.uri, origin)?;
        strip_hop_by_hop(&mut parts.headers);
        if let Some(authority) = origin.authority() {
            if let Ok(host) = HeaderValue::from_str(authority.as_str()) {
                parts.headers.insert(HOST, host);
            }
        }
        append_forwarded_for(&mut parts.headers, client_ip);

        let req = Request::from_parts(parts, body.map_err(Into::into).boxed());

        let response = timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| GuardError::ForwardTimeout)?
            .map_err(|e| GuardError::Forward(e.to_string()))?;

        Ok(response.map(|body| body.map_err(Into::into).boxed()))
    }
}

/// Graft the backend origin onto the request's path and query
fn rewrite_uri(original: &Uri, origin: &Uri) -> Result<Uri> {
    let path_and_query = original
        .path_and_query()
        .map(PathAndQuery::as_str)
        .unwrap_or("/");

    let mut parts = origin.clone().into_parts();
    parts.path_and_query = Some(
        path_and_query
            .parse()
            .map_err(|e| GuardError::Forward(format!("invalid request path: {}", e)))?,
    );
    Uri::from_parts(parts).map_err(|e| GuardError::Forward(format!("invalid backend uri: {}", e)))
}

/// Remove hop-by-hop headers, including any named by `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect();

    for name in connection_named {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Append the client address to `X-Forwarded-For`, preserving prior hops
fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    let name = HeaderName::from_static("x-forwarded-for");
    let chain = match headers.get(&name).and_then(|prior| prior.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&chain) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_uri_preserves_path_and_query() {
        let original: Uri = "/widgets?page=2".parse().unwrap();
        let origin: Uri = "http://10.0.0.5:9000".parse().unwrap();

        let rewritten = rewrite_uri(&original, &origin).unwrap();
        assert_eq!(rewritten.to_string(), "http://10.0.0.5:9000/widgets?page=2");
    }

    #[test]
    fn test_rewrite_uri_defaults_empty_path() {
        let original: Uri = "/".parse().unwrap();
        let origin: Uri = "http://backend.internal".parse().unwrap();

        let rewritten = rewrite_uri(&original, &origin).unwrap();
        assert_eq!(rewritten.to_string(), "http://backend.internal/");
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, HeaderValue::from_static("close, x-session-token"));
        headers.insert("x-session-token", HeaderValue::from_static("abc"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert!(headers.get(CONNECTION).is_none());
        assert!(headers.get("x-session-token").is_none());
        assert!(headers.get("keep-alive").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_append_forwarded_for() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "203.0.113.7");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "203.0.113.7");

        append_forwarded_for(&mut headers, "10.0.0.1");
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "203.0.113.7, 10.0.0.1"
        );
    }

    #[test]
    fn test_status_response_body_is_reason_phrase() {
        let response = status_response(StatusCode::FORBIDDEN);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
    }
}
