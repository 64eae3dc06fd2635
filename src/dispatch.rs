//! Per-request dispatch: source extraction, admission, forwarding
//!
//! The dispatcher is the bridge between a connection task and the admission
//! controller. Every request terminates in exactly one response write: a
//! client error when the source cannot be identified or is not admitted, a
//! gateway error when the backend cannot be reached, or the backend's own
//! response.

use crate::admission::AdmissionController;
use crate::error::GuardError;
use crate::forward::{status_response, ForwardingGateway, ProxyBody};
use bytes::Bytes;
use http::uri::Uri;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use log::{debug, error};
use std::net::SocketAddr;
use std::sync::Arc;

/// Entry point for every inbound request
pub struct Dispatcher {
    /// Shared admission state, injected rather than global
    admission: Arc<AdmissionController>,

    /// Relay for admitted requests
    gateway: ForwardingGateway,

    /// Raw backend origin from configuration, parsed per request
    backend: String,
}

impl Dispatcher {
    /// Create a dispatcher for the given backend origin
    pub fn new(
        admission: Arc<AdmissionController>,
        gateway: ForwardingGateway,
        backend: String,
    ) -> Self {
        Self {
            admission,
            gateway,
            backend,
        }
    }

    /// Shared admission state handle
    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Handle one request from the peer at `remote` (`host:port` form).
    ///
    /// Never fails: every outcome, including malformed metadata and backend
    /// trouble, becomes an HTTP response.
    pub async fn handle<B>(&self, remote: &str, req: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<crate::forward::BoxError>,
    {
        // A remote address that cannot be decomposed into host and port is
        // definitively non-admissible; admission state is never consulted
        let ip = match source_ip(remote) {
            Some(ip) => ip,
            None => {
                debug!("rejecting request with malformed remote address {:?}", remote);
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        if !self.admission.admit(&ip) {
            debug!("rejecting request from {}: not admitted", ip);
            return status_response(StatusCode::FORBIDDEN);
        }

        let origin = match backend_origin(&self.backend) {
            Ok(origin) => origin,
            Err(e) => {
                error!("backend origin {:?} is unusable: {}", self.backend, e);
                return status_response(StatusCode::BAD_REQUEST);
            }
        };

        match self.gateway.forward(req, &origin, &ip).await {
            Ok(response) => response,
            Err(GuardError::ForwardTimeout) => {
                error!("backend {} timed out", origin);
                status_response(StatusCode::GATEWAY_TIMEOUT)
            }
            Err(e) => {
                error!("forwarding to {} failed: {}", origin, e);
                status_response(StatusCode::BAD_GATEWAY)
            }
        }
    }
}

/// Extract the source IP from a `host:port` remote address
fn source_ip(remote: &str) -> Option<String> {
    remote
        .parse::<SocketAddr>()
        .ok()
        .map(|addr| addr.ip().to_string())
}

/// Parse the configured backend origin, requiring scheme and authority
fn backend_origin(backend: &str) -> crate::error::Result<Uri> {
    let origin: Uri = backend
        .parse()
        .map_err(|e| GuardError::Config(format!("backend origin does not parse: {}", e)))?;
    if origin.scheme().is_none() || origin.authority().is_none() {
        return Err(GuardError::Config(
            "backend origin must include scheme and host".to_string(),
        ));
    }
    Ok(origin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::text_body;
    use http_body_util::BodyExt;
    use hyper::service::service_fn;
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn dispatcher(ceiling: u32, backend: String) -> Dispatcher {
        Dispatcher::new(
            Arc::new(AdmissionController::new(ceiling)),
            ForwardingGateway::new(Duration::from_secs(3)),
            backend,
        )
    }

    fn request() -> Request<ProxyBody> {
        Request::builder()
            .uri("/widgets?page=2")
            .body(text_body(""))
            .unwrap()
    }

    /// Serve a one-route echo backend on an ephemeral loopback port
    async fn spawn_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let service = service_fn(|req: Request<hyper::body::Incoming>| async move {
                        let forwarded = req
                            .headers()
                            .get("x-forwarded-for")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        let response = Response::builder()
                            .header("x-echo-path", req.uri().to_string())
                            .header("x-echo-forwarded-for", forwarded)
                            .body(text_body("backend-ok"))
                            .unwrap();
                        Ok::<_, Infallible>(response)
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        addr
    }

    #[test]
    fn test_source_ip() {
        assert_eq!(source_ip("203.0.113.7:51104").as_deref(), Some("203.0.113.7"));
        assert_eq!(source_ip("[::1]:8080").as_deref(), Some("::1"));
        assert_eq!(source_ip("203.0.113.7"), None);
        assert_eq!(source_ip("no port here"), None);
        assert_eq!(source_ip(""), None);
    }

    #[test]
    fn test_backend_origin_requires_scheme_and_host() {
        assert!(backend_origin("http://10.0.0.5:9000").is_ok());
        assert!(backend_origin("backend.internal:9000/").is_err());
        assert!(backend_origin("/just/a/path").is_err());
        assert!(backend_origin("not a uri").is_err());
    }

    #[tokio::test]
    async fn test_malformed_remote_address_is_rejected_without_accounting() {
        let dispatcher = dispatcher(3, "http://127.0.0.1:9".to_string());

        let response = dispatcher.handle("not-an-address", request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Admission state was never consulted
        assert_eq!(dispatcher.admission().tracked_sources(), 0);
    }

    #[tokio::test]
    async fn test_blacklisted_source_is_rejected() {
        let dispatcher = dispatcher(1, "http://127.0.0.1:9".to_string());

        // Promote the source with a deterministic clock
        let admission = dispatcher.admission();
        assert!(admission.admit_at("203.0.113.7", 0));
        assert!(!admission.admit_at("203.0.113.7", 1));
        assert!(admission.is_blacklisted("203.0.113.7"));

        let response = dispatcher.handle("203.0.113.7:51104", request()).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_backend_origin_is_a_client_error() {
        let dispatcher = dispatcher(3, "no scheme at all".to_string());

        let response = dispatcher.handle("203.0.113.7:51104", request()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_a_gateway_error() {
        // Bind and immediately drop a listener so the port refuses connections
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = dispatcher(3, format!("http://{}", addr));
        let response = dispatcher.handle("203.0.113.7:51104", request()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_admitted_request_is_forwarded() {
        let backend = spawn_backend().await;
        let dispatcher = dispatcher(100, format!("http://{}", backend));

        let response = dispatcher.handle("203.0.113.7:51104", request()).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Path and query reached the backend intact
        assert_eq!(
            response.headers().get("x-echo-path").unwrap(),
            "/widgets?page=2"
        );
        // The client address was recorded for the backend
        assert_eq!(
            response.headers().get("x-echo-forwarded-for").unwrap(),
            "203.0.113.7"
        );

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"backend-ok");
    }
}
