//! Forwarding of the original request to its real destination
//!
//! This is the primary path. The mirror pipeline runs beside it and never
//! changes what is sent here.

use crate::mirror::types::{default_port, Headers, ObservedRequest, ReplayOrigin};
use crate::proxy::headers::{paths, X_TARGET_URL};
use crate::proxy::types::*;
use axum::body::Body;
use bytes::Bytes;
use http::request::Parts;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;

/// Extract the upstream destination for a proxied request
///
/// The `X-Target-Url` header wins; otherwise the request must use an
/// absolute-form URI.
pub fn resolve_destination(parts: &Parts) -> ProxyResult<Uri> {
    if let Some(value) = parts.headers.get(X_TARGET_URL) {
        let raw = value
            .to_str()
            .map_err(|_| ProxyError::InvalidTargetUrl("non-ASCII X-Target-Url".to_string()))?;
        let target = TargetUrl::try_new(raw.to_string())
            .map_err(|e| ProxyError::InvalidTargetUrl(format!("Invalid target URL '{raw}': {e}")))?;
        return resolve_target_uri(&target, &parts.uri);
    }

    if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
        return Ok(parts.uri.clone());
    }

    Err(ProxyError::InvalidTargetUrl(
        "Missing X-Target-Url header".to_string(),
    ))
}

/// Combine a target URL with the original request path
///
/// A target with its own path is used as-is; a bare base gets the
/// original path and query appended.
pub fn resolve_target_uri(target_url: &TargetUrl, original_uri: &Uri) -> ProxyResult<Uri> {
    let target_uri: Uri = target_url
        .as_ref()
        .parse()
        .map_err(|_| ProxyError::InvalidTargetUrl(target_url.as_ref().to_string()))?;

    let final_uri_str = if target_uri.path() != "/" && !target_uri.path().is_empty() {
        target_url.as_ref().to_string()
    } else {
        let path_and_query = original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(paths::DEFAULT);

        format!(
            "{}{}",
            target_url.as_ref().trim_end_matches('/'),
            path_and_query
        )
    };

    final_uri_str
        .parse()
        .map_err(|_| ProxyError::InvalidTargetUrl(final_uri_str))
}

/// Describe the original request the way the mirror pipeline expects it
pub fn observe(parts: &Parts, destination: &Uri, body: &Bytes) -> ProxyResult<ObservedRequest> {
    let scheme = destination.scheme_str().unwrap_or("http").to_string();
    let host = destination
        .host()
        .ok_or_else(|| ProxyError::InvalidTargetUrl(destination.to_string()))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = destination.port_u16().unwrap_or_else(|| default_port(&scheme));
    let path = destination
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(paths::DEFAULT)
        .to_string();

    let mut headers = Headers::from(&parts.headers);
    headers.remove(X_TARGET_URL);

    Ok(ObservedRequest {
        method: parts.method.clone(),
        scheme,
        host,
        port,
        path,
        headers,
        body: body.clone(),
        is_replay: ReplayOrigin::None,
    })
}

/// Forwards original requests upstream
#[derive(Clone)]
pub struct ForwardingService {
    config: Arc<ProxyConfig>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ForwardingService {
    pub fn new(config: ProxyConfig) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .http1_preserve_header_case(true)
            .build_http();

        Self {
            config: Arc::new(config),
            client,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Collect the request body, bounded by the configured limit
    pub async fn collect_body(&self, body: Body) -> ProxyResult<Bytes> {
        let limit = *self.config.max_request_size.as_ref();
        let collected = http_body_util::Limited::new(body, limit)
            .collect()
            .await
            .map_err(|e| {
                if e.is::<http_body_util::LengthLimitError>() {
                    ProxyError::RequestTooLarge {
                        size: BodySize::from(limit + 1),
                        max_size: self.config.max_request_size,
                    }
                } else {
                    ProxyError::Internal(format!("Body collection error: {e}"))
                }
            })?;

        Ok(collected.to_bytes())
    }

    /// Send the original request to `destination` and return the upstream response
    pub async fn forward(
        &self,
        mut parts: Parts,
        body: Bytes,
        destination: Uri,
    ) -> ProxyResult<Response<Body>> {
        parts.headers.remove(X_TARGET_URL);
        parts.uri = destination;

        let outgoing = Request::from_parts(parts, Full::new(body));
        let timeout_duration = self.config.request_timeout;

        let response = tokio::time::timeout(timeout_duration, self.client.request(outgoing))
            .await
            .map_err(|_| ProxyError::RequestTimeout(timeout_duration))?
            .map_err(|e| ProxyError::Connection(e.to_string()))?;

        let (response_parts, response_body) = response.into_parts();
        Ok(Response::from_parts(response_parts, Body::new(response_body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn parts(uri: &str, target: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        if let Some(target) = target {
            builder = builder.header(X_TARGET_URL, target);
        }
        builder
            .header("Cookie", "s=1")
            .body(())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn test_resolve_from_target_header() {
        let parts = parts("/users/123?param=value", Some("https://api.example.com"));
        let uri = resolve_destination(&parts).unwrap();
        assert_eq!(uri.to_string(), "https://api.example.com/users/123?param=value");
    }

    #[test]
    fn test_resolve_from_absolute_uri() {
        let parts = parts("http://svc.internal:8080/x?y=1", None);
        let uri = resolve_destination(&parts).unwrap();
        assert_eq!(uri.to_string(), "http://svc.internal:8080/x?y=1");
    }

    #[test]
    fn test_resolve_requires_a_destination() {
        let parts = parts("/only/a/path", None);
        let err = resolve_destination(&parts).unwrap_err();
        assert!(err.to_string().contains("Missing X-Target-Url header"));
    }

    #[test]
    fn test_resolve_rejects_invalid_target() {
        let parts = parts("/", Some("not-a-url"));
        assert!(matches!(
            resolve_destination(&parts),
            Err(ProxyError::InvalidTargetUrl(_))
        ));
    }

    #[test]
    fn test_target_with_path_is_used_as_is() {
        let target = TargetUrl::try_new("https://api.example.com/v1/endpoint".to_string()).unwrap();
        let original: Uri = "/users/123".parse().unwrap();

        let resolved = resolve_target_uri(&target, &original).unwrap();
        assert_eq!(resolved.to_string(), "https://api.example.com/v1/endpoint");
    }

    #[test]
    fn test_target_with_trailing_slash() {
        let target = TargetUrl::try_new("https://api.example.com/".to_string()).unwrap();
        let original: Uri = "/users/123".parse().unwrap();

        let resolved = resolve_target_uri(&target, &original).unwrap();
        assert_eq!(resolved.to_string(), "https://api.example.com/users/123");
    }

    #[test]
    fn test_observe_builds_request_view() {
        let parts = parts("/api/v1/items?id=5", Some("https://svc.internal"));
        let destination = resolve_destination(&parts).unwrap();
        let observed = observe(&parts, &destination, &Bytes::from_static(b"{}")).unwrap();

        assert_eq!(observed.method, Method::POST);
        assert_eq!(observed.scheme, "https");
        assert_eq!(observed.host, "svc.internal");
        assert_eq!(observed.port, 443);
        assert_eq!(observed.path, "/api/v1/items?id=5");
        assert_eq!(observed.headers.get("cookie"), Some("s=1"));
        assert!(!observed.headers.contains(X_TARGET_URL));
        assert_eq!(observed.is_replay, ReplayOrigin::None);
        assert_eq!(observed.canonical_url(), "https://svc.internal/api/v1/items?id=5");
    }

    #[tokio::test]
    async fn test_collect_body_enforces_limit() {
        let service = ForwardingService::new(ProxyConfig {
            max_request_size: RequestSizeLimit::try_new(4).unwrap(),
            ..ProxyConfig::default()
        });

        assert!(service.collect_body(Body::from("1234")).await.is_ok());
        assert!(matches!(
            service.collect_body(Body::from("12345")).await,
            Err(ProxyError::RequestTooLarge { .. })
        ));
    }
}
