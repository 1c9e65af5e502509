//! Request transformer: builds the retargeted, scrubbed copy of a request

use crate::mirror::types::{
    MirrorMetadata, MirrorTarget, MirroredRequest, ObservedRequest, SCRUBBED_HEADERS,
    X_MIRRORED_FROM,
};
use bytes::Bytes;
use http::header::HOST;

/// Build the mirrored copy of `req` addressed to `target`
///
/// The result owns fresh copies of the headers and body; nothing done to it
/// can be observed through `req`. Performs no I/O.
pub fn build_mirrored(req: &ObservedRequest, target: &MirrorTarget) -> MirroredRequest {
    let mut headers = req.headers.clone();
    for name in SCRUBBED_HEADERS {
        headers.remove(name);
    }
    if headers.contains(HOST.as_str()) {
        headers.set(HOST.as_str(), target.authority());
    }
    headers.set(X_MIRRORED_FROM, req.canonical_url());

    MirroredRequest {
        method: req.method.clone(),
        scheme: target.scheme.clone(),
        host: target.host.clone(),
        port: target.port,
        path: rewrite_path(&target.base_path, &req.path),
        headers,
        body: Bytes::copy_from_slice(&req.body),
        metadata: MirrorMetadata { mirrored: true },
    }
}

/// Prefix `original` (path plus query) with `base_path`
///
/// An empty or `/` base leaves the original untouched. Otherwise trailing
/// slashes on the base are dropped so exactly one slash joins the two.
pub fn rewrite_path(base_path: &str, original: &str) -> String {
    if base_path.is_empty() || base_path == "/" {
        return original.to_string();
    }

    let base = base_path.trim_end_matches('/');
    if original.starts_with('/') {
        format!("{base}{original}")
    } else {
        format!("{base}/{original}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use rstest::rstest;

    fn target(base: &str) -> MirrorTarget {
        MirrorTarget::parse(base).unwrap()
    }

    fn original() -> ObservedRequest {
        ObservedRequest::from_url(Method::POST, "https://svc.internal/api/v1/items?id=5")
            .unwrap()
            .with_header("Content-Type", "application/json")
            .with_header("Authorization", "Bearer secret")
            .with_header("Cookie", "s=1")
            .with_header("Proxy-Authorization", "Basic abc")
            .with_header("X-Trace", "t-1")
            .with_body(r#"{"name":"widget"}"#)
    }

    #[rstest]
    #[case("/prefix/", "/a/b?x=1", "/prefix/a/b?x=1")]
    #[case("/prefix", "/a/b?x=1", "/prefix/a/b?x=1")]
    #[case("/prefix//", "/a", "/prefix/a")]
    #[case("/", "/a/b?x=1", "/a/b?x=1")]
    #[case("", "/a/b?x=1", "/a/b?x=1")]
    #[case("/deep/nested/", "/", "/deep/nested/")]
    fn test_rewrite_path(#[case] base: &str, #[case] path: &str, #[case] expected: &str) {
        assert_eq!(rewrite_path(base, path), expected);
    }

    #[test]
    fn test_retargets_scheme_host_port() {
        let mirrored = build_mirrored(&original(), &target("http://mirror.test:9000"));

        assert_eq!(mirrored.scheme, "http");
        assert_eq!(mirrored.host, "mirror.test");
        assert_eq!(mirrored.port, 9000);
        assert_eq!(mirrored.path, "/api/v1/items?id=5");
        assert_eq!(mirrored.url(), "http://mirror.test:9000/api/v1/items?id=5");
    }

    #[test]
    fn test_prefixes_base_path() {
        let mirrored = build_mirrored(&original(), &target("https://m.example.com/prefix/"));
        assert_eq!(mirrored.path, "/prefix/api/v1/items?id=5");
    }

    #[test]
    fn test_scrubs_sensitive_headers() {
        let mirrored = build_mirrored(&original(), &target("https://mirror.test"));

        for name in ["authorization", "cookie", "proxy-authorization"] {
            assert!(!mirrored.headers.contains(name), "{name} leaked");
        }
        assert_eq!(mirrored.headers.get("content-type"), Some("application/json"));
        assert_eq!(mirrored.headers.get("x-trace"), Some("t-1"));
    }

    #[test]
    fn test_non_utf8_header_values_are_copied_verbatim() {
        let req = original().with_header("X-Name", Bytes::from_static(b"caf\xe9"));
        let mirrored = build_mirrored(&req, &target("https://mirror.test"));

        assert_eq!(mirrored.headers.get_bytes("x-name"), Some(b"caf\xe9".as_slice()));
    }

    #[test]
    fn test_host_header_follows_target() {
        let req = original().with_header("Host", "svc.internal");
        let mirrored = build_mirrored(&req, &target("http://mirror.test:9000"));

        assert_eq!(mirrored.headers.get("host"), Some("mirror.test:9000"));
    }

    #[test]
    fn test_sets_provenance_to_original_url() {
        let req = original().with_header("X-Mirrored-From", "spoofed");
        let mirrored = build_mirrored(&req, &target("https://m.example.com/prefix"));

        assert_eq!(
            mirrored.mirrored_from(),
            Some("https://svc.internal/api/v1/items?id=5")
        );
        assert_eq!(mirrored.headers.get_all(X_MIRRORED_FROM).count(), 1);
    }

    #[test]
    fn test_copies_method_and_body_and_marks_mirrored() {
        let mirrored = build_mirrored(&original(), &target("https://mirror.test"));

        assert_eq!(mirrored.method, Method::POST);
        assert_eq!(&mirrored.body[..], br#"{"name":"widget"}"#);
        assert!(mirrored.is_mirrored());
    }

    #[test]
    fn test_original_is_untouched() {
        let req = original();
        let before = req.clone();

        let mut mirrored = build_mirrored(&req, &target("https://mirror.test/p"));
        mirrored.headers.append("X-Extra", "1");
        mirrored.path.push_str("&tampered");

        assert_eq!(req, before);
        assert!(req.headers.contains("cookie"));
    }

    #[test]
    fn test_transform_is_deterministic() {
        let req = original();
        let t = target("https://m.example.com/prefix/");

        assert_eq!(build_mirrored(&req, &t), build_mirrored(&req, &t));
    }
}
