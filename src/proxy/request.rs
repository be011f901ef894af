//! Inbound request classification and rewriting.
//!
//! Every proxy request is one of two shapes:
//!
//! - `CONNECT host:port`, handed to the tunnel engine after the policy
//!   check; nothing beyond the authority is parsed.
//! - an absolute-form request (`GET http://host/path`), rewritten into the
//!   origin-form request the upstream will see.
//!
//! Rewriting consumes the control headers, strips them along with all
//! hop-by-hop headers, and pins `Host` to the target authority. The control
//! headers must never reach the origin: `X-WHSentry-TLS` upgrades the
//! upstream hop to TLS even for an `http://` URI, and
//! `X-WHSentry-ClientCert` selects a client identity by name.

use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::{Method, Request, Uri};

use super::error::{ProxyError, ProxyResult};

/// Control header forcing TLS on the upstream hop.
pub const HEADER_TLS: &str = "x-whsentry-tls";

/// Control header selecting a client certificate by id.
pub const HEADER_CLIENT_CERT: &str = "x-whsentry-clientcert";

/// Hop-by-hop headers that must not be forwarded, per RFC 7230 §6.1.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// A CONNECT target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    /// Target host (name or IP literal, brackets removed).
    pub host: String,
    /// Target port.
    pub port: u16,
}

/// A rewritten non-CONNECT request, ready for the forward engine.
#[derive(Debug)]
pub struct ForwardTarget<B> {
    /// Target host.
    pub host: String,
    /// Target port, defaulted by scheme and TLS upgrade.
    pub port: u16,
    /// Whether the upstream hop uses TLS.
    pub use_tls: bool,
    /// Client identity requested via `X-WHSentry-ClientCert`, if any.
    pub client_cert_id: Option<String>,
    /// The rewritten request: origin-form URI, control and hop-by-hop
    /// headers stripped, `Host` set to the target authority.
    pub request: Request<B>,
}

/// Outcome of classifying an inbound request.
#[derive(Debug)]
pub enum Classified<B> {
    /// `CONNECT`: splice bytes after the policy check. The request is
    /// handed back untouched; the tunnel engine needs it for the upgrade.
    Tunnel {
        /// Parsed tunnel target.
        target: TunnelTarget,
        /// The original CONNECT request.
        request: Request<B>,
    },
    /// Anything else: forward through the HTTP engine.
    Forward(Box<ForwardTarget<B>>),
}

/// Classify an inbound proxy request.
pub fn classify<B>(req: Request<B>) -> ProxyResult<Classified<B>> {
    if req.method() == Method::CONNECT {
        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| ProxyError::BadRequest("CONNECT without authority".to_string()))?;
        let (host, port) = parse_host_port(authority.as_str())?;
        return Ok(Classified::Tunnel {
            target: TunnelTarget { host, port },
            request: req,
        });
    }

    let uri = req.uri().clone();
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| {
            ProxyError::BadRequest("request target must be absolute-form".to_string())
        })?
        .to_ascii_lowercase();
    let host = uri
        .host()
        .ok_or_else(|| ProxyError::BadRequest("request target has no host".to_string()))?
        .to_string();

    let (mut parts, body) = req.into_parts();

    let tls_requested = take_header(&mut parts.headers, HEADER_TLS)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let client_cert_id = take_header(&mut parts.headers, HEADER_CLIENT_CERT);

    let use_tls = match scheme.as_str() {
        "http" => tls_requested,
        // An https:// target without the explicit header is ambiguous:
        // the caller may expect an end-to-end tunnel it is not getting.
        // TLS upgrade stays opt-in.
        "https" if tls_requested => true,
        "https" => {
            return Err(ProxyError::BadRequest(
                "https request targets require X-WHSentry-TLS: true".to_string(),
            ))
        }
        other => {
            return Err(ProxyError::BadRequest(format!(
                "unsupported scheme '{other}'"
            )))
        }
    };

    let default_port = if use_tls { 443 } else { 80 };
    let port = uri.port_u16().unwrap_or(default_port);

    strip_hop_by_hop(&mut parts.headers);

    let authority = if port == default_port {
        host.clone()
    } else {
        format!("{host}:{port}")
    };
    parts.headers.insert(
        HOST,
        HeaderValue::from_str(&authority)
            .map_err(|_| ProxyError::BadRequest("invalid target authority".to_string()))?,
    );

    parts.uri = origin_form(&uri)?;

    Ok(Classified::Forward(Box::new(ForwardTarget {
        host,
        port,
        use_tls,
        client_cert_id,
        request: Request::from_parts(parts, body),
    })))
}

/// Remove hop-by-hop headers: the static RFC set, anything named in the
/// `Connection` header, and every `Proxy-*` header.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let connection_listed: Vec<String> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let dynamic: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("proxy-"))
        .cloned()
        .collect();

    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
    for name in connection_listed {
        headers.remove(name.as_str());
    }
    for name in dynamic {
        headers.remove(&name);
    }
}

/// Parse a `host:port` authority, handling bracketed IPv6 literals.
/// A missing port defaults to 443.
pub fn parse_host_port(authority: &str) -> ProxyResult<(String, u16)> {
    if let Some((host, port_str)) = authority.rsplit_once(':') {
        if host.starts_with('[') && host.ends_with(']') {
            let port = port_str
                .parse::<u16>()
                .map_err(|_| ProxyError::BadRequest(format!("invalid port: {port_str}")))?;
            return Ok((host[1..host.len() - 1].to_string(), port));
        }

        // A second colon without brackets means a bare IPv6 literal.
        if host.contains(':') {
            return Ok((authority.to_string(), 443));
        }

        let port = port_str
            .parse::<u16>()
            .map_err(|_| ProxyError::BadRequest(format!("invalid port: {port_str}")))?;
        Ok((host.to_string(), port))
    } else {
        Ok((authority.to_string(), 443))
    }
}

/// Take a header out of the map, returning its value as a string.
fn take_header(headers: &mut HeaderMap, name: &str) -> Option<String> {
    headers
        .remove(name)
        .and_then(|v| v.to_str().map(|s| s.to_string()).ok())
}

/// Reduce an absolute-form URI to its origin-form (path + query).
fn origin_form(uri: &Uri) -> ProxyResult<Uri> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    path.parse()
        .map_err(|_| ProxyError::BadRequest("invalid request path".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderName;

    fn forward<B>(result: ProxyResult<Classified<B>>) -> ForwardTarget<B> {
        match result.unwrap() {
            Classified::Forward(target) => *target,
            Classified::Tunnel { .. } => panic!("expected forward classification"),
        }
    }

    #[test]
    fn test_connect_classified_as_tunnel() {
        let req = Request::builder()
            .method(Method::CONNECT)
            .uri("hooks.example.com:8443")
            .body(())
            .unwrap();
        match classify(req).unwrap() {
            Classified::Tunnel { target, .. } => {
                assert_eq!(target.host, "hooks.example.com");
                assert_eq!(target.port, 8443);
            }
            Classified::Forward(_) => panic!("expected tunnel classification"),
        }
    }

    #[test]
    fn test_relative_form_rejected() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("/just/a/path")
            .body(())
            .unwrap();
        assert!(matches!(
            classify(req).unwrap_err(),
            ProxyError::BadRequest(_)
        ));
    }

    #[test]
    fn test_http_without_header_stays_plain() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://target.example/hook")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        assert!(!target.use_tls);
        assert_eq!(target.port, 80);
        assert_eq!(target.request.uri().to_string(), "/hook");
        assert_eq!(
            target.request.headers().get(HOST).unwrap(),
            "target.example"
        );
    }

    #[test]
    fn test_tls_header_upgrades_and_defaults_443() {
        let req = Request::builder()
            .method(Method::POST)
            .uri("http://target.example/hook")
            .header(HEADER_TLS, "true")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        assert!(target.use_tls);
        assert_eq!(target.port, 443);
        assert!(!target.request.headers().contains_key(HEADER_TLS));
    }

    #[test]
    fn test_tls_header_keeps_explicit_port() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://target.example:12081/hook")
            .header(HEADER_TLS, "true")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        assert!(target.use_tls);
        assert_eq!(target.port, 12081);
        assert_eq!(
            target.request.headers().get(HOST).unwrap(),
            "target.example:12081"
        );
    }

    #[test]
    fn test_https_without_header_rejected() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("https://target.example/hook")
            .body(())
            .unwrap();
        assert!(matches!(
            classify(req).unwrap_err(),
            ProxyError::BadRequest(_)
        ));
    }

    #[test]
    fn test_https_with_header_allowed() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("https://target.example/hook")
            .header(HEADER_TLS, "true")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        assert!(target.use_tls);
        assert_eq!(target.port, 443);
    }

    #[test]
    fn test_client_cert_header_extracted_and_stripped() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://target.example/hook")
            .header(HEADER_TLS, "true")
            .header(HEADER_CLIENT_CERT, "default")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        assert_eq!(target.client_cert_id.as_deref(), Some("default"));
        assert!(!target.request.headers().contains_key(HEADER_CLIENT_CERT));
    }

    #[test]
    fn test_control_headers_never_forwarded() {
        let req = Request::builder()
            .method(Method::GET)
            .uri("http://target.example/hook")
            .header(HEADER_TLS, "false")
            .header(HEADER_CLIENT_CERT, "default")
            .header("x-request-id", "r-1")
            .body(())
            .unwrap();
        let target = forward(classify(req));
        // A non-"true" value does not upgrade, but the header is consumed
        // either way.
        assert!(!target.use_tls);
        assert!(!target.request.headers().contains_key(HEADER_TLS));
        assert!(!target.request.headers().contains_key(HEADER_CLIENT_CERT));
        assert!(target.request.headers().contains_key("x-request-id"));
    }

    #[test]
    fn test_parse_host_port_with_port() {
        assert_eq!(
            parse_host_port("hooks.example.com:8443").unwrap(),
            ("hooks.example.com".to_string(), 8443)
        );
    }

    #[test]
    fn test_parse_host_port_default() {
        assert_eq!(
            parse_host_port("hooks.example.com").unwrap(),
            ("hooks.example.com".to_string(), 443)
        );
    }

    #[test]
    fn test_parse_host_port_ipv6() {
        assert_eq!(
            parse_host_port("[::1]:8443").unwrap(),
            ("::1".to_string(), 8443)
        );
    }

    #[test]
    fn test_parse_host_port_invalid() {
        assert!(parse_host_port("example.com:notaport").is_err());
    }

    #[test]
    fn test_strip_hop_by_hop_static_set() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("h2c"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("accept"));
    }

    #[test]
    fn test_strip_hop_by_hop_connection_listed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "connection",
            HeaderValue::from_static("close, x-session-token"),
        );
        headers.insert(
            HeaderName::from_static("x-session-token"),
            HeaderValue::from_static("abc"),
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert!(!headers.contains_key("x-session-token"));
        assert!(headers.contains_key("content-type"));
    }

    #[test]
    fn test_strip_hop_by_hop_proxy_prefixed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("proxy-authorization"),
            HeaderValue::from_static("Basic xyz"),
        );
        headers.insert(
            HeaderName::from_static("proxy-custom"),
            HeaderValue::from_static("1"),
        );

        strip_hop_by_hop(&mut headers);
        assert!(headers.is_empty());
    }

    #[test]
    fn test_origin_form() {
        let uri: Uri = "http://h.example/a/b?c=1".parse().unwrap();
        assert_eq!(origin_form(&uri).unwrap().to_string(), "/a/b?c=1");

        let bare: Uri = "http://h.example".parse().unwrap();
        assert_eq!(origin_form(&bare).unwrap().to_string(), "/");
    }
}
