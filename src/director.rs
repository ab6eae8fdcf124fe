//! Rewrites an inbound request into the request sent to a backend.
//!
//! [`SingleHostDirector`] does the generic single-host forwarding: scheme,
//! authority, path prefix and query are taken from the backend URL.
//! [`BackendDirector`] layers the backend header policy on top of it.

use crate::error::ProxyError;
use crate::headers::{append_forwarded_for, populate_via_header, remove_hop_headers};
use http::header::{self, HeaderValue};
use http::{Request, Uri, Version};
use std::net::SocketAddr;
use url::Url;

/// Peer address of the inbound connection, stored as a request extension by
/// the server layer.
#[derive(Debug, Clone, Copy)]
pub struct ClientAddr(pub SocketAddr);

/// Turns an inbound request into the equivalent request for one target.
pub trait Director: Send + Sync {
    fn direct<B>(&self, req: &mut Request<B>) -> Result<(), ProxyError>;
}

pub struct SingleHostDirector {
    scheme: String,
    authority: String,
    path: String,
    query: Option<String>,
}

impl SingleHostDirector {
    pub fn new(target: &Url) -> Result<Self, ProxyError> {
        let authority = backend_authority(target)?;
        Ok(Self {
            scheme: target.scheme().to_string(),
            authority,
            path: target.path().to_string(),
            query: target.query().map(str::to_string),
        })
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    fn target_uri(&self, original: &Uri) -> Result<Uri, ProxyError> {
        let path = single_joining_slash(&self.path, original.path());
        let query = match (self.query.as_deref(), original.query()) {
            (None | Some(""), None | Some("")) => None,
            (Some(target), None | Some("")) => Some(target.to_string()),
            (None | Some(""), Some(request)) => Some(request.to_string()),
            (Some(target), Some(request)) => Some(format!("{}&{}", target, request)),
        };

        let uri = match query {
            Some(query) => format!("{}://{}{}?{}", self.scheme, self.authority, path, query),
            None => format!("{}://{}{}", self.scheme, self.authority, path),
        };

        uri.parse()
            .map_err(|e: http::uri::InvalidUri| ProxyError::Uri(e.to_string()))
    }
}

impl Director for SingleHostDirector {
    fn direct<B>(&self, req: &mut Request<B>) -> Result<(), ProxyError> {
        let target = self.target_uri(req.uri())?;
        *req.uri_mut() = target;

        let client = req.extensions().get::<ClientAddr>().copied();
        let headers = req.headers_mut();
        remove_hop_headers(headers);
        if let Some(ClientAddr(addr)) = client {
            append_forwarded_for(headers, addr.ip());
        }
        Ok(())
    }
}

/// Single-host forwarding followed by the backend header policy: `Host`
/// names the backend, a missing `User-Agent` becomes blank, and this hop is
/// recorded in `Via`.
pub struct BackendDirector {
    base: SingleHostDirector,
    host: HeaderValue,
}

impl BackendDirector {
    pub fn new(backend_url: &Url) -> Result<Self, ProxyError> {
        let base = SingleHostDirector::new(backend_url)?;
        let host = HeaderValue::from_str(base.authority())
            .map_err(|e| ProxyError::Config(format!("Invalid backend host: {}", e)))?;
        Ok(Self { base, host })
    }

    pub fn host(&self) -> &HeaderValue {
        &self.host
    }
}

impl Director for BackendDirector {
    fn direct<B>(&self, req: &mut Request<B>) -> Result<(), ProxyError> {
        self.base.direct(req)?;

        let version = req.version();
        let headers = req.headers_mut();
        headers.insert(header::HOST, self.host.clone());

        // A blank User-Agent stops the client from sending a default one.
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, HeaderValue::from_static(""));
        }

        populate_via_header(headers, version);

        // Via keeps the inbound version; the backend is always spoken to in HTTP/1.1.
        *req.version_mut() = Version::HTTP_11;
        Ok(())
    }
}

/// `host[:port]` of the backend, as the backend expects to see it in `Host`.
pub fn backend_authority(url: &Url) -> Result<String, ProxyError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::Config(format!("Backend URL has no host: {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{}{}", a, &b[1..]),
        (false, false) => format!("{}/{}", a, b),
        _ => format!("{}{}", a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn director(url: &str) -> BackendDirector {
        BackendDirector::new(&Url::parse(url).unwrap()).unwrap()
    }

    fn request(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_joins_backend_path_prefix() {
        let director = director("http://backend.example.com:8080/prefix/");
        let mut req = request("http://www.example.com/api/users?page=2");

        director.direct(&mut req).unwrap();

        assert_eq!(
            req.uri().to_string(),
            "http://backend.example.com:8080/prefix/api/users?page=2"
        );
    }

    #[test]
    fn test_joins_backend_and_request_queries() {
        let director = director("http://backend.example.com/base?token=abc");
        let mut req = request("/search?q=rust");

        director.direct(&mut req).unwrap();

        assert_eq!(
            req.uri().to_string(),
            "http://backend.example.com/base/search?token=abc&q=rust"
        );
    }

    #[test]
    fn test_single_joining_slash() {
        assert_eq!(single_joining_slash("/a/", "/b"), "/a/b");
        assert_eq!(single_joining_slash("/a", "b"), "/a/b");
        assert_eq!(single_joining_slash("/a", "/b"), "/a/b");
        assert_eq!(single_joining_slash("/", "/"), "/");
    }

    #[test]
    fn test_host_is_overwritten_with_backend_host() {
        let director = director("http://backend.example.com:8080");
        let mut req = Request::builder()
            .uri("/")
            .header(header::HOST, "www.gov.example")
            .body(())
            .unwrap();

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get(header::HOST).unwrap(), "backend.example.com:8080");
        assert_eq!(req.headers().get_all(header::HOST).iter().count(), 1);
    }

    #[test]
    fn test_missing_user_agent_becomes_blank() {
        let director = director("http://backend.example.com");
        let mut req = request("/");

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get(header::USER_AGENT).unwrap(), "");
    }

    #[test]
    fn test_existing_user_agent_is_kept() {
        let director = director("http://backend.example.com");
        let mut req = Request::builder()
            .uri("/")
            .header(header::USER_AGENT, "curl/8.0")
            .body(())
            .unwrap();

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get(header::USER_AGENT).unwrap(), "curl/8.0");
    }

    #[test]
    fn test_via_records_request_version() {
        let director = director("http://backend.example.com");
        let mut req = Request::builder()
            .uri("/")
            .version(Version::HTTP_10)
            .header(header::VIA, "1.1 cdn")
            .body(())
            .unwrap();

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get(header::VIA).unwrap(), "1.1 cdn, 1.0 router");
    }

    #[test]
    fn test_http2_request_is_sent_as_http11() {
        let director = director("http://backend.example.com");
        let mut req = Request::builder()
            .uri("/")
            .version(Version::HTTP_2)
            .body(())
            .unwrap();

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get(header::VIA).unwrap(), "2.0 router");
        assert_eq!(req.version(), Version::HTTP_11);
    }

    #[test]
    fn test_client_addr_is_forwarded() {
        let director = director("http://backend.example.com");
        let mut req = request("/");
        req.extensions_mut()
            .insert(ClientAddr("203.0.113.9:51000".parse().unwrap()));

        director.direct(&mut req).unwrap();

        assert_eq!(req.headers().get("x-forwarded-for").unwrap(), "203.0.113.9");
    }

    #[test]
    fn test_backend_without_host_is_rejected() {
        let url = Url::parse("unix:/var/run/backend.sock").unwrap();
        assert!(BackendDirector::new(&url).is_err());
    }
}
