//! Header rewriting shared by the request and response directions.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::Version;
use std::net::IpAddr;

pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Pseudonym this proxy records in `Via`.
pub const VIA_PSEUDONYM: &str = "router";

// Hop-by-hop headers, these are removed when sent to the backend
// and again when the backend's response is sent back.
static HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Renders a protocol version as `<major>.<minor>`.
pub fn version_string(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

/// Computes the next `Via` value: any prior values joined with `", "`,
/// followed by `"<version> router"`.
pub fn compose_via<'a, I>(prior: I, http_version: &str) -> Vec<u8>
where
    I: IntoIterator<Item = &'a HeaderValue>,
{
    let mut via = Vec::new();
    for value in prior {
        via.extend_from_slice(value.as_bytes());
        via.extend_from_slice(b", ");
    }
    via.extend_from_slice(http_version.as_bytes());
    via.push(b' ');
    via.extend_from_slice(VIA_PSEUDONYM.as_bytes());
    via
}

/// Replaces every `Via` value in `headers` with a single composed one.
pub fn populate_via_header(headers: &mut HeaderMap, version: Version) {
    let via = compose_via(headers.get_all(header::VIA), version_string(version));
    // Prior values were valid header bytes, so the joined value is too.
    if let Ok(value) = HeaderValue::from_bytes(&via) {
        headers.insert(header::VIA, value);
    }
}

/// Removes hop-by-hop headers, including any listed in `Connection`.
pub fn remove_hop_headers(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in &HOP_HEADERS {
        headers.remove(name);
    }
}

/// Appends the client address to `X-Forwarded-For`, keeping prior hops.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(&X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client_ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), client_ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR.clone(), value);
    }
}
