// Same-host Origin policy (spec 4.2 / 6.2).
//
// No dedicated URL crate is in the teacher's dependency set; `http::Uri`
// (already pulled in transitively by axum/hyper) is enough for the host/port
// normalization this check needs.

use axum::http::{header, HeaderMap, Uri};

#[derive(Debug, thiserror::Error)]
#[error("origin does not match host")]
pub struct OriginRejected;

pub fn check_origin(headers: &HeaderMap) -> Result<(), OriginRejected> {
    let Some(origin_header) = headers.get(header::ORIGIN) else {
        // Agents are non-browser clients: a missing Origin is permitted.
        return Ok(());
    };

    let origin_str = origin_header.to_str().map_err(|_| OriginRejected)?;
    let origin_uri: Uri = origin_str.parse().map_err(|_| OriginRejected)?;
    let scheme = origin_uri.scheme_str().ok_or(OriginRejected)?;
    if scheme != "http" && scheme != "https" {
        return Err(OriginRejected);
    }
    let origin_host = origin_uri.host().ok_or(OriginRejected)?;
    let normalized_origin = normalize_host(origin_host, origin_uri.port_u16(), scheme);

    let host_header = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .ok_or(OriginRejected)?;
    let host_uri: Uri = format!("http://{host_header}")
        .parse()
        .map_err(|_| OriginRejected)?;
    let declared_host = host_uri.host().ok_or(OriginRejected)?;
    let normalized_declared = normalize_host(declared_host, host_uri.port_u16(), "http");

    if normalized_origin == normalized_declared {
        Ok(())
    } else {
        Err(OriginRejected)
    }
}

fn normalize_host(host: &str, port: Option<u16>, scheme: &str) -> String {
    let host = host.to_ascii_lowercase();
    match port {
        Some(80) if scheme == "http" => host,
        Some(443) if scheme == "https" => host,
        Some(port) => format!("{host}:{port}"),
        None => host,
    }
}
