use std::net::IpAddr;

use actix_web::HttpRequest;
use actix_web::http::header::HeaderMap;
use keyward::ip;

/// Resolve the caller's public address, first present source wins:
/// the self-reported payload field, then the first public entry of the
/// forwarded-for header (or its first entry verbatim if none is public), then
/// the socket peer.
pub fn resolve_client_ip(explicit: Option<&str>, forwarded: Option<&str>, peer: Option<IpAddr>) -> Option<String> {
    if let Some(explicit) = explicit.filter(|ip| !ip.is_empty()) {
        return Some(explicit.to_string());
    }

    if let Some(header) = forwarded.filter(|h| !h.trim().is_empty()) {
        let mut entries = header.split(',').map(str::trim);
        if let Some(public) = entries.clone().find(|entry| ip::is_public(entry)) {
            return Some(public.to_string());
        }
        return entries.next().map(str::to_string);
    }

    peer.map(|addr| addr.to_string())
}

/// Actix adapter: reads `X-Forwarded-For`, falling back to `X-Real-IP`.
pub fn client_ip(req: &HttpRequest, explicit: Option<&str>) -> Option<String> {
    let headers = req.headers();
    let forwarded = header_str(headers, "X-Forwarded-For").or_else(|| header_str(headers, "X-Real-IP"));

    resolve_client_ip(explicit, forwarded, req.peer_addr().map(|addr| addr.ip()))
}

/// Headers that are not visible ASCII count as absent.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
