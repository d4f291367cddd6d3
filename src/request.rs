use crate::error::Error;
use url::Url;

/// Everything the transport and the handshake need out of a `ws://`/`wss://`
/// URL. Grounded in the teacher's `request.rs::construct_http_request`, split
/// so the client orchestrator can use the connection fields (`host`, `port`,
/// `use_tls`) without also depending on handshake-specific request framing.
#[derive(Debug, Clone)]
pub struct ParsedUrl {
    /// Host to open the TCP connection against.
    pub host: String,
    /// Port to open the TCP connection against (default 80/443 if the URL
    /// didn't specify one).
    pub port: u16,
    pub use_tls: bool,
    /// Value to send as the request's `Host:` header — includes the port only
    /// when the URL itself specified one.
    pub host_header: String,
    /// Request path plus query string, e.g. `/socket?id=1`.
    pub path: String,
}

/// Parses a `ws://`/`wss://` URL into the fields needed to open a transport
/// connection and build the HTTP Upgrade request.
pub fn parse_ws_url(ws_url: &str) -> Result<ParsedUrl, Error> {
    let parsed = Url::parse(ws_url)?;

    let (use_tls, default_port) = match parsed.scheme() {
        "ws" => (false, 80u16),
        "wss" => (true, 443u16),
        other => return Err(Error::InvalidUrl(format!("unsupported scheme {other:?}"))),
    };

    let host = parsed
        .host_str()
        .ok_or_else(|| Error::InvalidUrl("URL has no host".to_string()))?
        .to_string();
    let port = parsed.port().unwrap_or(default_port);

    let host_header = match parsed.port() {
        Some(explicit_port) => format!("{host}:{explicit_port}"),
        None => host.clone(),
    };

    let path = match parsed.query() {
        Some(query) => format!("{}?{}", parsed.path(), query),
        None => parsed.path().to_string(),
    };

    Ok(ParsedUrl {
        host,
        port,
        use_tls,
        host_header,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ws_url_with_default_port() {
        let parsed = parse_ws_url("ws://example.com/socket").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert!(!parsed.use_tls);
        assert_eq!(parsed.host_header, "example.com");
        assert_eq!(parsed.path, "/socket");
    }

    #[test]
    fn parses_wss_url_with_explicit_port_and_query() {
        let parsed = parse_ws_url("wss://example.com:9443/socket?id=1").unwrap();
        assert_eq!(parsed.port, 9443);
        assert!(parsed.use_tls);
        assert_eq!(parsed.host_header, "example.com:9443");
        assert_eq!(parsed.path, "/socket?id=1");
    }

    #[test]
    fn rejects_non_websocket_scheme() {
        assert!(parse_ws_url("http://example.com").is_err());
    }

    #[test]
    fn rejects_url_without_host() {
        assert!(parse_ws_url("ws:///socket").is_err());
    }
}
