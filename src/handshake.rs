use crate::error::Error;
use crate::extensions::{add_extension_headers, merge_extensions, parse_extensions, Extensions};
use crate::request::ParsedUrl;
use crate::transport::Transport;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use log::debug;
use std::time::Duration;
use tokio::time::timeout;

/// Upper bound on how many bytes of response header we'll buffer before
/// giving up — mirrors the teacher's 16 KiB cap in `handshake.rs::header_read`,
/// applied here to the client's read of the server's response instead of the
/// server's read of the client's request.
const MAX_RESPONSE_HEADER_BYTES: usize = 16 * 1024;
const MAX_RESPONSE_HEADERS: usize = 64;

/// What the handshake negotiated, handed back to the client orchestrator so
/// it can surface it to the caller and feed the assembler's extension
/// handling (syntactic recognition only — see crate-level non-goals).
#[derive(Debug, Clone, Default)]
pub struct HandshakeResult {
    pub negotiated_protocol: Option<String>,
    pub negotiated_extensions: Option<Extensions>,
    pub server_headers: Vec<(String, String)>,
}

/// Advisory inputs to the handshake, all optional, mirroring §6's
/// `perform(url, transport, subprotocols, extensions, extra_headers)`.
pub struct HandshakeConfig<'a> {
    pub subprotocols: &'a [String],
    pub extensions: Option<Extensions>,
    pub extra_headers: &'a [(String, String)],
    pub timeout: Duration,
}

/// Performs the client side of the RFC 6455 Upgrade handshake over an
/// already-connected `Transport`: builds and sends the request (grounded in
/// the teacher's `request.rs::construct_http_request`), reads the response
/// headers, and validates the status, `Upgrade`/`Connection` headers, and
/// `Sec-WebSocket-Accept` value (grounded in the teacher's `utils.rs`
/// accept-key computation and `handshake.rs`'s header scanning, generalized
/// from "is this a valid upgrade request" to "is this a valid upgrade
/// response").
pub async fn perform<T: Transport>(
    transport: &T,
    url: &ParsedUrl,
    config: HandshakeConfig<'_>,
) -> Result<HandshakeResult, Error> {
    let key = generate_websocket_key();
    let request = build_request(url, &key, &config);

    debug!("sending HTTP Upgrade request to {}", url.host_header);
    timeout(config.timeout, transport.send(request.as_bytes()))
        .await
        .map_err(|_| Error::ConnectionTimeout)??;

    let header_bytes = timeout(config.timeout, read_response_headers(transport))
        .await
        .map_err(|_| Error::ConnectionTimeout)??;

    validate_response(&header_bytes, &key, config.subprotocols, config.extensions)
}

fn build_request(url: &ParsedUrl, key: &str, config: &HandshakeConfig<'_>) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        url.path, url.host_header, key,
    );

    if !config.subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            config.subprotocols.join(", ")
        ));
    }
    for (name, value) in config.extra_headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }

    // `add_extension_headers` writes the trailing `\r\n\r\n` that ends the
    // header block, matching the teacher's request-building convention.
    add_extension_headers(&mut request, config.extensions.clone());
    request
}

/// Reads from the transport until a full `\r\n\r\n`-terminated header block
/// has been accumulated. `Transport::receive` is guaranteed to return at
/// least one byte per call (end-of-stream is an error), so this loop always
/// makes progress or fails.
async fn read_response_headers<T: Transport>(transport: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    loop {
        if let Some(end) = find_header_end(&buf) {
            buf.truncate(end);
            return Ok(buf);
        }
        if buf.len() > MAX_RESPONSE_HEADER_BYTES {
            return Err(Error::HandshakeFailed(
                "response headers exceeded size limit".to_string(),
            ));
        }
        let chunk = transport.receive().await?;
        buf.extend_from_slice(&chunk);
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn validate_response(
    header_bytes: &[u8],
    key: &str,
    requested_subprotocols: &[String],
    requested_extensions: Option<Extensions>,
) -> Result<HandshakeResult, Error> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut raw_headers);

    let status = response
        .parse(header_bytes)
        .map_err(Error::from)?;
    if status.is_partial() {
        return Err(Error::HandshakeFailed(
            "incomplete HTTP response".to_string(),
        ));
    }

    if response.code != Some(101) {
        return Err(Error::HandshakeFailed(format!(
            "server responded with HTTP status {:?} instead of 101 Switching Protocols",
            response.code
        )));
    }

    let headers: Vec<(String, String)> = response
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let header = |name: &str| -> Option<&str> {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    };

    let upgrade = header("Upgrade").ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::HandshakeFailed(format!(
            "unexpected Upgrade header value: {upgrade}"
        )));
    }

    let connection = header("Connection").ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(Error::HandshakeFailed(format!(
            "unexpected Connection header value: {connection}"
        )));
    }

    let accept = header("Sec-WebSocket-Accept").ok_or(Error::NoSecWebsocketAccept)?;
    let expected = generate_websocket_accept_value(key.to_string());
    if accept != expected {
        return Err(Error::InvalidAcceptKey);
    }

    let negotiated_protocol = header("Sec-WebSocket-Protocol")
        .map(|value| value.trim().to_string())
        .filter(|negotiated| {
            requested_subprotocols.is_empty()
                || requested_subprotocols
                    .iter()
                    .any(|requested| requested.eq_ignore_ascii_case(negotiated))
        });

    let negotiated_extensions = header("Sec-WebSocket-Extensions")
        .and_then(|value| parse_extensions(value.to_string()))
        .and_then(|server_ext| merge_extensions(Some(server_ext), requested_extensions));

    Ok(HandshakeResult {
        negotiated_protocol,
        negotiated_extensions,
        server_headers: headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with_accept(key: &str) -> Vec<u8> {
        let accept = generate_websocket_accept_value(key.to_string());
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes()
    }

    #[test]
    fn accepts_a_well_formed_101_response() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let response = response_with_accept(key);
        let result = validate_response(&response, key, &[], None).unwrap();
        assert!(result.negotiated_protocol.is_none());
    }

    #[test]
    fn rejects_non_101_status() {
        let response = b"HTTP/1.1 404 Not Found\r\n\r\n".to_vec();
        assert!(validate_response(&response, "key", &[], None).is_err());
    }

    #[test]
    fn rejects_mismatched_accept_key() {
        let response = response_with_accept("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(validate_response(&response, "a-different-key", &[], None).is_err());
    }

    #[test]
    fn negotiates_a_requested_subprotocol() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = generate_websocket_accept_value(key.to_string());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\nSec-WebSocket-Protocol: chat\r\n\r\n"
        )
        .into_bytes();
        let result =
            validate_response(&response, key, &["chat".to_string()], None).unwrap();
        assert_eq!(result.negotiated_protocol, Some("chat".to_string()));
    }

    #[test]
    fn missing_upgrade_header_is_rejected() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = generate_websocket_accept_value(key.to_string());
        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        )
        .into_bytes();
        assert!(validate_response(&response, key, &[], None).is_err());
    }
}
