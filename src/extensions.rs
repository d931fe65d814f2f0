const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// What the opening handshake negotiated in `Sec-WebSocket-Extensions`.
/// The endpoint records the outcome but sends every frame uncompressed;
/// wiring up actual DEFLATE framing per RFC 7692 is a separate effort.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    pub permessage_deflate: bool,
    pub client_no_context_takeover: Option<bool>,
    pub server_no_context_takeover: Option<bool>,
    pub client_max_window_bits: Option<u8>,
    pub server_max_window_bits: Option<u8>,
}

/// Parses a negotiated extension header value. Returns `None` unless
/// `permessage-deflate` itself was agreed on, since the parameters mean
/// nothing without it.
pub fn parse_extensions(extensions_header_value: &str) -> Option<Extensions> {
    let mut extensions = Extensions::default();

    for extension_str in extensions_header_value.split(';') {
        let extension_str = extension_str.trim();
        if extension_str == PERMESSAGE_DEFLATE {
            extensions.permessage_deflate = true;
        } else if extension_str.starts_with(CLIENT_NO_CONTEXT_TAKEOVER) {
            extensions.client_no_context_takeover = Some(true);
        } else if extension_str.starts_with(SERVER_NO_CONTEXT_TAKEOVER) {
            extensions.server_no_context_takeover = Some(true);
        } else if extension_str.starts_with(CLIENT_MAX_WINDOW_BITS) {
            if !extension_str.contains('=') {
                extensions.client_max_window_bits = Some(15);
            } else {
                extensions.client_max_window_bits =
                    extension_str.split('=').last()?.trim().parse::<u8>().ok();
            }
        } else if extension_str.starts_with(SERVER_MAX_WINDOW_BITS) {
            if !extension_str.contains('=') {
                extensions.server_max_window_bits = Some(15);
            } else {
                extensions.server_max_window_bits =
                    extension_str.split('=').last()?.trim().parse::<u8>().ok();
            }
        }
    }

    if !extensions.permessage_deflate {
        return None;
    }

    Some(extensions)
}
