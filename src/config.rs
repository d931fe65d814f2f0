use std::net::SocketAddr;
use std::time::Duration;

/// Per-connection settings plus the metadata the opening handshake
/// negotiated before handing the stream over.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// How often an idle connection pings the peer. Zero disables pings.
    pub keep_alive_interval: Duration,
    /// When true, automatic close frames append the failure text to the
    /// reason so the peer sees why the connection died.
    pub include_error_in_close_reason: bool,
    /// Receive buffer size hosts should allocate per `receive` call.
    pub default_buffer_length: usize,
    /// Raw negotiated `Sec-WebSocket-Extensions` header value, if any.
    pub negotiated_extensions: Option<String>,
    pub sub_protocol: Option<String>,
    pub uri_path: String,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            keep_alive_interval: Duration::from_secs(30),
            include_error_in_close_reason: false,
            default_buffer_length: 16 * 1024,
            negotiated_extensions: None,
            sub_protocol: None,
            uri_path: String::from("/"),
            local_addr: None,
            remote_addr: None,
        }
    }
}
