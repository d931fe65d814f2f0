use crate::close::{decode_close_payload, encode_close_payload, CloseCode};
use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::extensions::parse_extensions;
use crate::frame::{OpCode, Role, MAX_CONTROL_PAYLOAD};
use crate::message::{MessageKind, Received};
use crate::ping::{self, KeepAlive};
use crate::pool::{BufferPool, HeapBufferPool};
use crate::queue::WriteQueue;
use crate::read::FrameReader;
use crate::write::encode_frame;
use bytes::Bytes;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// Bound on the best-effort close frame emitted before a receive failure
// surfaces to the caller.
const AUTO_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);
// Dispose waits a little longer; it is the last chance to tell the peer.
const DISPOSE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// Worst-case frame header: two base bytes, 64-bit length, 4-byte mask key.
const MAX_HEADER_LEN: usize = 14;

/// Lifecycle of a connection. The state only moves forward; `Closed` and
/// `Aborted` are terminal and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    CloseSent,
    CloseReceived,
    Closed,
    Aborted,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Aborted)
    }
}

struct StatusCell {
    state: ConnectionState,
    close_status: Option<CloseCode>,
    close_reason: Option<String>,
}

struct Shared {
    status: Mutex<StatusCell>,
    // Cancelled on every terminal transition; stops the keep-alive task and
    // any pending read.
    reading: CancellationToken,
}

struct ReceiveHalf<S> {
    frames: FrameReader<S>,
    // Message type the in-progress fragmented message started with; labels
    // the Continue frames that follow it.
    continuation_kind: MessageKind,
}

/// One WebSocket endpoint over an established duplex byte stream, client or
/// server side. Owns the transport exclusively: reads happen through
/// [`WebSocket::receive`], writes go through the internal write queue so
/// concurrent senders never interleave bytes on the wire.
pub struct WebSocket<S> {
    id: Uuid,
    role: Role,
    timestamp: OffsetDateTime,
    keep_alive_interval: Duration,
    include_error_in_close_reason: bool,
    default_buffer_length: usize,
    sub_protocol: Option<String>,
    uri_path: String,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    permessage_deflate: bool,
    pool: Arc<dyn BufferPool>,
    shared: Arc<Shared>,
    queue: WriteQueue,
    keepalive: Arc<KeepAlive>,
    receiver: AsyncMutex<ReceiveHalf<S>>,
    // Set after a data send with more fragments to come; the next data send
    // then uses the Continue opcode.
    sending_continuation: AtomicBool,
    disposed: AtomicBool,
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> WebSocket<S> {
    /// Wraps an already-upgraded stream. Must run inside a tokio runtime,
    /// since a non-zero keep-alive interval spawns the ping task here.
    pub fn new(stream: S, role: Role, config: WebSocketConfig) -> Self {
        Self::with_pool(stream, role, config, Arc::new(HeapBufferPool))
    }

    pub fn with_pool(
        stream: S,
        role: Role,
        config: WebSocketConfig,
        pool: Arc<dyn BufferPool>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let id = generate_connection_id();

        let permessage_deflate = config
            .negotiated_extensions
            .as_deref()
            .and_then(parse_extensions)
            .map(|extensions| extensions.permessage_deflate)
            .unwrap_or(false);
        if permessage_deflate {
            info!("connection {id}: permessage-deflate negotiated, frames stay uncompressed until the extension is implemented");
        } else {
            debug!("connection {id}: no message compression negotiated");
        }

        let shared = Arc::new(Shared {
            status: Mutex::new(StatusCell {
                state: ConnectionState::Open,
                close_status: None,
                close_reason: None,
            }),
            reading: CancellationToken::new(),
        });
        let queue = WriteQueue::start(write_half);
        let keepalive = Arc::new(KeepAlive::new());

        if config.keep_alive_interval.is_zero() {
            debug!("connection {id}: keep-alive disabled, interval is zero");
        } else {
            let status = shared.clone();
            ping::start(
                config.keep_alive_interval,
                role,
                queue.clone(),
                shared.reading.child_token(),
                move || status.status.lock().state == ConnectionState::Open,
            );
        }

        debug!(
            "connection {id} opened as {role:?} for {path}",
            path = config.uri_path
        );

        Self {
            id,
            role,
            timestamp: OffsetDateTime::now_utc(),
            keep_alive_interval: config.keep_alive_interval,
            include_error_in_close_reason: config.include_error_in_close_reason,
            default_buffer_length: config.default_buffer_length,
            sub_protocol: config.sub_protocol,
            uri_path: config.uri_path,
            local_addr: config.local_addr,
            remote_addr: config.remote_addr,
            permessage_deflate,
            pool,
            shared,
            queue,
            keepalive,
            receiver: AsyncMutex::new(ReceiveHalf {
                frames: FrameReader::new(read_half, permessage_deflate),
                continuation_kind: MessageKind::Binary,
            }),
            sending_continuation: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Reads frames until one must be reported to the caller. Data frames
    /// come straight back; pings are answered and pongs relayed to the
    /// keep-alive observer without ever surfacing; a close frame completes
    /// or answers the close handshake and comes back as `MessageKind::Close`.
    ///
    /// Any failure that may have corrupted the inbound stream sends a
    /// best-effort close frame and leaves the connection in a terminal
    /// state before the error reaches the caller.
    pub async fn receive(
        &self,
        buffer: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<Received, Error> {
        {
            let status = self.shared.status.lock();
            if status.state.is_terminal() {
                return Err(Error::InvalidState(status.state));
            }
        }

        let result = {
            let mut receiver = self.receiver.lock().await;
            tokio::select! {
                biased;
                received = self.receive_frames(&mut receiver, buffer) => received,
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = self.shared.reading.cancelled() => Err(Error::Cancelled),
            }
        };

        match result {
            Ok(received) => {
                if received.kind == MessageKind::Close {
                    // Terminal transition; stop the keep-alive task and any
                    // future reads.
                    self.shared.reading.cancel();
                }
                Ok(received)
            }
            Err(err) => {
                self.fail_receive(&err).await;
                Err(err)
            }
        }
    }

    async fn receive_frames(
        &self,
        receiver: &mut ReceiveHalf<S>,
        buffer: &mut [u8],
    ) -> Result<Received, Error> {
        loop {
            let frame = receiver.frames.read_frame(buffer).await?;
            debug!(
                "connection {}: received frame {:?}, fin {}, {} byte payload",
                self.id, frame.opcode, frame.final_fragment, frame.payload_len
            );

            match frame.opcode {
                OpCode::Text | OpCode::Binary => {
                    let kind = if frame.opcode == OpCode::Text {
                        MessageKind::Text
                    } else {
                        MessageKind::Binary
                    };
                    if !frame.final_fragment {
                        receiver.continuation_kind = kind;
                    }
                    return Ok(Received {
                        count: frame.payload_len,
                        kind,
                        end_of_message: frame.final_fragment,
                        close_status: None,
                        close_reason: None,
                    });
                }
                OpCode::Continue => {
                    return Ok(Received {
                        count: frame.payload_len,
                        kind: receiver.continuation_kind,
                        end_of_message: frame.final_fragment,
                        close_status: None,
                        close_reason: None,
                    });
                }
                OpCode::Ping => {
                    self.send_pong(&buffer[..frame.payload_len]).await?;
                }
                OpCode::Pong => {
                    self.keepalive.pong_received(&buffer[..frame.payload_len]);
                }
                OpCode::Close => {
                    return self
                        .respond_to_close_frame(&buffer[..frame.payload_len])
                        .await;
                }
            }
        }
    }

    async fn respond_to_close_frame(&self, payload: &[u8]) -> Result<Received, Error> {
        let (code, reason) = decode_close_payload(payload);

        let previous = {
            let mut status = self.shared.status.lock();
            let previous = status.state;
            status.close_status = Some(code);
            status.close_reason = Some(reason.clone());
            match previous {
                ConnectionState::CloseSent => status.state = ConnectionState::Closed,
                ConnectionState::Open => status.state = ConnectionState::CloseReceived,
                _ => {}
            }
            previous
        };

        match previous {
            ConnectionState::CloseSent => {
                info!(
                    "connection {}: close handshake complete, {code:?} {reason:?}",
                    self.id
                );
            }
            ConnectionState::Open => {
                info!(
                    "connection {}: responding to close handshake, {code:?} {reason:?}",
                    self.id
                );
                // The peer's payload goes back verbatim.
                let frame = self.encode_control(OpCode::Close, payload)?;
                self.queue.send(frame).await?;
                self.shared.status.lock().state = ConnectionState::Closed;
            }
            state => {
                warn!(
                    "connection {}: close frame received in unexpected state {state:?}",
                    self.id
                );
            }
        }

        Ok(Received {
            count: payload.len(),
            kind: MessageKind::Close,
            end_of_message: true,
            close_status: Some(code),
            close_reason: Some(reason),
        })
    }

    // Receive-path failure: tell the peer within a bounded time, then make
    // sure the connection really is terminal before the caller sees the
    // original error.
    async fn fail_receive(&self, err: &Error) {
        self.close_output_timeout(err.close_code(), err.close_reason(), err)
            .await;
        {
            let mut status = self.shared.status.lock();
            if !status.state.is_terminal() {
                status.state = ConnectionState::Closed;
            }
        }
        self.shared.reading.cancel();
    }

    /// Sends one data frame. The first frame of a fragmented message uses
    /// the Text or Binary opcode, every later fragment the Continue opcode,
    /// tracked here so callers just keep passing the message type.
    pub async fn send(
        &self,
        buffer: &[u8],
        kind: MessageKind,
        end_of_message: bool,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        if kind == MessageKind::Close {
            return Err(Error::CloseViaSend);
        }
        {
            let status = self.shared.status.lock();
            if status.state != ConnectionState::Open {
                return Err(Error::InvalidState(status.state));
            }
        }

        let opcode = if self.sending_continuation.load(Ordering::Acquire) {
            OpCode::Continue
        } else if kind == MessageKind::Text {
            OpCode::Text
        } else {
            OpCode::Binary
        };

        debug!(
            "connection {}: sending frame {opcode:?}, fin {end_of_message}, {} byte payload",
            self.id,
            buffer.len()
        );
        let mut scratch = self.pool.acquire(buffer.len() + MAX_HEADER_LEN);
        encode_frame(opcode, buffer, end_of_message, self.role, &mut scratch);

        tokio::select! {
            result = self.queue.send(scratch.freeze()) => result?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        }

        // Only data sends touch the flag; control frames in between leave
        // the fragment sequence alone.
        self.sending_continuation
            .store(!end_of_message, Ordering::Release);
        Ok(())
    }

    /// Sends a ping. Payloads over 125 bytes never fit a control frame and
    /// are rejected outright.
    pub async fn send_ping(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        {
            let status = self.shared.status.lock();
            if status.state != ConnectionState::Open {
                return Err(Error::InvalidState(status.state));
            }
        }
        debug!(
            "connection {}: sending frame Ping, {} byte payload",
            self.id,
            payload.len()
        );
        let frame = self.encode_control(OpCode::Ping, payload)?;
        tokio::select! {
            result = self.queue.send(frame) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn send_pong(&self, payload: &[u8]) -> Result<(), Error> {
        if self.shared.status.lock().state != ConnectionState::Open {
            return Ok(());
        }
        debug!(
            "connection {}: sending frame Pong, {} byte payload",
            self.id,
            payload.len()
        );
        let frame = self.encode_control(OpCode::Pong, payload)?;
        self.queue.send(frame).await
    }

    /// Polite close: sends a close frame and moves to `CloseSent`. The
    /// handshake finishes when [`WebSocket::receive`] picks up the peer's
    /// reply.
    pub async fn close(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        {
            let mut status = self.shared.status.lock();
            if status.state != ConnectionState::Open {
                warn!(
                    "connection {}: invalid state {:?} before close",
                    self.id, status.state
                );
                return Err(Error::InvalidState(status.state));
            }
            status.state = ConnectionState::CloseSent;
        }

        info!(
            "connection {}: close handshake started, {code:?} {reason:?}",
            self.id
        );
        let payload = encode_close_payload(code, reason);
        let frame = self.encode_control(OpCode::Close, &payload)?;
        tokio::select! {
            result = self.queue.send(frame) => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Fire-and-forget close: no handshake, the connection is done the
    /// moment this is called. The state flips to `Closed` before the frame
    /// is written so a failed write cannot strand it half-open.
    pub async fn close_output(
        &self,
        code: CloseCode,
        reason: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        {
            let mut status = self.shared.status.lock();
            if status.state != ConnectionState::Open {
                warn!(
                    "connection {}: invalid state {:?} before close output",
                    self.id, status.state
                );
                return Err(Error::InvalidState(status.state));
            }
            status.state = ConnectionState::Closed;
            status.close_status = Some(code);
            status.close_reason = Some(reason.to_string());
        }

        info!(
            "connection {}: closing output without a handshake, {code:?} {reason:?}",
            self.id
        );
        let payload = encode_close_payload(code, reason);
        let result = match self.encode_control(OpCode::Close, &payload) {
            Ok(frame) => {
                tokio::select! {
                    result = self.queue.send(frame) => result,
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            }
            Err(err) => Err(err),
        };

        self.shared.reading.cancel();
        result
    }

    // Bounded close_output used on receive-path failures. Secondary
    // failures are logged and swallowed; the primary failure is what the
    // caller gets.
    async fn close_output_timeout(&self, code: CloseCode, reason: &str, cause: &Error) {
        info!(
            "connection {}: auto-closing output with {code:?} after: {cause}",
            self.id
        );

        let mut full_reason = reason.to_string();
        if self.include_error_in_close_reason {
            full_reason.push_str("\n\n");
            full_reason.push_str(&cause.to_string());
        }

        let attempt = timeout(
            AUTO_CLOSE_TIMEOUT,
            self.close_output(code, &full_reason, &CancellationToken::new()),
        )
        .await;
        match attempt {
            Ok(Ok(())) => {}
            // Already closing elsewhere; close_output logged it.
            Ok(Err(Error::InvalidState(_))) => {}
            Ok(Err(secondary)) => {
                error!(
                    "connection {}: auto-close failed: {secondary} (original failure: {cause})",
                    self.id
                );
            }
            Err(_) => {
                warn!(
                    "connection {}: auto-close timed out after {AUTO_CLOSE_TIMEOUT:?} (original failure: {cause})",
                    self.id
                );
            }
        }
    }

    /// Tears the connection down with no close frame at all. The peer finds
    /// out when the transport drops.
    pub fn abort(&self) {
        debug!("connection {}: aborted", self.id);
        {
            let mut status = self.shared.status.lock();
            if !status.state.is_terminal() {
                status.state = ConnectionState::Aborted;
            }
        }
        self.shared.reading.cancel();
    }

    /// Idempotent teardown. A still-open connection gets a bounded
    /// close frame first, then the reading token fires and the transport's
    /// write side shuts down.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("connection {}: disposing", self.id);

        let open = self.shared.status.lock().state == ConnectionState::Open;
        if open {
            let attempt = timeout(
                DISPOSE_CLOSE_TIMEOUT,
                self.close_output(
                    CloseCode::EndpointUnavailable,
                    "connection disposed",
                    &CancellationToken::new(),
                ),
            )
            .await;
            match attempt {
                Ok(Ok(())) => {}
                Ok(Err(Error::InvalidState(_))) => {}
                Ok(Err(err)) => {
                    error!("connection {}: dispose close failed: {err}", self.id);
                }
                Err(_) => {
                    warn!(
                        "connection {}: dispose close timed out after {DISPOSE_CLOSE_TIMEOUT:?}",
                        self.id
                    );
                }
            }
        }

        {
            let mut status = self.shared.status.lock();
            if !status.state.is_terminal() {
                status.state = ConnectionState::Closed;
            }
        }
        self.shared.reading.cancel();

        if let Err(err) = self.queue.shutdown().await {
            error!("connection {}: dispose transport shutdown failed: {err}", self.id);
        }
    }

    fn encode_control(&self, opcode: OpCode, payload: &[u8]) -> Result<Bytes, Error> {
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFramePayloadSize);
        }
        let mut scratch = self.pool.acquire(payload.len() + MAX_HEADER_LEN);
        encode_frame(opcode, payload, true, self.role, &mut scratch);
        Ok(scratch.freeze())
    }

    /// Registers the observer that receives every pong payload. One
    /// observer per connection; registering again replaces it.
    pub fn on_pong(&self, observer: impl Fn(&[u8]) + Send + Sync + 'static) {
        self.keepalive.set_observer(Box::new(observer));
    }
}

impl<S> WebSocket<S> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_client(&self) -> bool {
        self.role.is_client()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    /// Status the close handshake concluded with, or the code an automatic
    /// close went out with. `None` while the connection is live.
    pub fn close_status(&self) -> Option<CloseCode> {
        self.shared.status.lock().close_status
    }

    pub fn close_status_description(&self) -> Option<String> {
        self.shared.status.lock().close_reason.clone()
    }

    pub fn sub_protocol(&self) -> Option<&str> {
        self.sub_protocol.as_deref()
    }

    pub fn keep_alive_interval(&self) -> Duration {
        self.keep_alive_interval
    }

    pub fn default_buffer_length(&self) -> usize {
        self.default_buffer_length
    }

    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        self.timestamp
    }

    pub fn uri_path(&self) -> &str {
        &self.uri_path
    }

    pub fn permessage_deflate(&self) -> bool {
        self.permessage_deflate
    }
}

impl<S> Drop for WebSocket<S> {
    fn drop(&mut self) {
        // Deterministic teardown: stops the keep-alive task and unblocks
        // any pending read even when dispose was never called.
        self.shared.reading.cancel();
    }
}

// Identity is an opaque 128-bit value, minted once and never reused.
fn generate_connection_id() -> Uuid {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    Uuid::new_v8(rng.random::<[u8; 16]>())
}
