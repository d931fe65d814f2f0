use crate::frame::{OpCode, Role};
use crate::queue::WriteQueue;
use crate::write::encode_frame;
use bytes::BytesMut;
use log::debug;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub type PongObserver = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Pong side of the keep-alive exchange: holds the single observer that
/// gets the payload of every pong the receive loop sees.
pub(crate) struct KeepAlive {
    observer: Mutex<Option<PongObserver>>,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self {
            observer: Mutex::new(None),
        }
    }

    pub fn set_observer(&self, observer: PongObserver) {
        *self.observer.lock() = Some(observer);
    }

    /// Called synchronously from the receive loop with the pong payload
    /// slice, exactly the bytes the peer echoed back.
    pub fn pong_received(&self, payload: &[u8]) {
        let observer = self.observer.lock();
        if let Some(callback) = observer.as_ref() {
            callback(payload);
        }
    }
}

/// Spawns the ping task. Ticks at `period`, sending a ping whose payload is
/// a growing counter, and stops when the connection's reading token fires
/// or the connection leaves the open state.
pub(crate) fn start<F>(
    period: Duration,
    role: Role,
    queue: WriteQueue,
    token: CancellationToken,
    is_open: F,
) where
    F: Fn() -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval fires immediately; swallow that so the first ping
        // lands one full period after the connection opens.
        ticker.tick().await;

        let mut counter: u64 = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if !is_open() {
                        break;
                    }
                    counter += 1;
                    let mut scratch = BytesMut::with_capacity(16);
                    encode_frame(OpCode::Ping, &counter.to_be_bytes(), true, role, &mut scratch);
                    debug!("sending keep-alive ping {counter}");
                    if queue.send(scratch.freeze()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}
