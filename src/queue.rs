use crate::error::Error;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, oneshot};

enum Command {
    Frame {
        bytes: Bytes,
        done: oneshot::Sender<Result<(), Error>>,
    },
    Shutdown {
        done: oneshot::Sender<Result<(), Error>>,
    },
}

/// Serializes every write to the transport. A single spawned task owns the
/// write half for the connection's whole lifetime and drains a
/// multi-producer queue in FIFO enqueue order, so frames from concurrent
/// senders hit the wire whole and in order.
///
/// Each job carries its own completion channel: a producer whose frame
/// fails to write gets that failure back, while the writer task keeps
/// draining the rest of the queue. Producers that give up waiting leave
/// the queue untouched; the writer task itself can never be cancelled
/// mid-frame.
#[derive(Clone)]
pub(crate) struct WriteQueue {
    commands: mpsc::UnboundedSender<Command>,
}

impl WriteQueue {
    /// Takes ownership of the transport's write half and spawns the writer
    /// task. The task exits when every queue handle is gone or after a
    /// shutdown command.
    pub fn start<S>(mut write_half: WriteHalf<S>) -> Self
    where
        S: AsyncWrite + Send + 'static,
    {
        let (commands, mut queue) = mpsc::unbounded_channel::<Command>();

        tokio::spawn(async move {
            while let Some(command) = queue.recv().await {
                match command {
                    Command::Frame { bytes, done } => {
                        let result = write_frame_bytes(&mut write_half, &bytes).await;
                        let _ = done.send(result);
                    }
                    Command::Shutdown { done } => {
                        let _ = done.send(write_half.shutdown().await.map_err(Error::from));
                        break;
                    }
                }
            }
        });

        Self { commands }
    }

    /// Enqueues one fully-encoded frame and waits for its write result.
    pub async fn send(&self, frame: Bytes) -> Result<(), Error> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Frame { bytes: frame, done })
            .map_err(|_| Error::CommunicationError)?;
        ack.await.map_err(|_| Error::CommunicationError)?
    }

    /// Shuts the transport's write side down once everything queued ahead
    /// has been written. Used on dispose, after the close frame went out.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let (done, ack) = oneshot::channel();
        self.commands
            .send(Command::Shutdown { done })
            .map_err(|_| Error::CommunicationError)?;
        ack.await.map_err(|_| Error::CommunicationError)?
    }
}

async fn write_frame_bytes<S: AsyncWrite>(
    write_half: &mut WriteHalf<S>,
    bytes: &Bytes,
) -> Result<(), Error> {
    write_half.write_all(bytes).await?;
    write_half.flush().await?;
    Ok(())
}
