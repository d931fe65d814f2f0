use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadHalf};
use tokio::time::{timeout, Duration};

// A peer that declares a payload and then stalls would otherwise pin the
// receive task forever; header bytes may take arbitrarily long (idle
// connection), payload bytes may not.
const PAYLOAD_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads RFC 6455 frames off the inbound half of the transport, one per
/// call, placing the payload into a caller-supplied buffer.
pub(crate) struct FrameReader<S> {
    buf_reader: BufReader<ReadHalf<S>>,
    permessage_deflate: bool,
}

impl<S: AsyncRead> FrameReader<S> {
    pub fn new(read_half: ReadHalf<S>, permessage_deflate: bool) -> Self {
        Self {
            buf_reader: BufReader::new(read_half),
            permessage_deflate,
        }
    }

    /// Parses exactly one frame. The payload lands in `dest` starting at
    /// offset 0, already unmasked. Fails without consuming the payload if
    /// the declared length cannot fit `dest`.
    pub async fn read_frame(&mut self, dest: &mut [u8]) -> Result<Frame, Error> {
        let mut header = [0u8; 2];
        read_exact_frame(&mut self.buf_reader, &mut header).await?;

        // Byte 0: FIN bit, three reserved bits, opcode nibble.
        let final_fragment = (header[0] & 0b1000_0000) != 0;
        let rsv1 = (header[0] & 0b0100_0000) != 0;
        let rsv2 = (header[0] & 0b0010_0000) != 0;
        let rsv3 = (header[0] & 0b0001_0000) != 0;
        let opcode = OpCode::from(header[0] & 0b0000_1111)?;

        // RSV1 is the compression bit of permessage-deflate; the others are
        // unassigned and must fail the connection when they show up.
        if rsv2 || rsv3 || (rsv1 && !self.permessage_deflate) {
            return Err(Error::RSVNotZero);
        }

        // Control frames squeeze between the fragments of a data message,
        // so they can never be fragments themselves.
        if opcode.is_control() && !final_fragment {
            return Err(Error::ControlFramesFragmented);
        }

        // Byte 1: mask bit plus the 7-bit base length.
        let masked = (header[1] & 0b1000_0000) != 0;
        let mut length = (header[1] & 0b0111_1111) as usize;

        if opcode.is_control() && length > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFramePayloadSize);
        }

        // 126 and 127 escape to the 16-bit and 64-bit extended lengths.
        if length == 126 {
            let mut be_bytes = [0u8; 2];
            read_exact_frame(&mut self.buf_reader, &mut be_bytes).await?;
            length = u16::from_be_bytes(be_bytes) as usize;
        } else if length == 127 {
            let mut be_bytes = [0u8; 8];
            read_exact_frame(&mut self.buf_reader, &mut be_bytes).await?;
            let wide = u64::from_be_bytes(be_bytes);
            // The most significant bit must be zero per RFC 6455.
            if wide & (1u64 << 63) != 0 {
                return Err(Error::PayloadLengthOutOfRange);
            }
            length = usize::try_from(wide).map_err(|_| Error::PayloadLengthOutOfRange)?;
        }

        if length > dest.len() {
            return Err(Error::BufferOverflow(length, dest.len()));
        }

        let mask = if masked {
            let mut key = [0u8; 4];
            read_exact_frame(&mut self.buf_reader, &mut key).await?;
            Some(key)
        } else {
            None
        };

        timeout(
            PAYLOAD_READ_TIMEOUT,
            read_exact_frame(&mut self.buf_reader, &mut dest[..length]),
        )
        .await??;

        // Client payloads arrive XOR'd with the 4-byte key; undo it in place.
        if let Some(mask) = mask {
            for (i, byte) in dest[..length].iter_mut().enumerate() {
                *byte ^= mask[i % 4];
            }
        }

        Ok(Frame {
            final_fragment,
            opcode,
            payload_len: length,
        })
    }
}

// EOF inside a frame is a framing error, not a plain IO failure.
async fn read_exact_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).await.map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::UnexpectedEnd
        } else {
            Error::from(err)
        }
    })?;
    Ok(())
}
