use crate::frame::{OpCode, Role};
use bytes::{BufMut, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Encodes exactly one frame into `out`. Fragmenting a message across
/// frames is the caller's business; this function only ever emits what it
/// was handed.
///
/// Server frames go out unmasked. Client frames get a fresh random 4-byte
/// key each time, and the key is written even when the payload is empty.
/// RSV bits stay zero; nothing this endpoint sends is compressed.
pub(crate) fn encode_frame(
    opcode: OpCode,
    payload: &[u8],
    final_fragment: bool,
    role: Role,
    out: &mut BytesMut,
) {
    // FIN in the top bit, opcode in the low nibble.
    out.put_u8((final_fragment as u8) << 7 | opcode.as_u8());

    let mask_bit: u8 = if role.is_client() { 0b1000_0000 } else { 0 };
    let payload_len = payload.len();

    // Lengths up to 125 ride in the base byte; 126 escapes to a 16-bit
    // length, 127 to a 64-bit one.
    if payload_len <= 125 {
        out.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= 65535 {
        out.put_u8(mask_bit | 126);
        out.put_u16(payload_len as u16);
    } else {
        out.put_u8(mask_bit | 127);
        out.put_u64(payload_len as u64);
    }

    if role.is_client() {
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let mask: [u8; 4] = rng.random();
        out.put_slice(&mask);
        for (i, &byte) in payload.iter().enumerate() {
            out.put_u8(byte ^ mask[i % 4]);
        }
    } else {
        out.put_slice(payload);
    }
}
