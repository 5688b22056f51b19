use crate::compression::{Deflater, Inflater};
use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// Control frames are only allowed a payload up to and including 125 octets.
const MAX_CONTROL_PAYLOAD: usize = 125;

pub(crate) struct DecodedFrame {
    pub frame: Frame,
    /// Whether the MASK bit was set. Clients must always mask; the engine
    /// enforces that, the codec only reports it.
    pub masked: bool,
    /// Bytes left unconsumed in the input slice, for pipelined frames that
    /// arrived in the same read.
    pub remaining: usize,
}

/// Decodes one frame from the front of `input`.
///
/// `inflater` carries the negotiated permessage-deflate state; `None` means
/// the extension wasn't negotiated and any RSV1 bit is a protocol error.
/// `TooFewBytes` and `MissingBytes` mean the slice ends mid-frame and the
/// caller should read more before retrying.
pub(crate) fn decode(input: &[u8], inflater: Option<&mut Inflater>) -> Result<DecodedFrame, Error> {
    if input.len() < 2 {
        return Err(Error::TooFewBytes);
    }

    // The first bit of byte 0 tells us whether this frame is the final
    // fragment of a message; the last 4 bits carry the opcode.
    let final_fragment = (input[0] & 0b1000_0000) != 0;
    let opcode = OpCode::from(input[0] & 0b0000_1111)?;

    // RSV bits are only meaningful under a negotiated extension. RSV1 marks
    // a deflated payload; RSV2 and RSV3 have no extension here and must be
    // zero.
    let rsv1 = (input[0] & 0b0100_0000) != 0;
    let rsv2 = (input[0] & 0b0010_0000) != 0;
    let rsv3 = (input[0] & 0b0001_0000) != 0;

    if rsv2 || rsv3 || (rsv1 && inflater.is_none()) {
        return Err(Error::RsvNotZero);
    }

    // Byte 1: the mask bit, then 7 bits of payload length.
    let masked = (input[1] & 0b1000_0000) != 0;
    let mut length = (input[1] & 0b0111_1111) as usize;

    if opcode.is_control() {
        if !final_fragment {
            return Err(Error::ControlFrameFragmented);
        }
        // A raw length of 126 or 127 announces an extended length, which a
        // control frame can never legitimately use.
        if length > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFramePayloadSize);
        }
    }

    let mut offset = 2usize;
    if length == 126 {
        if input.len() < offset + 2 {
            return Err(Error::TooFewBytes);
        }
        length = u16::from_be_bytes([input[2], input[3]]) as usize;
        offset += 2;
    } else if length == 127 {
        if cfg!(not(target_pointer_width = "64")) {
            return Err(Error::Require64Bit);
        }
        if input.len() < offset + 8 {
            return Err(Error::TooFewBytes);
        }
        let mut be_bytes = [0u8; 8];
        be_bytes.copy_from_slice(&input[2..10]);
        length = usize::try_from(u64::from_be_bytes(be_bytes)).map_err(|_| Error::Require64Bit)?;
        offset += 8;
    }

    let mask = if masked {
        if input.len() < offset + 4 {
            return Err(Error::TooFewBytes);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&input[offset..offset + 4]);
        offset += 4;
        Some(key)
    } else {
        None
    };

    if input.len() < offset + length {
        return Err(Error::MissingBytes {
            expected: length,
            have: input.len() - offset,
        });
    }

    let mut payload = input[offset..offset + length].to_vec();

    // Masking is a simple XOR: byte i of the payload against byte i mod 4
    // of the key.
    if let Some(key) = mask {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    if rsv1 && !payload.is_empty() {
        if let Some(inflater) = inflater {
            payload = inflater.decompress(&payload)?;
        }
    }

    Ok(DecodedFrame {
        frame: Frame {
            final_fragment,
            opcode,
            payload,
        },
        masked,
        remaining: input.len() - offset - length,
    })
}

/// Serializes one frame. Frames from the server side are never masked.
///
/// With a deflater present the payload is compressed and RSV1 set, except
/// on an empty payload, which always goes out plain: clients reject an
/// RSV1 frame that carries no compressed block.
pub(crate) fn encode(frame: &Frame, deflater: Option<&mut Deflater>) -> Result<Vec<u8>, Error> {
    let compressed = match deflater {
        Some(deflater) if !frame.payload.is_empty() => Some(deflater.compress(&frame.payload)?),
        _ => None,
    };
    let rsv1 = compressed.is_some();
    let payload: &[u8] = compressed.as_deref().unwrap_or(&frame.payload);
    let payload_len = payload.len();

    if payload_len > 65535 && cfg!(not(target_pointer_width = "64")) {
        return Err(Error::Require64Bit);
    }

    let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
    if rsv1 {
        first_byte |= 0b0100_0000;
    }

    let mut out = Vec::with_capacity(payload_len + 10);
    out.push(first_byte);

    // Minimal length encoding: 7 bits inline, 16-bit extension up to 65535,
    // 64-bit extension beyond that.
    if payload_len <= 125 {
        out.push(payload_len as u8);
    } else if payload_len <= 65535 {
        out.push(126);
        out.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }

    out.extend_from_slice(payload);
    Ok(out)
}
