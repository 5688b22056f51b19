use crate::error::Error;
use crate::frame::{Frame, OpCode};

/// One assembled message, as handed from the assembler to the engine. The
/// callbacks receive the payload itself, so this type stays internal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Message {
    Text(String),
    Binary(Vec<u8>),
}

/// What feeding one frame produced.
pub(crate) enum Assembly {
    /// A full message, ready for dispatch.
    Complete(Message),
    /// More continuation frames are expected.
    Partial,
    /// Control frames pass through out-of-band and never touch the
    /// in-progress message.
    Close(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
}

/// Groups the frames of one logical message and enforces the framing rules
/// along the way.
pub(crate) struct MessageAssembler {
    opcode: Option<OpCode>,
    payload: Vec<u8>,
    max_message_size: usize,
}

impl MessageAssembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            opcode: None,
            payload: Vec::new(),
            max_message_size,
        }
    }

    pub fn feed(&mut self, frame: Frame) -> Result<Assembly, Error> {
        match frame.opcode {
            OpCode::Close | OpCode::Ping | OpCode::Pong => {
                if !frame.final_fragment {
                    return Err(Error::ControlFrameFragmented);
                }
                Ok(match frame.opcode {
                    OpCode::Close => Assembly::Close(frame.payload),
                    OpCode::Ping => Assembly::Ping(frame.payload),
                    _ => Assembly::Pong(frame.payload),
                })
            }
            // A fragmented message starts with a text or binary frame whose
            // FIN bit is 0; a second one before the first completes is a
            // protocol violation.
            OpCode::Text | OpCode::Binary => {
                if self.opcode.is_some() {
                    return Err(Error::FragmentedInProgress);
                }
                if frame.payload.len() > self.max_message_size {
                    return Err(Error::MessageTooLarge);
                }
                if frame.final_fragment {
                    return Ok(Assembly::Complete(into_message(frame.opcode, frame.payload)?));
                }
                self.opcode = Some(frame.opcode);
                self.payload = frame.payload;
                Ok(Assembly::Partial)
            }
            OpCode::Continue => {
                let opcode = self.opcode.ok_or(Error::InvalidContinuationFrame)?;
                if self.payload.len() + frame.payload.len() > self.max_message_size {
                    return Err(Error::MessageTooLarge);
                }
                self.payload.extend_from_slice(&frame.payload);
                if frame.final_fragment {
                    self.opcode = None;
                    let payload = std::mem::take(&mut self.payload);
                    return Ok(Assembly::Complete(into_message(opcode, payload)?));
                }
                Ok(Assembly::Partial)
            }
        }
    }
}

fn into_message(opcode: OpCode, payload: Vec<u8>) -> Result<Message, Error> {
    match opcode {
        // The text opcode MUST carry UTF-8.
        OpCode::Text => Ok(Message::Text(String::from_utf8(payload)?)),
        OpCode::Binary => Ok(Message::Binary(payload)),
        other => Err(Error::InvalidOpcode(other.as_u8())),
    }
}
