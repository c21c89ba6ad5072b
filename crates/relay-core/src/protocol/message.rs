//! Message framing.
//!
//! ```text
//! call/send  [i32 len][i32 to][u8 kind][i32 msg id][i32 from][i32 service][i32 method][args...][0xFF]
//! reply      [i32 len][i32 to][u8 kind][i32 msg id][result...][0xFF]
//! exception  [i32 len][i32 to][u8 kind][i32 msg id][u8 code][string user][string detail][0xFF]
//! ```
//!
//! `len` counts the whole frame, itself and the terminator included. All
//! integers are little-endian.

use super::SEND_MESSAGE_ID;
use crate::codec::{DataBlockReader, DataBlockWriter, WireEncode, WireType};
use crate::config::RpcConfig;
use crate::{ErrorCode, MethodId, ModuleId, RelayError, Result, ServiceId};
use bytes::{BufMut, Bytes, BytesMut};

const PREFIX_LEN: usize = 4 + 4 + 1;
const INVOKE_HEADER_LEN: usize = PREFIX_LEN + 4 * 4;
const REPLY_HEADER_LEN: usize = PREFIX_LEN + 4;

/// Kind byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Reply,
    Send,
    Call,
    Exception,
}

impl MessageKind {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageKind::Reply => 0,
            MessageKind::Send => 1,
            MessageKind::Call => 2,
            MessageKind::Exception => 3,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(MessageKind::Reply),
            1 => Some(MessageKind::Send),
            2 => Some(MessageKind::Call),
            3 => Some(MessageKind::Exception),
            _ => None,
        }
    }
}

/// Routing fields of a Call or Send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeHeader {
    pub message_id: i32,
    pub from: ModuleId,
    pub service: ServiceId,
    pub method: MethodId,
}

/// A decoded frame.
#[derive(Debug)]
pub struct Frame {
    pub destination: ModuleId,
    pub message: Message,
}

#[derive(Debug)]
pub enum Message {
    Invoke {
        kind: MessageKind,
        header: InvokeHeader,
        args: DataBlockReader,
    },
    Reply {
        message_id: i32,
        result: DataBlockReader,
    },
    Exception {
        message_id: i32,
        error: RelayError,
    },
}

struct FrameBuilder {
    buf: BytesMut,
}

impl FrameBuilder {
    fn new(to: ModuleId, kind: MessageKind, capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(capacity + 1);
        buf.put_i32_le(0);
        buf.put_i32_le(to);
        buf.put_u8(kind.to_byte());
        Self { buf }
    }

    fn finish(mut self) -> Result<Bytes> {
        self.buf.put_u8(WireType::TERMINATOR_BYTE);
        let len = self.buf.len();
        if len > RpcConfig::MAX_MESSAGE_SIZE {
            return Err(RelayError::new(
                ErrorCode::Communication,
                format!(
                    "message size {} exceeds maximum {}",
                    len,
                    RpcConfig::MAX_MESSAGE_SIZE
                ),
                "",
            ));
        }
        // bounded by MAX_MESSAGE_SIZE above
        let len = len as i32;
        self.buf[..4].copy_from_slice(&len.to_le_bytes());
        Ok(self.buf.freeze())
    }
}

/// Build a Call or Send frame. Send frames carry [`SEND_MESSAGE_ID`].
pub fn build_invoke(
    kind: MessageKind,
    to: ModuleId,
    header: InvokeHeader,
    args: &DataBlockWriter,
) -> Result<Bytes> {
    let message_id = match kind {
        MessageKind::Send => SEND_MESSAGE_ID,
        MessageKind::Call => header.message_id,
        other => {
            return Err(RelayError::application(
                format!("{other:?} is not a request kind"),
                "",
            ))
        }
    };
    let mut frame = FrameBuilder::new(to, kind, INVOKE_HEADER_LEN + args.len());
    frame.buf.put_i32_le(message_id);
    frame.buf.put_i32_le(header.from);
    frame.buf.put_i32_le(header.service);
    frame.buf.put_i32_le(header.method);
    frame.buf.put_slice(args.as_bytes());
    frame.finish()
}

pub fn build_reply(to: ModuleId, message_id: i32, result: &DataBlockWriter) -> Result<Bytes> {
    let mut frame = FrameBuilder::new(to, MessageKind::Reply, REPLY_HEADER_LEN + result.len());
    frame.buf.put_i32_le(message_id);
    frame.buf.put_slice(result.as_bytes());
    frame.finish()
}

pub fn build_exception(to: ModuleId, message_id: i32, error: &RelayError) -> Result<Bytes> {
    let capacity = REPLY_HEADER_LEN + 11 + error.user_message().len() + error.detail().len();
    let mut frame = FrameBuilder::new(to, MessageKind::Exception, capacity);
    frame.buf.put_i32_le(message_id);
    frame.buf.put_u8(error.code());
    error.user_message().encode(&mut frame.buf);
    error.detail().encode(&mut frame.buf);
    frame.finish()
}

/// Split a received frame into its parts.
pub fn decode_frame(bytes: Bytes) -> Result<Frame> {
    if bytes.len() < PREFIX_LEN + 1 {
        return Err(corrupt(format!("frame of {} bytes is too short", bytes.len())));
    }
    let mut prefix = DataBlockReader::new(bytes.slice(..PREFIX_LEN));
    let declared = prefix.raw_i32(WireType::Integer)?;
    if usize::try_from(declared).ok() != Some(bytes.len()) {
        return Err(corrupt(format!(
            "frame length field {} does not match {} received bytes",
            declared,
            bytes.len()
        )));
    }
    if bytes.len() > RpcConfig::MAX_MESSAGE_SIZE {
        return Err(corrupt(format!(
            "message size {} exceeds maximum {}",
            bytes.len(),
            RpcConfig::MAX_MESSAGE_SIZE
        )));
    }
    if bytes[bytes.len() - 1] != WireType::TERMINATOR_BYTE {
        return Err(corrupt("frame is missing its terminator".to_string()));
    }
    let destination = prefix.raw_i32(WireType::Integer)?;
    let kind_byte = prefix.raw_u8(WireType::Byte)?;
    let kind = MessageKind::from_byte(kind_byte)
        .ok_or_else(|| corrupt(format!("unknown message kind {kind_byte}")))?;

    let mut body = DataBlockReader::new(bytes.slice(PREFIX_LEN..bytes.len() - 1));
    let message = match kind {
        MessageKind::Send | MessageKind::Call => {
            let header = InvokeHeader {
                message_id: body.raw_i32(WireType::Integer)?,
                from: body.raw_i32(WireType::Integer)?,
                service: body.raw_i32(WireType::Integer)?,
                method: body.raw_i32(WireType::Integer)?,
            };
            Message::Invoke {
                kind,
                header,
                args: body,
            }
        }
        MessageKind::Reply => Message::Reply {
            message_id: body.raw_i32(WireType::Integer)?,
            result: body,
        },
        MessageKind::Exception => {
            let message_id = body.raw_i32(WireType::Integer)?;
            let code = body.raw_u8(WireType::Byte)?;
            let user: String = body.get()?;
            let detail: String = body.get()?;
            Message::Exception {
                message_id,
                error: RelayError::from_wire(code, user, detail),
            }
        }
    };
    Ok(Frame {
        destination,
        message,
    })
}

fn corrupt(message: String) -> RelayError {
    RelayError::new(ErrorCode::Communication, message, "")
}
