use tokio_util::codec::{Decoder, Encoder};
use bytes::{BytesMut, BufMut, Buf};
use std::io;
use std::collections::HashMap;
use super::messages::*;
use tracing::debug;

/// Upper bound on a single frontend message. Anything larger is treated as a
/// corrupt stream rather than buffered.
const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;
const MAX_STARTUP_LEN: usize = 10_000;

#[derive(Clone)]
pub struct PostgresCodec {
    state: CodecState,
}

#[derive(Debug, Clone)]
enum CodecState {
    WaitingForStartup,
    Normal,
}

impl PostgresCodec {
    pub fn new() -> Self {
        PostgresCodec {
            state: CodecState::WaitingForStartup,
        }
    }
}

impl Default for PostgresCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PostgresCodec {
    type Item = FrontendMessage;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.state {
            CodecState::WaitingForStartup => {
                if let Some(msg) = decode_startup_message(src)? {
                    self.state = CodecState::Normal;
                    Ok(Some(msg))
                } else {
                    Ok(None)
                }
            }
            CodecState::Normal => decode_normal_message(src),
        }
    }
}

impl Encoder<BackendMessage> for PostgresCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        debug!("Encoding message: {:?}", msg);
        match msg {
            BackendMessage::Authentication(auth) => encode_authentication(auth, dst),
            BackendMessage::ParameterStatus { name, value } => encode_parameter_status(&name, &value, dst),
            BackendMessage::BackendKeyData { process_id, secret_key } => encode_backend_key_data(process_id, secret_key, dst),
            BackendMessage::ReadyForQuery { status } => encode_ready_for_query(status, dst),
            BackendMessage::RowDescription(fields) => encode_row_description(fields, dst),
            BackendMessage::DataRow(values) => encode_data_row(values, dst),
            BackendMessage::CommandComplete { tag } => encode_command_complete(&tag, dst),
            BackendMessage::EmptyQueryResponse => encode_empty(b'I', dst),
            BackendMessage::ErrorResponse(err) => encode_error_response(*err, dst),
            BackendMessage::ParseComplete => encode_empty(b'1', dst),
            BackendMessage::BindComplete => encode_empty(b'2', dst),
            BackendMessage::CloseComplete => encode_empty(b'3', dst),
            BackendMessage::PortalSuspended => encode_empty(b's', dst),
            BackendMessage::NoData => encode_empty(b'n', dst),
            BackendMessage::ParameterDescription(oids) => encode_parameter_description(oids, dst)?,
        }
        Ok(())
    }
}

fn decode_startup_message(src: &mut BytesMut) -> io::Result<Option<FrontendMessage>> {
    if src.len() < 4 {
        return Ok(None);
    }

    let len = (&src[0..4]).get_i32();
    if len < 8 || len as usize > MAX_STARTUP_LEN {
        return Err(invalid_data(format!("invalid startup packet length: {len}")));
    }
    let len = len as usize;

    if src.len() < len {
        return Ok(None);
    }

    let msg_bytes = src.split_to(len);
    let mut msg_buf = &msg_bytes[4..]; // Skip length

    let protocol_version = read_i32(&mut msg_buf)?;

    match protocol_version {
        SSL_REQUEST_CODE => return Ok(Some(FrontendMessage::SslRequest)),
        GSSENC_REQUEST_CODE => return Ok(Some(FrontendMessage::GssEncRequest)),
        CANCEL_REQUEST_CODE => {
            let process_id = read_i32(&mut msg_buf)?;
            let secret_key = read_i32(&mut msg_buf)?;
            return Ok(Some(FrontendMessage::CancelRequest { process_id, secret_key }));
        }
        _ => {}
    }

    let mut parameters = HashMap::new();

    // Key/value pairs until an empty key
    loop {
        let key = read_cstring(&mut msg_buf)?;
        if key.is_empty() {
            break;
        }
        let value = read_cstring(&mut msg_buf)?;
        parameters.insert(key, value);
    }

    Ok(Some(FrontendMessage::StartupMessage(StartupMessage {
        protocol_version,
        parameters,
    })))
}

fn decode_normal_message(src: &mut BytesMut) -> io::Result<Option<FrontendMessage>> {
    if src.len() < 5 {
        return Ok(None);
    }

    let msg_type = src[0];
    let len = (&src[1..5]).get_i32();
    if len < 4 || len as usize > MAX_MESSAGE_LEN {
        return Err(invalid_data(format!("invalid message length {len} for type '{}'", msg_type as char)));
    }
    let len = len as usize;

    if src.len() < len + 1 {
        src.reserve(len + 1 - src.len());
        return Ok(None);
    }

    let msg_bytes = src.split_to(len + 1);
    let mut msg_buf = &msg_bytes[5..]; // Skip type and length

    let msg = match msg_type {
        b'Q' => FrontendMessage::Query(read_cstring(&mut msg_buf)?),
        b'p' => FrontendMessage::Password(read_cstring(&mut msg_buf)?),
        b'P' => {
            let name = read_cstring(&mut msg_buf)?;
            let query = read_cstring(&mut msg_buf)?;
            let param_count = read_count(&mut msg_buf)?;
            let mut param_types = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                param_types.push(read_i32(&mut msg_buf)?);
            }
            FrontendMessage::Parse { name, query, param_types }
        }
        b'B' => {
            let portal = read_cstring(&mut msg_buf)?;
            let statement = read_cstring(&mut msg_buf)?;

            let format_count = read_count(&mut msg_buf)?;
            let mut formats = Vec::with_capacity(format_count);
            for _ in 0..format_count {
                formats.push(read_i16(&mut msg_buf)?);
            }

            let value_count = read_count(&mut msg_buf)?;
            let mut values = Vec::with_capacity(value_count);
            for _ in 0..value_count {
                let len = read_i32(&mut msg_buf)?;
                if len == -1 {
                    values.push(None);
                } else if len < 0 || len as usize > msg_buf.remaining() {
                    return Err(invalid_data(format!("invalid parameter length {len}")));
                } else {
                    let mut value = vec![0u8; len as usize];
                    msg_buf.copy_to_slice(&mut value);
                    values.push(Some(value));
                }
            }

            let result_format_count = read_count(&mut msg_buf)?;
            let mut result_formats = Vec::with_capacity(result_format_count);
            for _ in 0..result_format_count {
                result_formats.push(read_i16(&mut msg_buf)?);
            }

            FrontendMessage::Bind {
                portal,
                statement,
                formats,
                values,
                result_formats,
            }
        }
        b'E' => {
            let portal = read_cstring(&mut msg_buf)?;
            let max_rows = read_i32(&mut msg_buf)?;
            FrontendMessage::Execute { portal, max_rows }
        }
        b'S' => FrontendMessage::Sync,
        b'X' => FrontendMessage::Terminate,
        b'C' => {
            let typ = read_u8(&mut msg_buf)?;
            let name = read_cstring(&mut msg_buf)?;
            FrontendMessage::Close { typ, name }
        }
        b'D' => {
            let typ = read_u8(&mut msg_buf)?;
            let name = read_cstring(&mut msg_buf)?;
            FrontendMessage::Describe { typ, name }
        }
        b'H' => FrontendMessage::Flush,
        b'd' => FrontendMessage::CopyData,
        b'c' => FrontendMessage::CopyDone,
        b'f' => FrontendMessage::CopyFail,
        other => FrontendMessage::Unknown(other),
    };

    Ok(Some(msg))
}

fn encode_authentication(auth: AuthenticationMessage, dst: &mut BytesMut) {
    dst.put_u8(b'R');
    dst.put_i32(8); // Fixed length
    match auth {
        AuthenticationMessage::Ok => dst.put_i32(0),
        AuthenticationMessage::CleartextPassword => dst.put_i32(3),
    }
}

fn encode_parameter_status(name: &str, value: &str, dst: &mut BytesMut) {
    dst.put_u8(b'S');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    put_cstring(dst, name);
    put_cstring(dst, value);

    update_message_length(dst, len_pos);
}

fn encode_backend_key_data(process_id: i32, secret_key: i32, dst: &mut BytesMut) {
    dst.put_u8(b'K');
    dst.put_i32(12); // Fixed length
    dst.put_i32(process_id);
    dst.put_i32(secret_key);
}

fn encode_ready_for_query(status: TransactionStatus, dst: &mut BytesMut) {
    dst.put_u8(b'Z');
    dst.put_i32(5); // Fixed length
    dst.put_u8(status.as_byte());
}

fn encode_row_description(fields: Vec<FieldDescription>, dst: &mut BytesMut) {
    dst.put_u8(b'T');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    dst.put_i16(fields.len() as i16);

    for field in fields {
        put_cstring(dst, &field.name);
        dst.put_i32(field.table_oid);
        dst.put_i16(field.column_id);
        dst.put_i32(field.type_oid);
        dst.put_i16(field.type_size);
        dst.put_i32(field.type_modifier);
        dst.put_i16(field.format);
    }

    update_message_length(dst, len_pos);
}

fn encode_data_row(values: Vec<Option<Vec<u8>>>, dst: &mut BytesMut) {
    dst.put_u8(b'D');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    dst.put_i16(values.len() as i16);

    for value in values {
        match value {
            None => dst.put_i32(-1),
            Some(data) => {
                dst.put_i32(data.len() as i32);
                dst.put_slice(&data);
            }
        }
    }

    update_message_length(dst, len_pos);
}

fn encode_command_complete(tag: &str, dst: &mut BytesMut) {
    dst.put_u8(b'C');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    put_cstring(dst, tag);

    update_message_length(dst, len_pos);
}

fn encode_error_response(err: ErrorResponse, dst: &mut BytesMut) {
    dst.put_u8(b'E');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    // Required fields
    dst.put_u8(b'S');
    put_cstring(dst, &err.severity);

    dst.put_u8(b'V');
    put_cstring(dst, &err.severity);

    dst.put_u8(b'C');
    put_cstring(dst, &err.code);

    dst.put_u8(b'M');
    put_cstring(dst, &err.message);

    // Optional fields
    if let Some(ref detail) = err.detail {
        dst.put_u8(b'D');
        put_cstring(dst, detail);
    }

    if let Some(ref hint) = err.hint {
        dst.put_u8(b'H');
        put_cstring(dst, hint);
    }

    // Null terminator
    dst.put_u8(0);

    update_message_length(dst, len_pos);
}

/// Messages that carry nothing but their tag and length.
fn encode_empty(tag: u8, dst: &mut BytesMut) {
    dst.put_u8(tag);
    dst.put_i32(4); // Fixed length
}

fn encode_parameter_description(oids: Vec<i32>, dst: &mut BytesMut) -> io::Result<()> {
    // Clients read the count as unsigned 16 bits.
    let count = u16::try_from(oids.len())
        .map_err(|_| invalid_data(format!("too many parameters to describe: {}", oids.len())))?;
    dst.put_u8(b't');
    let len_pos = dst.len();
    dst.put_i32(0); // Placeholder

    dst.put_u16(count);
    for oid in oids {
        dst.put_i32(oid);
    }

    update_message_length(dst, len_pos);
    Ok(())
}

// Helper functions
fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "message body is truncated")
}

fn read_u8(buf: &mut &[u8]) -> io::Result<u8> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut &[u8]) -> io::Result<i16> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut &[u8]) -> io::Result<i32> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_i32())
}

fn read_count(buf: &mut &[u8]) -> io::Result<usize> {
    let count = read_i16(buf)?;
    if count < 0 {
        return Err(invalid_data(format!("negative element count {count}")));
    }
    Ok(count as usize)
}

fn read_cstring(buf: &mut &[u8]) -> io::Result<String> {
    let null_pos = buf.iter().position(|&b| b == 0)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Missing null terminator"))?;

    let string = String::from_utf8(buf[..null_pos].to_vec())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    *buf = &buf[null_pos + 1..];
    Ok(string)
}

fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

fn update_message_length(dst: &mut BytesMut, len_pos: usize) {
    let len = (dst.len() - len_pos) as i32;
    dst[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}
