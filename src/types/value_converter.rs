use crate::types::type_mapper::PgType;
use crate::{OctopusError, Result};
use byteorder::{BigEndian, ByteOrder};
use rusqlite::types::Value;
use std::fmt::Write;

/// Wire format of a parameter or result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCode {
    Text,
    Binary,
}

impl FormatCode {
    pub fn from_code(code: i16) -> Result<Self> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            other => Err(OctopusError::InvalidParameter(format!(
                "unsupported format code: {other}"
            ))),
        }
    }

    pub fn code(&self) -> i16 {
        match self {
            FormatCode::Text => 0,
            FormatCode::Binary => 1,
        }
    }

    /// Expand the format codes sent in Bind to one per value: no codes means
    /// text everywhere, a single code applies to every value, otherwise the
    /// counts must match.
    pub fn resolve(codes: &[i16], count: usize) -> Result<Vec<FormatCode>> {
        match codes.len() {
            0 => Ok(vec![FormatCode::Text; count]),
            1 => Ok(vec![FormatCode::from_code(codes[0])?; count]),
            n if n == count => codes.iter().map(|c| FormatCode::from_code(*c)).collect(),
            n => Err(OctopusError::InvalidParameter(format!(
                "got {n} format codes for {count} values"
            ))),
        }
    }
}

pub struct ValueConverter;

impl ValueConverter {
    /// Encode one SQLite value as a DataRow field of the given type.
    pub fn encode(value: &Value, pg_type: PgType, format: FormatCode) -> Result<Option<Vec<u8>>> {
        if let Value::Null = value {
            return Ok(None);
        }
        let bytes = match format {
            FormatCode::Text => Self::encode_text(value, pg_type),
            FormatCode::Binary => Self::encode_binary(value, pg_type)?,
        };
        Ok(Some(bytes))
    }

    fn encode_text(value: &Value, pg_type: PgType) -> Vec<u8> {
        match (value, pg_type) {
            (Value::Integer(i), PgType::Bool) => if *i != 0 { b"t".to_vec() } else { b"f".to_vec() },
            (Value::Integer(i), _) => i.to_string().into_bytes(),
            (Value::Real(f), _) => f.to_string().into_bytes(),
            (Value::Text(s), _) => s.as_bytes().to_vec(),
            (Value::Blob(b), PgType::Bytea) | (Value::Blob(b), PgType::Unknown) => {
                let mut out = String::with_capacity(2 + b.len() * 2);
                out.push_str("\\x");
                for byte in b {
                    let _ = write!(out, "{byte:02x}");
                }
                out.into_bytes()
            }
            (Value::Blob(b), _) => b.clone(),
            (Value::Null, _) => Vec::new(),
        }
    }

    fn encode_binary(value: &Value, pg_type: PgType) -> Result<Vec<u8>> {
        match pg_type {
            PgType::Bool => Ok(vec![u8::from(Self::as_i64(value, pg_type)? != 0)]),
            PgType::Int2 => {
                let v = i16::try_from(Self::as_i64(value, pg_type)?)
                    .map_err(|_| Self::out_of_range(value, pg_type))?;
                Ok(v.to_be_bytes().to_vec())
            }
            PgType::Int4 => {
                let v = i32::try_from(Self::as_i64(value, pg_type)?)
                    .map_err(|_| Self::out_of_range(value, pg_type))?;
                Ok(v.to_be_bytes().to_vec())
            }
            PgType::Int8 => Ok(Self::as_i64(value, pg_type)?.to_be_bytes().to_vec()),
            PgType::Float4 => Ok((Self::as_f64(value, pg_type)? as f32).to_be_bytes().to_vec()),
            PgType::Float8 => Ok(Self::as_f64(value, pg_type)?.to_be_bytes().to_vec()),
            PgType::Bytea | PgType::Text | PgType::Varchar | PgType::Unknown => Ok(match value {
                Value::Blob(b) => b.clone(),
                other => Self::encode_text(other, pg_type),
            }),
            PgType::Numeric | PgType::Date | PgType::Time | PgType::Timestamp => {
                Err(OctopusError::NotSupported(format!(
                    "binary output for type {}",
                    pg_type.name()
                )))
            }
        }
    }

    fn as_i64(value: &Value, pg_type: PgType) -> Result<i64> {
        match value {
            Value::Integer(i) => Ok(*i),
            Value::Real(f) if f.fract() == 0.0 => Ok(*f as i64),
            Value::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| Self::out_of_range(value, pg_type)),
            _ => Err(Self::out_of_range(value, pg_type)),
        }
    }

    fn as_f64(value: &Value, pg_type: PgType) -> Result<f64> {
        match value {
            Value::Integer(i) => Ok(*i as f64),
            Value::Real(f) => Ok(*f),
            Value::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Self::out_of_range(value, pg_type)),
            _ => Err(Self::out_of_range(value, pg_type)),
        }
    }

    fn out_of_range(value: &Value, pg_type: PgType) -> OctopusError {
        OctopusError::TypeConversion(format!(
            "value {:?} cannot be represented as {}",
            value,
            pg_type.name()
        ))
    }

    /// Decode a Bind parameter into the value handed to the backend driver.
    /// `None` is SQL NULL.
    pub fn decode_param(bytes: Option<&[u8]>, pg_type: PgType, format: FormatCode) -> Result<Value> {
        let Some(bytes) = bytes else {
            return Ok(Value::Null);
        };
        match format {
            FormatCode::Text => Self::decode_text_param(bytes, pg_type),
            FormatCode::Binary => Self::decode_binary_param(bytes, pg_type),
        }
    }

    fn decode_text_param(bytes: &[u8], pg_type: PgType) -> Result<Value> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| OctopusError::TypeConversion(format!("invalid UTF-8 in parameter: {e}")))?;
        let invalid = || {
            OctopusError::TypeConversion(format!(
                "invalid input syntax for type {}: \"{}\"",
                pg_type.name(),
                text
            ))
        };
        match pg_type {
            PgType::Bool => match text.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(Value::Integer(1)),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(Value::Integer(0)),
                _ => Err(invalid()),
            },
            PgType::Int2 => text.trim().parse::<i16>().map(|v| Value::Integer(v.into())).map_err(|_| invalid()),
            PgType::Int4 => text.trim().parse::<i32>().map(|v| Value::Integer(v.into())).map_err(|_| invalid()),
            PgType::Int8 => text.trim().parse::<i64>().map(Value::Integer).map_err(|_| invalid()),
            PgType::Float4 | PgType::Float8 => text.trim().parse::<f64>().map(Value::Real).map_err(|_| invalid()),
            PgType::Text | PgType::Varchar | PgType::Unknown => Ok(Value::Text(text.to_string())),
            other => Err(Self::unsupported_param(other)),
        }
    }

    fn decode_binary_param(bytes: &[u8], pg_type: PgType) -> Result<Value> {
        let expect_len = |len: usize| {
            if bytes.len() == len {
                Ok(())
            } else {
                Err(OctopusError::TypeConversion(format!(
                    "incorrect binary data format for type {}: expected {} bytes, got {}",
                    pg_type.name(),
                    len,
                    bytes.len()
                )))
            }
        };
        match pg_type {
            PgType::Bool => {
                expect_len(1)?;
                Ok(Value::Integer(i64::from(bytes[0] != 0)))
            }
            PgType::Int2 => {
                expect_len(2)?;
                Ok(Value::Integer(BigEndian::read_i16(bytes).into()))
            }
            PgType::Int4 => {
                expect_len(4)?;
                Ok(Value::Integer(BigEndian::read_i32(bytes).into()))
            }
            PgType::Int8 => {
                expect_len(8)?;
                Ok(Value::Integer(BigEndian::read_i64(bytes)))
            }
            PgType::Float4 => {
                expect_len(4)?;
                Ok(Value::Real(BigEndian::read_f32(bytes).into()))
            }
            PgType::Float8 => {
                expect_len(8)?;
                Ok(Value::Real(BigEndian::read_f64(bytes)))
            }
            PgType::Text | PgType::Varchar | PgType::Unknown => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|e| OctopusError::TypeConversion(format!("invalid UTF-8 in parameter: {e}"))),
            other => Err(Self::unsupported_param(other)),
        }
    }

    fn unsupported_param(pg_type: PgType) -> OctopusError {
        OctopusError::NotSupported(format!("parameter of type {}", pg_type.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_formats() {
        assert_eq!(FormatCode::resolve(&[], 2).unwrap(), vec![FormatCode::Text; 2]);
        assert_eq!(FormatCode::resolve(&[1], 3).unwrap(), vec![FormatCode::Binary; 3]);
        assert_eq!(
            FormatCode::resolve(&[0, 1], 2).unwrap(),
            vec![FormatCode::Text, FormatCode::Binary]
        );
        assert!(FormatCode::resolve(&[0, 1], 3).is_err());
        assert!(FormatCode::resolve(&[2], 1).is_err());
    }

    #[test]
    fn test_encode_text() {
        let encoded = ValueConverter::encode(&Value::Integer(42), PgType::Int4, FormatCode::Text).unwrap();
        assert_eq!(encoded.as_deref(), Some(&b"42"[..]));
        let encoded = ValueConverter::encode(&Value::Integer(1), PgType::Bool, FormatCode::Text).unwrap();
        assert_eq!(encoded.as_deref(), Some(&b"t"[..]));
        let encoded = ValueConverter::encode(&Value::Blob(vec![0xde, 0xad]), PgType::Bytea, FormatCode::Text).unwrap();
        assert_eq!(encoded.as_deref(), Some(&b"\\xdead"[..]));
        assert_eq!(ValueConverter::encode(&Value::Null, PgType::Text, FormatCode::Text).unwrap(), None);
    }

    #[test]
    fn test_encode_binary_int4() {
        let encoded = ValueConverter::encode(&Value::Integer(7), PgType::Int4, FormatCode::Binary).unwrap();
        assert_eq!(encoded, Some(vec![0, 0, 0, 7]));
        let overflow = ValueConverter::encode(&Value::Integer(i64::MAX), PgType::Int4, FormatCode::Binary);
        assert!(matches!(overflow, Err(OctopusError::TypeConversion(_))));
    }

    #[test]
    fn test_decode_params() {
        let v = ValueConverter::decode_param(Some(b"12"), PgType::Int4, FormatCode::Text).unwrap();
        assert_eq!(v, Value::Integer(12));
        let v = ValueConverter::decode_param(Some(&[0, 0, 0, 5]), PgType::Int4, FormatCode::Binary).unwrap();
        assert_eq!(v, Value::Integer(5));
        let v = ValueConverter::decode_param(Some(b"on"), PgType::Bool, FormatCode::Text).unwrap();
        assert_eq!(v, Value::Integer(1));
        let v = ValueConverter::decode_param(None, PgType::Text, FormatCode::Text).unwrap();
        assert_eq!(v, Value::Null);
        assert!(ValueConverter::decode_param(Some(b"x"), PgType::Int8, FormatCode::Text).is_err());
        assert!(ValueConverter::decode_param(Some(&[0, 1]), PgType::Int4, FormatCode::Binary).is_err());
    }

    #[test]
    fn test_unsupported_param_type() {
        let err = ValueConverter::decode_param(Some(b"2024-01-01"), PgType::Date, FormatCode::Text).unwrap_err();
        assert!(matches!(err, OctopusError::NotSupported(_)));
    }
}
