//! Client-to-server message catalog

use std::collections::HashMap;

use pgbridge_common::{BridgeError, Result};

use super::codec::MessageBody;
use super::constants::{
    CANCEL_REQUEST_CODE, GSSENC_REQUEST_CODE, PROTOCOL_VERSION_3, SSL_REQUEST_CODE,
};

/// First packet on a connection, before regular framing starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupRequest {
    /// SSL negotiation sentinel; answered with a single 'N'
    SslRequest,
    /// GSSAPI encryption sentinel; also answered with 'N'
    GssEncRequest,
    /// Out-of-band cancellation for another session
    CancelRequest { process_id: i32, secret_key: i32 },
    /// Normal startup with key/value parameters
    Startup {
        protocol_version: i32,
        parameters: HashMap<String, String>,
    },
}

impl StartupRequest {
    /// Parse a startup payload (everything after the length word).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = MessageBody::new(payload);
        let code = body.get_i32()?;
        match code {
            SSL_REQUEST_CODE if body.remaining() == 0 => Ok(StartupRequest::SslRequest),
            GSSENC_REQUEST_CODE if body.remaining() == 0 => Ok(StartupRequest::GssEncRequest),
            CANCEL_REQUEST_CODE if body.remaining() == 8 => Ok(StartupRequest::CancelRequest {
                process_id: body.get_i32()?,
                secret_key: body.get_i32()?,
            }),
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => {
                Err(BridgeError::protocol("malformed negotiation packet"))
            }
            version if version >> 16 == PROTOCOL_VERSION_3 >> 16 => {
                let mut parameters = HashMap::new();
                while body.remaining() > 0 {
                    let name = body.get_cstring()?;
                    if name.is_empty() {
                        break;
                    }
                    let value = body.get_cstring()?;
                    parameters.insert(name, value);
                }
                Ok(StartupRequest::Startup {
                    protocol_version: version,
                    parameters,
                })
            }
            other => Err(BridgeError::protocol(format!(
                "unsupported protocol version {}.{}",
                other >> 16,
                other & 0xffff
            ))),
        }
    }
}

/// What a Describe or Close refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Statement,
    Portal,
}

impl TargetKind {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            b'S' => Ok(TargetKind::Statement),
            b'P' => Ok(TargetKind::Portal),
            other => Err(BridgeError::protocol(format!(
                "invalid describe/close target '{}'",
                other as char
            ))),
        }
    }
}

/// Every regular message a client can send after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    Query(String),
    Parse {
        name: String,
        sql: String,
        param_types: Vec<u32>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    },
    Describe {
        kind: TargetKind,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Close {
        kind: TargetKind,
        name: String,
    },
    Sync,
    Flush,
    Password(String),
    FunctionCall,
    Terminate,
}

impl FrontendMessage {
    /// Parse a framed message from its id byte and payload.
    pub fn parse(id: u8, payload: &[u8]) -> Result<Self> {
        let mut body = MessageBody::new(payload);
        match id {
            b'Q' => Ok(FrontendMessage::Query(body.get_cstring()?)),
            b'P' => {
                let name = body.get_cstring()?;
                let sql = body.get_cstring()?;
                let count = body.get_i16()?;
                if count < 0 {
                    return Err(BridgeError::protocol("negative parameter type count"));
                }
                let mut param_types = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    param_types.push(body.get_i32()? as u32);
                }
                Ok(FrontendMessage::Parse { name, sql, param_types })
            }
            b'B' => {
                let portal = body.get_cstring()?;
                let statement = body.get_cstring()?;

                let fmt_count = body.get_i16()?;
                if fmt_count < 0 {
                    return Err(BridgeError::protocol("negative parameter format count"));
                }
                let mut param_formats = Vec::with_capacity(fmt_count as usize);
                for _ in 0..fmt_count {
                    param_formats.push(body.get_i16()?);
                }

                let value_count = body.get_i16()?;
                if value_count < 0 {
                    return Err(BridgeError::protocol("negative parameter value count"));
                }
                let mut param_values = Vec::with_capacity(value_count as usize);
                for _ in 0..value_count {
                    param_values.push(body.get_blob()?);
                }

                let result_count = body.get_i16()?;
                if result_count < 0 {
                    return Err(BridgeError::protocol("negative result format count"));
                }
                let mut result_formats = Vec::with_capacity(result_count as usize);
                for _ in 0..result_count {
                    result_formats.push(body.get_i16()?);
                }

                Ok(FrontendMessage::Bind {
                    portal,
                    statement,
                    param_formats,
                    param_values,
                    result_formats,
                })
            }
            b'D' => Ok(FrontendMessage::Describe {
                kind: TargetKind::from_byte(body.get_u8()?)?,
                name: body.get_cstring()?,
            }),
            b'E' => Ok(FrontendMessage::Execute {
                portal: body.get_cstring()?,
                max_rows: body.get_i32()?,
            }),
            b'C' => Ok(FrontendMessage::Close {
                kind: TargetKind::from_byte(body.get_u8()?)?,
                name: body.get_cstring()?,
            }),
            b'S' => Ok(FrontendMessage::Sync),
            b'H' => Ok(FrontendMessage::Flush),
            b'p' => Ok(FrontendMessage::Password(body.get_cstring()?)),
            b'F' => Ok(FrontendMessage::FunctionCall),
            b'X' => Ok(FrontendMessage::Terminate),
            other => Err(BridgeError::protocol(format!(
                "unknown message id 0x{other:02x}"
            ))),
        }
    }

    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Password(_) => "Password",
            FrontendMessage::FunctionCall => "FunctionCall",
            FrontendMessage::Terminate => "Terminate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg_wire::protocol::codec::put_cstring;

    #[test]
    fn test_parse_startup_packet() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&PROTOCOL_VERSION_3.to_be_bytes());
        put_cstring(&mut payload, "user");
        put_cstring(&mut payload, "foo");
        put_cstring(&mut payload, "database");
        put_cstring(&mut payload, "bar");
        payload.push(0);

        match StartupRequest::parse(&payload).unwrap() {
            StartupRequest::Startup { protocol_version, parameters } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION_3);
                assert_eq!(parameters["user"], "foo");
                assert_eq!(parameters["database"], "bar");
            }
            other => panic!("expected Startup, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ssl_and_cancel_requests() {
        let ssl = SSL_REQUEST_CODE.to_be_bytes();
        assert_eq!(StartupRequest::parse(&ssl).unwrap(), StartupRequest::SslRequest);

        let mut cancel = Vec::new();
        cancel.extend_from_slice(&CANCEL_REQUEST_CODE.to_be_bytes());
        cancel.extend_from_slice(&42i32.to_be_bytes());
        cancel.extend_from_slice(&7i32.to_be_bytes());
        assert_eq!(
            StartupRequest::parse(&cancel).unwrap(),
            StartupRequest::CancelRequest { process_id: 42, secret_key: 7 }
        );
    }

    #[test]
    fn test_parse_rejects_protocol_2() {
        let v2 = (2i32 << 16).to_be_bytes();
        assert!(StartupRequest::parse(&v2).is_err());
    }

    #[test]
    fn test_parse_message() {
        let mut payload = Vec::new();
        put_cstring(&mut payload, "s1");
        put_cstring(&mut payload, "SELECT $1");
        payload.extend_from_slice(&1i16.to_be_bytes());
        payload.extend_from_slice(&23i32.to_be_bytes());

        assert_eq!(
            FrontendMessage::parse(b'P', &payload).unwrap(),
            FrontendMessage::Parse {
                name: "s1".into(),
                sql: "SELECT $1".into(),
                param_types: vec![23],
            }
        );
    }

    #[test]
    fn test_bind_message_with_null_parameter() {
        let mut payload = Vec::new();
        put_cstring(&mut payload, "p1");
        put_cstring(&mut payload, "s1");
        payload.extend_from_slice(&1i16.to_be_bytes()); // one format code
        payload.extend_from_slice(&0i16.to_be_bytes());
        payload.extend_from_slice(&2i16.to_be_bytes()); // two values
        payload.extend_from_slice(&2i32.to_be_bytes());
        payload.extend_from_slice(b"42");
        payload.extend_from_slice(&(-1i32).to_be_bytes()); // NULL
        payload.extend_from_slice(&0i16.to_be_bytes()); // no result formats

        match FrontendMessage::parse(b'B', &payload).unwrap() {
            FrontendMessage::Bind { portal, statement, param_values, result_formats, .. } => {
                assert_eq!(portal, "p1");
                assert_eq!(statement, "s1");
                assert_eq!(param_values, vec![Some(b"42".to_vec()), None]);
                assert!(result_formats.is_empty());
            }
            other => panic!("expected Bind, got {other:?}"),
        }
    }

    #[test]
    fn test_execute_and_close() {
        let mut payload = Vec::new();
        put_cstring(&mut payload, "p1");
        payload.extend_from_slice(&50i32.to_be_bytes());
        assert_eq!(
            FrontendMessage::parse(b'E', &payload).unwrap(),
            FrontendMessage::Execute { portal: "p1".into(), max_rows: 50 }
        );

        let mut payload = vec![b'S'];
        put_cstring(&mut payload, "s1");
        assert_eq!(
            FrontendMessage::parse(b'C', &payload).unwrap(),
            FrontendMessage::Close { kind: TargetKind::Statement, name: "s1".into() }
        );
    }

    #[test]
    fn test_unknown_id_is_protocol_error() {
        assert!(FrontendMessage::parse(b'z', &[]).is_err());
    }
}
