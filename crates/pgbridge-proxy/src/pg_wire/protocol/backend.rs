//! Server-to-client message catalog
//!
//! Each variant knows how to frame itself; the session writes the encoded
//! bytes through its buffered stream and flushes at protocol boundaries.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use pgbridge_common::BridgeError;

use super::codec::{frame, put_cstring};

/// Transaction state reported in ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Idle,
    InTransaction,
    Failed,
}

impl TransactionStatus {
    pub fn code(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// One column in a RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: u32,
    pub type_len: i16,
    /// 0 = text, 1 = binary
    pub format: i16,
}

/// Fields carried by an ErrorResponse. Severity is always ERROR; detail and
/// hint are optional extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFields {
    pub sqlstate: &'static str,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl From<&BridgeError> for ErrorFields {
    fn from(err: &BridgeError) -> Self {
        Self {
            sqlstate: err.sqlstate(),
            message: err.to_string(),
            detail: None,
            hint: None,
        }
    }
}

/// Every message the proxy sends after startup.
#[derive(Debug)]
pub enum BackendMessage {
    AuthenticationOk,
    AuthenticationCleartextPassword,
    ParameterStatus { name: String, value: String },
    BackendKeyData { process_id: i32, secret_key: i32 },
    ReadyForQuery(TransactionStatus),
    RowDescription(Vec<FieldDescription>),
    DataRow(Vec<Option<Vec<u8>>>),
    CommandComplete(String),
    EmptyQueryResponse,
    ErrorResponse(ErrorFields),
    ParseComplete,
    BindComplete,
    CloseComplete,
    ParameterDescription(Vec<u32>),
    NoData,
    PortalSuspended,
}

impl BackendMessage {
    /// Wire id byte for this message kind.
    pub fn id(&self) -> u8 {
        match self {
            BackendMessage::AuthenticationOk
            | BackendMessage::AuthenticationCleartextPassword => b'R',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ReadyForQuery(_) => b'Z',
            BackendMessage::RowDescription(_) => b'T',
            BackendMessage::DataRow(_) => b'D',
            BackendMessage::CommandComplete(_) => b'C',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ErrorResponse(_) => b'E',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::ParameterDescription(_) => b't',
            BackendMessage::NoData => b'n',
            BackendMessage::PortalSuspended => b's',
        }
    }

    /// Encode the message including id byte and length word.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        match self {
            BackendMessage::AuthenticationOk => {
                payload.extend_from_slice(&0i32.to_be_bytes());
            }
            BackendMessage::AuthenticationCleartextPassword => {
                payload.extend_from_slice(&3i32.to_be_bytes());
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(&mut payload, name);
                put_cstring(&mut payload, value);
            }
            BackendMessage::BackendKeyData { process_id, secret_key } => {
                payload.extend_from_slice(&process_id.to_be_bytes());
                payload.extend_from_slice(&secret_key.to_be_bytes());
            }
            BackendMessage::ReadyForQuery(status) => {
                payload.push(status.code());
            }
            BackendMessage::RowDescription(fields) => {
                payload.extend_from_slice(&(fields.len() as i16).to_be_bytes());
                for field in fields {
                    put_cstring(&mut payload, &field.name);
                    payload.extend_from_slice(&0i32.to_be_bytes()); // table oid
                    payload.extend_from_slice(&0i16.to_be_bytes()); // column attr
                    payload.extend_from_slice(&field.type_oid.to_be_bytes());
                    payload.extend_from_slice(&field.type_len.to_be_bytes());
                    payload.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
                    payload.extend_from_slice(&field.format.to_be_bytes());
                }
            }
            BackendMessage::DataRow(cells) => {
                payload.extend_from_slice(&(cells.len() as i16).to_be_bytes());
                for cell in cells {
                    match cell {
                        None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
                        Some(bytes) => {
                            payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                            payload.extend_from_slice(bytes);
                        }
                    }
                }
            }
            BackendMessage::CommandComplete(tag) => {
                put_cstring(&mut payload, tag);
            }
            BackendMessage::EmptyQueryResponse => {}
            BackendMessage::ErrorResponse(fields) => {
                payload.push(b'S');
                put_cstring(&mut payload, "ERROR");
                payload.push(b'C');
                put_cstring(&mut payload, fields.sqlstate);
                payload.push(b'M');
                put_cstring(&mut payload, &fields.message);
                if let Some(detail) = &fields.detail {
                    payload.push(b'D');
                    put_cstring(&mut payload, detail);
                }
                if let Some(hint) = &fields.hint {
                    payload.push(b'H');
                    put_cstring(&mut payload, hint);
                }
                payload.push(0);
            }
            BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::PortalSuspended => {}
            BackendMessage::ParameterDescription(oids) => {
                payload.extend_from_slice(&(oids.len() as i16).to_be_bytes());
                for oid in oids {
                    payload.extend_from_slice(&oid.to_be_bytes());
                }
            }
        }
        frame(self.id(), &payload)
    }

    /// Write the encoded message without flushing.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&self.encode()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_size_messages() {
        assert_eq!(BackendMessage::AuthenticationOk.encode(), vec![b'R', 0, 0, 0, 8, 0, 0, 0, 0]);
        assert_eq!(BackendMessage::ParseComplete.encode(), vec![b'1', 0, 0, 0, 4]);
        assert_eq!(BackendMessage::PortalSuspended.encode(), vec![b's', 0, 0, 0, 4]);
        assert_eq!(
            BackendMessage::ReadyForQuery(TransactionStatus::Idle).encode(),
            vec![b'Z', 0, 0, 0, 5, b'I']
        );
    }

    #[test]
    fn test_command_complete() {
        let encoded = BackendMessage::CommandComplete("SELECT 1".into()).encode();
        assert_eq!(encoded[0], b'C');
        assert_eq!(&encoded[5..], b"SELECT 1\0");
        assert_eq!(i32::from_be_bytes(encoded[1..5].try_into().unwrap()) as usize, encoded.len() - 1);
    }

    #[test]
    fn test_data_row_null_cell() {
        let encoded = BackendMessage::DataRow(vec![Some(b"42".to_vec()), None]).encode();
        // id + len + count(2) + [len 2 + "42"] + [len -1]
        assert_eq!(encoded[0], b'D');
        assert_eq!(i16::from_be_bytes(encoded[5..7].try_into().unwrap()), 2);
        assert_eq!(i32::from_be_bytes(encoded[7..11].try_into().unwrap()), 2);
        assert_eq!(&encoded[11..13], b"42");
        assert_eq!(i32::from_be_bytes(encoded[13..17].try_into().unwrap()), -1);
    }

    #[test]
    fn test_error_response_fields() {
        let err = BridgeError::Execution("boom".into());
        let encoded = BackendMessage::ErrorResponse(ErrorFields::from(&err)).encode();
        assert_eq!(encoded[0], b'E');
        let body = &encoded[5..];
        assert_eq!(&body[..7], b"SERROR\0");
        assert_eq!(&body[7..14], b"CXX000\0");
        assert_eq!(&body[14..20], b"Mboom\0");
        assert_eq!(body[20], 0);
    }

    #[test]
    fn test_row_description_layout() {
        let encoded = BackendMessage::RowDescription(vec![FieldDescription {
            name: "?column?".into(),
            type_oid: 23,
            type_len: 4,
            format: 0,
        }])
        .encode();
        assert_eq!(encoded[0], b'T');
        assert_eq!(i16::from_be_bytes(encoded[5..7].try_into().unwrap()), 1);
        let after_name = 7 + "?column?".len() + 1;
        let oid_at = after_name + 4 + 2;
        assert_eq!(
            u32::from_be_bytes(encoded[oid_at..oid_at + 4].try_into().unwrap()),
            23
        );
    }
}
