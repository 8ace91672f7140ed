//! Client for the managed service's query endpoint
//!
//! The endpoint speaks a line-delimited JSON exchange: one request object
//! per statement, one response object back. The proxy dials per request; the
//! endpoint is assumed to pool whatever it needs behind that.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use pgbridge_common::config::ProxyOptions;
use pgbridge_common::{BridgeError, Result};

use super::{ExecutionOutcome, QueryExecutor, RowSet};
use crate::value::{ColumnMetadata, Row};

/// Default endpoint, matching the emulator's local port.
pub const DEFAULT_ENDPOINT: &str = "localhost:9010";

#[derive(Serialize)]
struct WireRequest<'a> {
    database: &'a str,
    credentials: &'a str,
    sql: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireResponse {
    Error { error: String },
    Update { update_count: u64 },
    Rows { columns: Vec<ColumnMetadata>, rows: Vec<Row> },
}

/// Executor handle for one configured database.
pub struct RemoteExecutor {
    endpoint: String,
    database: String,
    credentials: String,
}

impl RemoteExecutor {
    /// Build an executor from the proxy options. Reads the credentials file
    /// once; a missing file is a startup error, not a per-query one.
    pub fn from_options(options: &ProxyOptions, endpoint: String) -> Result<Self> {
        let credentials = std::fs::read_to_string(&options.credentials).map_err(|e| {
            BridgeError::Config(format!(
                "cannot read credentials file {}: {e}",
                options.credentials.display()
            ))
        })?;
        Ok(Self {
            endpoint,
            database: options.connection_string(),
            credentials,
        })
    }
}

#[async_trait]
impl QueryExecutor for RemoteExecutor {
    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        debug!(endpoint = %self.endpoint, "executing downstream statement");

        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| BridgeError::Execution(format!("cannot reach executor: {e}")))?;
        let (read_half, mut write_half) = stream.into_split();

        let request = WireRequest {
            database: &self.database,
            credentials: self.credentials.trim(),
            sql,
        };
        let mut line = serde_json::to_vec(&request)
            .map_err(|e| BridgeError::Execution(e.to_string()))?;
        line.push(b'\n');
        write_half
            .write_all(&line)
            .await
            .map_err(|e| BridgeError::Execution(format!("executor write failed: {e}")))?;

        let mut reader = BufReader::new(read_half);
        let mut response = String::new();
        reader
            .read_line(&mut response)
            .await
            .map_err(|e| BridgeError::Execution(format!("executor read failed: {e}")))?;
        if response.is_empty() {
            return Err(BridgeError::Execution("executor closed the connection".into()));
        }

        match serde_json::from_str::<WireResponse>(&response)
            .map_err(|e| BridgeError::Execution(format!("malformed executor response: {e}")))?
        {
            WireResponse::Error { error } => Err(BridgeError::Execution(error)),
            WireResponse::Update { update_count } => Ok(ExecutionOutcome::UpdateCount(update_count)),
            WireResponse::Rows { columns, rows } => {
                Ok(ExecutionOutcome::Rows(RowSet::buffered(columns, rows)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_response_shapes() {
        let update: WireResponse = serde_json::from_str(r#"{"update_count": 3}"#).unwrap();
        assert!(matches!(update, WireResponse::Update { update_count: 3 }));

        let error: WireResponse = serde_json::from_str(r#"{"error": "table not found"}"#).unwrap();
        match error {
            WireResponse::Error { error } => assert_eq!(error, "table not found"),
            _ => panic!("expected error response"),
        }

        let rows: WireResponse = serde_json::from_str(
            r#"{"columns": [{"name": "n", "type": "int8"}],
                "rows": [[{"type": "int8", "value": 7}], [null]]}"#,
        )
        .unwrap();
        match rows {
            WireResponse::Rows { columns, rows } => {
                assert_eq!(columns.len(), 1);
                assert_eq!(rows.len(), 2);
                assert!(rows[1][0].is_none());
            }
            _ => panic!("expected row response"),
        }
    }
}
