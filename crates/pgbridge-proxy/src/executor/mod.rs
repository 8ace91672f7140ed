//! Downstream query execution
//!
//! The protocol engine only ever sees this seam: translated SQL text goes
//! in, an update count or a forward-only row cursor comes out. The concrete
//! client for the managed service lives in `remote`; tests substitute their
//! own implementations.

pub mod remote;

use async_trait::async_trait;

use pgbridge_common::Result;

use crate::value::{ColumnMetadata, Row};

/// What executing one statement produced.
pub enum ExecutionOutcome {
    /// A result set with a forward-only cursor
    Rows(RowSet),
    /// Number of rows affected by a DML statement
    UpdateCount(u64),
}

/// Forward-only, non-restartable sequence of rows.
#[async_trait]
pub trait RowCursor: Send {
    /// The next row, or `None` once the set is exhausted.
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// Column metadata plus the cursor that yields the rows.
pub struct RowSet {
    pub columns: Vec<ColumnMetadata>,
    cursor: Box<dyn RowCursor>,
}

impl RowSet {
    pub fn new(columns: Vec<ColumnMetadata>, cursor: Box<dyn RowCursor>) -> Self {
        Self { columns, cursor }
    }

    /// A row set backed by rows that are already in memory.
    pub fn buffered(columns: Vec<ColumnMetadata>, rows: Vec<Row>) -> Self {
        Self::new(columns, Box::new(BufferedCursor { rows: rows.into_iter() }))
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        self.cursor.next_row().await
    }
}

struct BufferedCursor {
    rows: std::vec::IntoIter<Row>,
}

#[async_trait]
impl RowCursor for BufferedCursor {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// The opaque collaborator that runs SQL against the managed service.
///
/// Implementations must be safe for concurrent use across sessions; each
/// session goes through its own `Arc` handle and never interleaves calls.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome>;
}
