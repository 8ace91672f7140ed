//! Per-connection protocol state machine
//!
//! One session per accepted byte-stream. Message processing is strictly
//! sequential: read one message, process it to completion (including any
//! blocking downstream call), then read the next. Responses go through a
//! buffered writer and are flushed at protocol boundaries (ReadyForQuery,
//! Flush, startup, errors), so extended-mode completions coalesce the way
//! clients expect.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::{debug, info, warn};

use pgbridge_common::config::ProxyOptions;
use pgbridge_common::{BridgeError, Result};

use super::cache::StatementCache;
use super::encoder;
use super::protocol::backend::{BackendMessage, ErrorFields, TransactionStatus};
use super::protocol::codec::{read_frame, read_startup_frame};
use super::protocol::frontend::{FrontendMessage, StartupRequest, TargetKind};
use super::rewrite::QueryRewriter;
use super::statement::{Portal, PortalExecution, PreparedStatement};
use crate::executor::{ExecutionOutcome, QueryExecutor};

/// Extended-batch progress. After the first error inside a batch every
/// message except Sync is dropped without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchState {
    Ready,
    Active,
    Failed,
}

pub struct Session<S> {
    stream: BufStream<S>,
    id: i32,
    secret_key: i32,
    options: Arc<ProxyOptions>,
    rewriter: Arc<QueryRewriter>,
    executor: Arc<dyn QueryExecutor>,
    cache: StatementCache,
    txn: TransactionStatus,
    batch: BatchState,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(
        stream: S,
        id: i32,
        options: Arc<ProxyOptions>,
        rewriter: Arc<QueryRewriter>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        // Derived, not random: the proxy never validates cancel keys.
        let secret_key = id.wrapping_mul(1103515245).wrapping_add(12345);
        Self {
            stream: BufStream::new(stream),
            id,
            secret_key,
            options,
            rewriter,
            executor,
            cache: StatementCache::new(),
            txn: TransactionStatus::Idle,
            batch: BatchState::Ready,
        }
    }

    /// Drive the connection from startup to termination.
    pub async fn run(mut self) -> Result<()> {
        match self.startup().await {
            Ok(true) => {}
            // CancelRequest: close silently
            Ok(false) => return Ok(()),
            Err(e) => {
                if !e.is_fatal() {
                    let _ = self.send(BackendMessage::ErrorResponse(ErrorFields::from(&e))).await;
                    let _ = self.stream.flush().await;
                }
                return Err(e);
            }
        }
        let result = self.message_loop().await;
        // Releases statements, portals, and any held cursors.
        self.cache.clear();
        result
    }

    /// Startup phase: negotiation sentinels, the startup packet itself, the
    /// optional password exchange, then the parameter announcements.
    /// Returns false when the connection was a CancelRequest.
    async fn startup(&mut self) -> Result<bool> {
        let parameters = loop {
            let payload = read_startup_frame(&mut self.stream).await?;
            match StartupRequest::parse(&payload)? {
                StartupRequest::SslRequest | StartupRequest::GssEncRequest => {
                    // Politely refuse; the client retries in cleartext.
                    self.stream.write_all(b"N").await?;
                    self.stream.flush().await?;
                }
                StartupRequest::CancelRequest { process_id, .. } => {
                    debug!(conn = self.id, target = process_id, "cancel request ignored");
                    return Ok(false);
                }
                StartupRequest::Startup { parameters, .. } => break parameters,
            }
        };

        let user = parameters.get("user").cloned().unwrap_or_default();
        let database = parameters.get("database").cloned().unwrap_or_default();
        info!(conn = self.id, %user, %database, "client connected");

        if self.options.auth_required {
            self.send(BackendMessage::AuthenticationCleartextPassword).await?;
            self.stream.flush().await?;
            let (id, payload) = read_frame(&mut self.stream).await?;
            match FrontendMessage::parse(id, &payload)? {
                // The password is demanded for client compatibility but
                // never validated.
                FrontendMessage::Password(_) => {}
                other => {
                    return Err(BridgeError::protocol(format!(
                        "expected Password message, got {}",
                        other.name()
                    )))
                }
            }
        }

        self.send(BackendMessage::AuthenticationOk).await?;
        let announcements = [
            ("server_version", self.options.server_version.clone()),
            ("client_encoding", "UTF8".to_string()),
            ("DateStyle", "ISO".to_string()),
            ("integer_datetimes", "on".to_string()),
            ("standard_conforming_strings", "on".to_string()),
        ];
        for (name, value) in announcements {
            self.send(BackendMessage::ParameterStatus { name: name.to_string(), value }).await?;
        }
        self.send(BackendMessage::BackendKeyData {
            process_id: self.id,
            secret_key: self.secret_key,
        })
        .await?;
        self.ready_for_query().await?;
        Ok(true)
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            let (id, payload) = match read_frame(&mut self.stream).await {
                Ok(frame) => frame,
                Err(BridgeError::Io(e)) => {
                    debug!(conn = self.id, "client disconnected: {e}");
                    return Ok(());
                }
                Err(e) => {
                    // A frame we cannot even skip (oversized length) is fatal.
                    warn!(conn = self.id, "fatal framing error: {e}");
                    let _ = self.send(BackendMessage::ErrorResponse(ErrorFields::from(&e))).await;
                    let _ = self.stream.flush().await;
                    return Err(e);
                }
            };

            if self.batch == BatchState::Failed && id != b'S' && id != b'X' {
                debug!(conn = self.id, skipped = %(id as char), "discarding until Sync");
                continue;
            }

            let message = match FrontendMessage::parse(id, &payload) {
                Ok(message) => message,
                Err(e) => {
                    self.report(e, self.batch == BatchState::Active).await?;
                    continue;
                }
            };
            debug!(conn = self.id, message = message.name(), "dispatch");

            match message {
                FrontendMessage::Terminate => {
                    debug!(conn = self.id, "terminate");
                    return Ok(());
                }
                FrontendMessage::Sync => self.handle_sync().await?,
                FrontendMessage::Flush => self.stream.flush().await?,
                FrontendMessage::Query(sql) => {
                    if let Err(e) = self.handle_simple_query(&sql).await {
                        self.report(e, false).await?;
                    }
                }
                extended @ (FrontendMessage::Parse { .. }
                | FrontendMessage::Bind { .. }
                | FrontendMessage::Describe { .. }
                | FrontendMessage::Execute { .. }
                | FrontendMessage::Close { .. }) => {
                    if self.batch == BatchState::Ready {
                        self.batch = BatchState::Active;
                    }
                    if let Err(e) = self.handle_extended(extended).await {
                        self.report(e, true).await?;
                    }
                }
                FrontendMessage::Password(_) => {
                    let err = BridgeError::protocol("unexpected Password message");
                    self.report(err, self.batch == BatchState::Active).await?;
                }
                FrontendMessage::FunctionCall => {
                    let err = BridgeError::unsupported("the function call sub-protocol");
                    self.report(err, self.batch == BatchState::Active).await?;
                }
            }
        }
    }

    /// Report a non-fatal error to the client. In an extended batch this
    /// emits the ErrorResponse once and arms skip-until-Sync; in simple
    /// context it completes the request boundary with ReadyForQuery.
    async fn report(&mut self, err: BridgeError, extended: bool) -> Result<()> {
        if err.is_fatal() {
            return Err(err);
        }
        warn!(conn = self.id, "{err}");
        self.send(BackendMessage::ErrorResponse(ErrorFields::from(&err))).await?;
        self.stream.flush().await?;
        if self.txn == TransactionStatus::InTransaction {
            self.txn = TransactionStatus::Failed;
        }
        if extended {
            self.batch = BatchState::Failed;
        } else {
            self.ready_for_query().await?;
        }
        Ok(())
    }

    /// Sync ends the batch: exactly one ReadyForQuery whose status is 'E'
    /// for a failed batch, 'T' inside a transaction, 'I' otherwise.
    async fn handle_sync(&mut self) -> Result<()> {
        let status = if self.batch == BatchState::Failed {
            TransactionStatus::Failed
        } else {
            self.txn
        };
        // The unnamed portal does not survive the end of the transaction.
        self.cache.close_unnamed_portal();
        self.send(BackendMessage::ReadyForQuery(status)).await?;
        self.stream.flush().await?;
        self.batch = BatchState::Ready;
        if self.txn == TransactionStatus::Failed {
            self.txn = TransactionStatus::Idle;
        }
        Ok(())
    }

    async fn handle_extended(&mut self, message: FrontendMessage) -> Result<()> {
        match message {
            FrontendMessage::Parse { name, sql, param_types } => {
                self.handle_parse(name, sql, param_types).await
            }
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                param_values,
                result_formats,
            } => {
                self.handle_bind(portal, statement, param_formats, param_values, result_formats)
                    .await
            }
            FrontendMessage::Describe { kind, name } => self.handle_describe(kind, &name).await,
            FrontendMessage::Execute { portal, max_rows } => {
                self.handle_execute(&portal, max_rows).await
            }
            FrontendMessage::Close { kind, name } => self.handle_close(kind, &name).await,
            other => Err(BridgeError::protocol(format!(
                "{} is not an extended-protocol message",
                other.name()
            ))),
        }
    }

    // ===== Simple query protocol =====

    async fn handle_simple_query(&mut self, sql: &str) -> Result<()> {
        // Byte-literal prefix match, as observed client behavior relies on.
        // The backend has no session variables, so SET never goes downstream.
        if sql.starts_with("SET ") {
            debug!(conn = self.id, "skipping SET statement");
            self.send(BackendMessage::CommandComplete("SET".to_string())).await?;
            return self.ready_for_query().await;
        }
        if sql.trim().is_empty() {
            self.send(BackendMessage::EmptyQueryResponse).await?;
            return self.ready_for_query().await;
        }

        let rewritten = self.rewriter.rewrite(sql);
        if rewritten != sql {
            debug!(conn = self.id, %rewritten, "query rewritten");
        }
        let statement =
            PreparedStatement::new(String::new(), sql.to_string(), rewritten, Vec::new());

        match self.executor.execute(&statement.sql).await? {
            ExecutionOutcome::Rows(mut set) => {
                let formats =
                    encoder::simple_query_formats(set.columns.len(), self.options.text_format);
                let fields = encoder::describe_columns(&set.columns, &formats);
                self.send(BackendMessage::RowDescription(fields)).await?;
                let mut count = 0u64;
                while let Some(row) = set.next_row().await? {
                    let cells = encoder::encode_row(&row, &formats)?;
                    self.send(BackendMessage::DataRow(cells)).await?;
                    count += 1;
                }
                self.send(BackendMessage::CommandComplete(statement.command_tag(count))).await?;
            }
            ExecutionOutcome::UpdateCount(n) => {
                self.track_transaction(&statement.command);
                self.send(BackendMessage::CommandComplete(statement.command_tag(n))).await?;
            }
        }
        self.ready_for_query().await
    }

    // ===== Extended query protocol =====

    async fn handle_parse(
        &mut self,
        name: String,
        sql: String,
        param_types: Vec<u32>,
    ) -> Result<()> {
        let rewritten = self.rewriter.rewrite(&sql);
        let statement = PreparedStatement::new(name, sql, rewritten, param_types);
        debug!(
            conn = self.id,
            name = %statement.name,
            params = statement.param_count,
            "parse"
        );
        self.cache.put_statement(statement)?;
        self.send(BackendMessage::ParseComplete).await
    }

    async fn handle_bind(
        &mut self,
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> Result<()> {
        let statement = self.cache.statement(&statement)?;
        if param_values.len() != statement.param_count {
            return Err(BridgeError::protocol(format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                param_values.len(),
                statement.name,
                statement.param_count
            )));
        }
        if param_formats.len() > 1 && param_formats.len() != param_values.len() {
            return Err(BridgeError::protocol(format!(
                "parameter format vector has {} entries for {} parameters",
                param_formats.len(),
                param_values.len()
            )));
        }
        let portal = Portal::new(portal, statement, param_formats, param_values, result_formats);
        self.cache.put_portal(portal)?;
        self.send(BackendMessage::BindComplete).await
    }

    async fn handle_describe(&mut self, kind: TargetKind, name: &str) -> Result<()> {
        match kind {
            TargetKind::Statement => {
                let statement = self.cache.statement(name)?;
                self.send(BackendMessage::ParameterDescription(statement.describe_params()))
                    .await?;
                // Statements are never described from unbound metadata; the
                // row shape is only known once a portal executes.
                self.send(BackendMessage::NoData).await
            }
            TargetKind::Portal => {
                let returns_rows = self.cache.portal(name)?.statement.returns_rows();
                if !returns_rows {
                    return self.send(BackendMessage::NoData).await;
                }
                // The service has no metadata-only channel: run the portal
                // now and keep the handle for the Execute that follows.
                self.ensure_portal_executed(name).await?;
                let message = {
                    let portal = self.cache.portal(name)?;
                    match &portal.execution {
                        Some(PortalExecution::Rows { set, .. }) => {
                            let formats = encoder::resolve_result_formats(
                                &portal.result_formats,
                                set.columns.len(),
                                self.options.text_format,
                                self.options.force_binary,
                            )?;
                            BackendMessage::RowDescription(encoder::describe_columns(
                                &set.columns,
                                &formats,
                            ))
                        }
                        _ => BackendMessage::NoData,
                    }
                };
                self.send(message).await
            }
        }
    }

    async fn handle_execute(&mut self, name: &str, max_rows: i32) -> Result<()> {
        self.ensure_portal_executed(name).await?;

        let (statement, result_formats, execution) = {
            let portal = self.cache.portal_mut(name)?;
            let execution = portal
                .execution
                .take()
                .ok_or_else(|| BridgeError::protocol("portal has no execution handle"))?;
            (portal.statement.clone(), portal.result_formats.clone(), execution)
        };

        match execution {
            PortalExecution::UpdateCount(n) => {
                self.track_transaction(&statement.command);
                self.cache.portal_mut(name)?.execution = Some(PortalExecution::UpdateCount(n));
                self.send(BackendMessage::CommandComplete(statement.command_tag(n))).await
            }
            PortalExecution::Rows { mut set, mut rows_sent } => {
                let formats = encoder::resolve_result_formats(
                    &result_formats,
                    set.columns.len(),
                    self.options.text_format,
                    self.options.force_binary,
                )?;
                let limit = if max_rows > 0 { max_rows as u64 } else { u64::MAX };
                let mut emitted = 0u64;
                let mut drained = false;
                while emitted < limit {
                    match set.next_row().await? {
                        Some(row) => {
                            let cells = encoder::encode_row(&row, &formats)?;
                            self.send(BackendMessage::DataRow(cells)).await?;
                            emitted += 1;
                            rows_sent += 1;
                        }
                        None => {
                            drained = true;
                            break;
                        }
                    }
                }
                // The cursor stays on the portal either way; a drained one
                // simply yields no further rows.
                self.cache.portal_mut(name)?.execution =
                    Some(PortalExecution::Rows { set, rows_sent });
                if drained {
                    self.send(BackendMessage::CommandComplete(statement.command_tag(rows_sent)))
                        .await
                } else {
                    self.send(BackendMessage::PortalSuspended).await
                }
            }
        }
    }

    async fn handle_close(&mut self, kind: TargetKind, name: &str) -> Result<()> {
        match kind {
            TargetKind::Statement => self.cache.close_statement(name),
            TargetKind::Portal => self.cache.close_portal(name),
        }
        // Closing an unknown name is not an error per protocol.
        self.send(BackendMessage::CloseComplete).await
    }

    /// Execute the portal's bound SQL downstream unless a cached handle
    /// already exists (from a Describe or a suspended Execute).
    async fn ensure_portal_executed(&mut self, name: &str) -> Result<()> {
        let sql = {
            let portal = self.cache.portal(name)?;
            if portal.execution.is_some() {
                return Ok(());
            }
            portal.bound_sql()?
        };
        debug!(conn = self.id, %sql, "executing portal");
        let outcome = self.executor.execute(&sql).await?;
        let portal = self.cache.portal_mut(name)?;
        portal.execution = Some(match outcome {
            ExecutionOutcome::Rows(set) => PortalExecution::Rows { set, rows_sent: 0 },
            ExecutionOutcome::UpdateCount(n) => PortalExecution::UpdateCount(n),
        });
        Ok(())
    }

    /// BEGIN/COMMIT/ROLLBACK move the transaction status reported by
    /// ReadyForQuery; everything else leaves it alone.
    fn track_transaction(&mut self, command: &str) {
        match command {
            "BEGIN" | "START" => self.txn = TransactionStatus::InTransaction,
            "COMMIT" | "END" | "ROLLBACK" | "ABORT" => self.txn = TransactionStatus::Idle,
            _ => {}
        }
    }

    async fn ready_for_query(&mut self) -> Result<()> {
        self.send(BackendMessage::ReadyForQuery(self.txn)).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn send(&mut self, message: BackendMessage) -> Result<()> {
        message.write_to(&mut self.stream).await?;
        Ok(())
    }
}
