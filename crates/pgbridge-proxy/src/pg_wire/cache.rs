//! Per-session statement and portal tables
//!
//! Two mappings keyed by name, where the empty name addresses the unnamed
//! slot. Closing a name that does not exist is not an error (the protocol
//! still answers CloseComplete). Dropping a portal drops its cursor.

use std::collections::HashMap;
use std::sync::Arc;

use pgbridge_common::{BridgeError, Result};

use super::statement::{Portal, PreparedStatement};

#[derive(Default)]
pub struct StatementCache {
    statements: HashMap<String, Arc<PreparedStatement>>,
    portals: HashMap<String, Portal>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a prepared statement. The unnamed statement is overwritten
    /// freely; a named one must be closed before its name can be reused.
    pub fn put_statement(&mut self, statement: PreparedStatement) -> Result<()> {
        if !statement.name.is_empty() && self.statements.contains_key(&statement.name) {
            return Err(BridgeError::protocol(format!(
                "prepared statement \"{}\" already exists",
                statement.name
            )));
        }
        self.statements.insert(statement.name.clone(), Arc::new(statement));
        Ok(())
    }

    pub fn statement(&self, name: &str) -> Result<Arc<PreparedStatement>> {
        self.statements.get(name).cloned().ok_or_else(|| {
            BridgeError::protocol(format!("prepared statement \"{name}\" does not exist"))
        })
    }

    /// Store a portal under the same naming rule as statements.
    pub fn put_portal(&mut self, portal: Portal) -> Result<()> {
        if !portal.name.is_empty() && self.portals.contains_key(&portal.name) {
            return Err(BridgeError::protocol(format!(
                "portal \"{}\" already exists",
                portal.name
            )));
        }
        self.portals.insert(portal.name.clone(), portal);
        Ok(())
    }

    pub fn portal(&self, name: &str) -> Result<&Portal> {
        self.portals
            .get(name)
            .ok_or_else(|| BridgeError::protocol(format!("portal \"{name}\" does not exist")))
    }

    pub fn portal_mut(&mut self, name: &str) -> Result<&mut Portal> {
        self.portals
            .get_mut(name)
            .ok_or_else(|| BridgeError::protocol(format!("portal \"{name}\" does not exist")))
    }

    /// Remove a statement; absent names are ignored per protocol.
    pub fn close_statement(&mut self, name: &str) {
        self.statements.remove(name);
    }

    /// Remove a portal, releasing its cursor; absent names are ignored.
    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// The unnamed portal only lives until the end of the transaction.
    pub fn close_unnamed_portal(&mut self) {
        self.portals.remove("");
    }

    /// Release everything at session end.
    pub fn clear(&mut self) {
        self.portals.clear();
        self.statements.clear();
    }
}
