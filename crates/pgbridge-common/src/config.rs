//! Configuration records for the pgbridge proxy
//!
//! Everything here is gathered once at startup (CLI plus an optional rewrite
//! rules JSON file) and shared read-only with the sessions afterwards.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

/// How result values are rendered when a column uses the text format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TextFormat {
    /// PostgreSQL canonical text form (`t`/`f` booleans, ISO timestamps).
    /// Use this with clients that parse what the server returns, such as the
    /// JDBC driver.
    #[default]
    Postgresql,
    /// The downstream service's own text rendering, byte-for-byte. Use this
    /// with text-only clients (psql) that display values without parsing.
    Spanner,
}

impl std::str::FromStr for TextFormat {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POSTGRESQL" => Ok(TextFormat::Postgresql),
            "SPANNER" => Ok(TextFormat::Spanner),
            other => Err(BridgeError::Config(format!(
                "unknown text format '{other}' (expected POSTGRESQL or SPANNER)"
            ))),
        }
    }
}

/// Options gathered from the CLI. One instance per process, shared with every
/// session behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyOptions {
    /// GCP project id of the downstream database
    pub project: String,
    /// Instance id of the downstream database
    pub instance: String,
    /// Database id
    pub database: String,
    /// Path to the credentials file handed to the downstream client
    pub credentials: PathBuf,
    /// Listening TCP port for PostgreSQL clients
    pub port: u16,
    /// Demand a (never validated) cleartext password during startup
    pub auth_required: bool,
    /// Translate the catalog queries psql issues for its meta-commands
    pub psql_mode: bool,
    /// When a Bind carries no result-format codes, answer in binary instead
    /// of the configured text format
    pub force_binary: bool,
    /// Text rendering used for columns with format code 0
    pub text_format: TextFormat,
    /// Version string announced via the server_version parameter
    pub server_version: String,
    /// User-defined rewrite rules, in application order
    pub rewrites: Vec<RewriteRule>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            project: String::new(),
            instance: String::new(),
            database: String::new(),
            credentials: PathBuf::new(),
            port: 5432,
            auth_required: false,
            psql_mode: false,
            force_binary: false,
            text_format: TextFormat::default(),
            server_version: "13.4".to_string(),
            rewrites: Vec::new(),
        }
    }
}

impl ProxyOptions {
    /// Fully qualified database path used as the downstream connection string.
    pub fn connection_string(&self) -> String {
        format!(
            "projects/{}/instances/{}/databases/{}",
            self.project, self.instance, self.database
        )
    }
}

/// One find-and-replace-all rewrite applied to incoming SQL.
///
/// `input_pattern` is a regex; `output_pattern` may reference capture groups
/// as `$1` or `${name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub input_pattern: String,
    pub output_pattern: String,
}

/// On-disk shape of the rewrite rules file:
/// `{"rewrites": [{"input_pattern": "...", "output_pattern": "..."}, ...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteFile {
    pub rewrites: Vec<RewriteRule>,
}

/// Load and validate rewrite rules from a JSON file.
///
/// Every pattern is compiled here so that a bad regex fails startup instead
/// of the first query that happens to hit it.
pub fn load_rewrites(path: &std::path::Path) -> Result<Vec<RewriteRule>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("cannot read rewrite file {}: {e}", path.display()))
    })?;
    let file: RewriteFile = serde_json::from_str(&raw)?;
    for rule in &file.rewrites {
        regex::Regex::new(&rule.input_pattern).map_err(|e| {
            BridgeError::Config(format!("bad rewrite pattern '{}': {e}", rule.input_pattern))
        })?;
    }
    tracing::info!(count = file.rewrites.len(), "loaded rewrite rules");
    Ok(file.rewrites)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_connection_string() {
        let opts = ProxyOptions {
            project: "p1".into(),
            instance: "i1".into(),
            database: "d1".into(),
            ..Default::default()
        };
        assert_eq!(opts.connection_string(), "projects/p1/instances/i1/databases/d1");
    }

    #[test]
    fn test_text_format_parse() {
        assert_eq!("postgresql".parse::<TextFormat>().unwrap(), TextFormat::Postgresql);
        assert_eq!("SPANNER".parse::<TextFormat>().unwrap(), TextFormat::Spanner);
        assert!("csv".parse::<TextFormat>().is_err());
    }

    #[test]
    fn test_load_rewrites() {
        let mut f = tempfile_path("rewrites-ok.json");
        write!(
            f.1,
            r#"{{"rewrites": [{{"input_pattern": "(?i)^SHOW\\s+(\\w+)$", "output_pattern": "SELECT '${{1}}'"}}]}}"#
        )
        .unwrap();
        let rules = load_rewrites(&f.0).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].output_pattern, "SELECT '${1}'");
        std::fs::remove_file(&f.0).ok();
    }

    #[test]
    fn test_load_rewrites_bad_pattern_fails() {
        let mut f = tempfile_path("rewrites-bad.json");
        write!(
            f.1,
            r#"{{"rewrites": [{{"input_pattern": "([unclosed", "output_pattern": "x"}}]}}"#
        )
        .unwrap();
        let err = load_rewrites(&f.0).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        std::fs::remove_file(&f.0).ok();
    }

    fn tempfile_path(name: &str) -> (PathBuf, std::fs::File) {
        let path = std::env::temp_dir().join(format!("pgbridge-{}-{name}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        (path, file)
    }
}
