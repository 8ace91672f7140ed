//! psql meta-command translation
//!
//! psql implements `\l`, `\dt` and friends by sending fixed catalog queries
//! against pg_catalog, which the downstream service does not expose. When
//! psql mode is enabled these rules, prepended to the user-defined rewrite
//! list, map each of those queries to an INFORMATION_SCHEMA equivalent the
//! service understands. The patterns key on the distinctive fragments of the
//! generated SQL rather than the full text, which varies slightly across
//! psql releases.

use pgbridge_common::config::RewriteRule;

fn rule(input: &str, output: &str) -> RewriteRule {
    RewriteRule {
        input_pattern: input.to_string(),
        output_pattern: output.to_string(),
    }
}

/// Rewrite rules for the psql introspection meta-commands.
pub fn meta_command_rules() -> Vec<RewriteRule> {
    vec![
        // \l - list databases
        rule(
            r"(?s)^SELECT\s+d\.datname\s+as\s+.Name.,.*FROM\s+pg_catalog\.pg_database\s+d.*$",
            "SELECT catalog_name AS \"Name\" \
             FROM information_schema.schemata \
             WHERE schema_name = '' \
             ORDER BY 1",
        ),
        // \dt - list tables
        rule(
            r"(?s)^SELECT\s+n\.nspname\s+as\s+.Schema.,.*c\.relkind\s+IN\s+\('r'.*FROM\s+pg_catalog\.pg_class\s+c.*$",
            "SELECT table_schema AS \"Schema\", table_name AS \"Name\", \
             'table' AS \"Type\", '' AS \"Owner\" \
             FROM information_schema.tables \
             WHERE table_schema NOT IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') \
             ORDER BY table_name",
        ),
        // \di - list indexes
        rule(
            r"(?s)^SELECT\s+n\.nspname\s+as\s+.Schema.,.*c\.relkind\s+IN\s+\('i'.*FROM\s+pg_catalog\.pg_class\s+c.*$",
            "SELECT table_schema AS \"Schema\", index_name AS \"Name\", \
             'index' AS \"Type\", table_name AS \"Table\" \
             FROM information_schema.indexes \
             WHERE table_schema NOT IN ('INFORMATION_SCHEMA', 'SPANNER_SYS') \
             ORDER BY index_name",
        ),
        // \dn - list schemas
        rule(
            r"(?s)^SELECT\s+n\.nspname\s+AS\s+.Name.,.*FROM\s+pg_catalog\.pg_namespace\s+n.*$",
            "SELECT schema_name AS \"Name\", '' AS \"Owner\" \
             FROM information_schema.schemata \
             ORDER BY schema_name",
        ),
        // \d <table> - the leading pg_class lookup; the table name arrives as
        // an anchored alternation like '^(albums)$'
        rule(
            r"(?s)^SELECT\s+c\.oid,\s*n\.nspname,\s*c\.relname\s+FROM\s+pg_catalog\.pg_class\s+c.*'\^\(([^)]*)\)\$'.*$",
            "SELECT column_name AS \"Column\", spanner_type AS \"Type\", \
             is_nullable AS \"Nullable\" \
             FROM information_schema.columns \
             WHERE table_name = '${1}' \
             ORDER BY ordinal_position",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg_wire::rewrite::QueryRewriter;

    fn rewriter() -> QueryRewriter {
        QueryRewriter::new(&meta_command_rules()).unwrap()
    }

    #[test]
    fn test_list_tables_query_is_translated() {
        // Abbreviated form of what psql 13 sends for \dt
        let sql = "SELECT n.nspname as \"Schema\",\n  c.relname as \"Name\",\n  \
                   c.relkind IN ('r','p') FROM pg_catalog.pg_class c\n  \
                   LEFT JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace";
        let rewritten = rewriter().rewrite(sql);
        assert!(rewritten.starts_with("SELECT table_schema AS \"Schema\""));
        assert!(rewritten.contains("information_schema.tables"));
    }

    #[test]
    fn test_describe_table_captures_name() {
        let sql = "SELECT c.oid,\n  n.nspname,\n  c.relname\nFROM pg_catalog.pg_class c\n\
                   WHERE c.relname OPERATOR(pg_catalog.~) '^(albums)$' COLLATE pg_catalog.default";
        let rewritten = rewriter().rewrite(sql);
        assert!(rewritten.contains("table_name = 'albums'"));
    }

    #[test]
    fn test_unrelated_sql_untouched() {
        let sql = "SELECT * FROM users WHERE name = 'pg_catalog.pg_class'";
        assert_eq!(rewriter().rewrite(sql), sql);
    }
}
