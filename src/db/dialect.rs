use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::query::{ScriptSplitter, SqlFormatter};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    MySql,
    Oracle,
}

impl SqlDialect {
    /// Directive that makes `database` the session default.
    pub fn use_database_sql(&self, database: &str) -> String {
        match self {
            SqlDialect::MySql => format!("USE `{}`", database.replace('`', "``")),
            SqlDialect::Oracle => {
                format!("ALTER SESSION SET CURRENT_SCHEMA = {}", oracle_identifier(database))
            }
        }
    }

    pub fn autocommit_sql(&self, enabled: bool) -> String {
        match self {
            SqlDialect::MySql => format!("SET autocommit = {}", if enabled { 1 } else { 0 }),
            SqlDialect::Oracle => format!("SET AUTOCOMMIT {}", if enabled { "ON" } else { "OFF" }),
        }
    }

    pub fn explain_sql(&self, statement: &str) -> String {
        let statement = statement.trim().trim_end_matches(';').trim_end();
        match self {
            SqlDialect::MySql => format!("EXPLAIN {statement}"),
            SqlDialect::Oracle => format!("EXPLAIN PLAN FOR {statement}"),
        }
    }
}

/// Plain names stay unquoted so Oracle folds them to upper case; anything
/// else is quoted verbatim.
fn oracle_identifier(name: &str) -> String {
    let mut chars = name.chars();
    let plain = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '#'));
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::MySql => write!(f, "mysql"),
            SqlDialect::Oracle => write!(f, "oracle"),
        }
    }
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "oracle" => Ok(SqlDialect::Oracle),
            other => Err(format!("unknown SQL dialect `{other}` (expected mysql or oracle)")),
        }
    }
}

/// Text-level SQL services: statement splitting and pretty-printing.
/// Treated as a trusted pure function by the session layer.
pub trait DialectService: Send + Sync {
    fn split_statements(&self, sql: &str, dialect: SqlDialect) -> Vec<String>;
    fn format_sql(&self, sql: &str, dialect: SqlDialect) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinDialect;

impl DialectService for BuiltinDialect {
    fn split_statements(&self, sql: &str, dialect: SqlDialect) -> Vec<String> {
        ScriptSplitter::split(sql, dialect)
    }

    fn format_sql(&self, sql: &str, dialect: SqlDialect) -> String {
        SqlFormatter::format(sql, dialect)
    }
}
