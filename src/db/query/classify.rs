use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::{ScriptSplitter, StatementKind};

const QUERY_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH"];

static QUERY_KEYWORDS_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| QUERY_KEYWORDS.iter().copied().collect());

pub struct StatementClassifier;

impl StatementClassifier {
    /// Choose the execution path for one statement from its first word.
    ///
    /// Returns `None` for statements that are empty once leading comments are
    /// removed; those are skipped and never produce a result tab. Unknown
    /// leading words fall through to `Update`.
    pub fn classify(statement: &str) -> Option<StatementKind> {
        let keyword = ScriptSplitter::leading_keyword(statement)?;
        let kind = if QUERY_KEYWORDS_SET.contains(keyword.as_str()) {
            StatementKind::Query
        } else if keyword == "CALL" {
            StatementKind::ProcedureCall
        } else {
            StatementKind::Update
        };
        Some(kind)
    }
}
