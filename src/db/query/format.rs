use once_cell::sync::Lazy;
use std::collections::HashSet;

use super::ScriptSplitter;
use crate::db::SqlDialect;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SqlToken {
    Word(String),
    String(String),
    Comment(String),
    Symbol(String),
}

const SQL_KEYWORDS: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CALL", "CASE", "CREATE",
    "CROSS", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "EXISTS", "EXPLAIN", "FROM",
    "FULL", "GROUP", "HAVING", "IN", "INNER", "INSERT", "INTO", "IS", "JOIN", "LEFT", "LIKE",
    "LIMIT", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "REPLACE", "RIGHT",
    "SELECT", "SET", "SHOW", "TABLE", "THEN", "TRUNCATE", "UNION", "UPDATE", "USE", "USING",
    "VALUES", "VIEW", "WHEN", "WHERE", "WITH",
];

static SQL_KEYWORDS_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| SQL_KEYWORDS.iter().copied().collect());

const CLAUSE_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "UNION", "VALUES", "SET",
    "INSERT", "UPDATE", "DELETE", "WITH",
];
const JOIN_MODIFIERS: &[&str] = &["LEFT", "RIGHT", "FULL", "INNER", "CROSS"];
const CONDITION_KEYWORDS: &[&str] = &["AND", "OR", "ON"];

/// Basic pretty-printer: one clause per line, uppercase keywords, conditions
/// indented. PL/SQL units are passed through untouched.
pub struct SqlFormatter;

impl SqlFormatter {
    pub fn format(sql: &str, dialect: SqlDialect) -> String {
        let statements = ScriptSplitter::split(sql, dialect);
        let mut formatted = String::new();

        for (idx, statement) in statements.iter().enumerate() {
            if idx > 0 {
                formatted.push_str("\n\n");
            }
            if dialect == SqlDialect::Oracle && ScriptSplitter::is_plsql_unit(statement) {
                formatted.push_str(statement.trim_end());
                formatted.push_str("\n/");
                continue;
            }

            let tokens = Self::tokenize(statement, dialect);
            let body = Self::format_tokens(&tokens);
            formatted.push_str(body.trim_end());
            let has_code = tokens.iter().any(|t| !matches!(t, SqlToken::Comment(_)));
            if has_code {
                formatted.push(';');
            }
        }

        formatted
    }

    fn format_tokens(tokens: &[SqlToken]) -> String {
        let mut out = String::new();
        let mut depth = 0usize;
        let mut needs_space = false;
        let mut prev_upper: Option<String> = None;
        let mut between_pending = false;

        let newline = |out: &mut String, indent: usize| {
            let trimmed_len = out.trim_end_matches(' ').len();
            out.truncate(trimmed_len);
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&"  ".repeat(indent));
        };

        for token in tokens {
            match token {
                SqlToken::Comment(text) => {
                    if needs_space {
                        out.push(' ');
                    }
                    out.push_str(text.trim_end());
                    if text.starts_with("--") || text.starts_with('#') {
                        out.push('\n');
                        needs_space = false;
                    } else {
                        needs_space = true;
                    }
                }
                SqlToken::String(text) => {
                    if needs_space {
                        out.push(' ');
                    }
                    out.push_str(text);
                    needs_space = true;
                    prev_upper = None;
                }
                SqlToken::Symbol(sym) => {
                    match sym.as_str() {
                        "(" => {
                            if needs_space && !Self::is_call_paren(prev_upper.as_deref(), &out) {
                                out.push(' ');
                            }
                            out.push('(');
                            depth += 1;
                            needs_space = false;
                        }
                        ")" => {
                            depth = depth.saturating_sub(1);
                            out.push(')');
                            needs_space = true;
                        }
                        "," => {
                            out.push(',');
                            needs_space = true;
                        }
                        "." => {
                            out.push('.');
                            needs_space = false;
                        }
                        ";" => {}
                        other => {
                            if needs_space {
                                out.push(' ');
                            }
                            out.push_str(other);
                            needs_space = true;
                        }
                    }
                    prev_upper = None;
                }
                SqlToken::Word(word) => {
                    let upper = word.to_uppercase();
                    let is_keyword = SQL_KEYWORDS_SET.contains(upper.as_str());
                    let text = if is_keyword { upper.clone() } else { word.clone() };
                    let after_join_modifier = prev_upper
                        .as_deref()
                        .is_some_and(|p| JOIN_MODIFIERS.contains(&p) || p == "OUTER");

                    if depth == 0 && is_keyword {
                        let starts_clause = CLAUSE_KEYWORDS.contains(&upper.as_str())
                            && !(upper == "SET" && prev_upper.as_deref() == Some("CHARACTER"));
                        if starts_clause || JOIN_MODIFIERS.contains(&upper.as_str()) {
                            newline(&mut out, 0);
                            needs_space = false;
                        } else if upper == "JOIN" && !after_join_modifier {
                            newline(&mut out, 0);
                            needs_space = false;
                        } else if upper == "AND" && between_pending {
                            between_pending = false;
                        } else if CONDITION_KEYWORDS.contains(&upper.as_str()) {
                            newline(&mut out, 1);
                            needs_space = false;
                        }
                    }
                    if upper == "BETWEEN" {
                        between_pending = true;
                    }

                    if needs_space {
                        out.push(' ');
                    }
                    out.push_str(&text);
                    needs_space = true;
                    prev_upper = Some(upper);
                }
            }
        }

        out.trim_start_matches('\n').to_string()
    }

    fn is_call_paren(prev_upper: Option<&str>, out: &str) -> bool {
        // `count(`, `p(`: identifiers hug their argument list.
        match prev_upper {
            Some(word) => !SQL_KEYWORDS_SET.contains(word) && !out.ends_with(' '),
            None => false,
        }
    }

    pub(crate) fn tokenize(sql: &str, dialect: SqlDialect) -> Vec<SqlToken> {
        let chars: Vec<char> = sql.chars().collect();
        let len = chars.len();
        let mysql = dialect == SqlDialect::MySql;
        let mut tokens = Vec::new();
        let mut word = String::new();
        let mut i = 0usize;

        let flush_word = |word: &mut String, tokens: &mut Vec<SqlToken>| {
            if !word.is_empty() {
                tokens.push(SqlToken::Word(std::mem::take(word)));
            }
        };

        while i < len {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if (c == '-' && next == Some('-')) || (mysql && c == '#') {
                flush_word(&mut word, &mut tokens);
                let end = chars[i..]
                    .iter()
                    .position(|ch| *ch == '\n')
                    .map(|p| i + p)
                    .unwrap_or(len);
                tokens.push(SqlToken::Comment(chars[i..end].iter().collect()));
                i = end;
                continue;
            }

            if c == '/' && next == Some('*') {
                flush_word(&mut word, &mut tokens);
                let mut end = i + 2;
                while end < len && !(chars[end] == '*' && chars.get(end + 1) == Some(&'/')) {
                    end += 1;
                }
                let end = (end + 2).min(len);
                tokens.push(SqlToken::Comment(chars[i..end].iter().collect()));
                i = end;
                continue;
            }

            if c == '\'' || c == '"' || (mysql && c == '`') {
                flush_word(&mut word, &mut tokens);
                let mut text = String::from(c);
                let mut j = i + 1;
                while j < len {
                    let ch = chars[j];
                    text.push(ch);
                    if mysql && ch == '\\' && c != '`' && j + 1 < len {
                        text.push(chars[j + 1]);
                        j += 2;
                        continue;
                    }
                    if ch == c {
                        if chars.get(j + 1) == Some(&c) {
                            text.push(c);
                            j += 2;
                            continue;
                        }
                        j += 1;
                        break;
                    }
                    j += 1;
                }
                tokens.push(SqlToken::String(text));
                i = j;
                continue;
            }

            if c.is_alphanumeric() || c == '_' || c == '$' || c == '@' {
                word.push(c);
                i += 1;
                continue;
            }

            flush_word(&mut word, &mut tokens);
            if c.is_whitespace() {
                i += 1;
                continue;
            }

            let pair: String = chars[i..(i + 2).min(len)].iter().collect();
            if matches!(pair.as_str(), "<=" | ">=" | "<>" | "!=" | ":=" | "||") {
                tokens.push(SqlToken::Symbol(pair));
                i += 2;
                continue;
            }
            tokens.push(SqlToken::Symbol(c.to_string()));
            i += 1;
        }
        flush_word(&mut word, &mut tokens);
        tokens
    }
}
