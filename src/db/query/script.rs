use crate::db::SqlDialect;

#[derive(Default)]
struct SplitState {
    in_single_quote: bool,
    in_double_quote: bool,
    in_backtick: bool,
    in_line_comment: bool,
    in_block_comment: bool,
    in_q_quote: bool,
    q_quote_end: Option<char>,
}

impl SplitState {
    fn is_idle(&self) -> bool {
        !self.in_single_quote
            && !self.in_double_quote
            && !self.in_backtick
            && !self.in_block_comment
            && !self.in_q_quote
            && !self.in_line_comment
    }

    fn start_q_quote(&mut self, delimiter: char) {
        self.in_q_quote = true;
        self.q_quote_end = Some(match delimiter {
            '[' => ']',
            '(' => ')',
            '{' => '}',
            '<' => '>',
            other => other,
        });
    }
}

struct StatementBuilder {
    dialect: SqlDialect,
    state: SplitState,
    delimiter: Vec<char>,
    current: String,
    statements: Vec<String>,
}

impl StatementBuilder {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            state: SplitState::default(),
            delimiter: vec![';'],
            current: String::new(),
            statements: Vec::new(),
        }
    }

    fn push_current(&mut self) {
        let trimmed = self.current.trim();
        if !trimmed.is_empty() {
            self.statements.push(trimmed.to_string());
        }
        self.current.clear();
    }

    fn process_line(&mut self, line: &str) {
        if self.state.is_idle() {
            let trimmed = line.trim();
            match self.dialect {
                SqlDialect::MySql => {
                    if let Some(delimiter) = ScriptSplitter::delimiter_directive(trimmed) {
                        self.push_current();
                        self.delimiter = delimiter.chars().collect();
                        return;
                    }
                }
                SqlDialect::Oracle => {
                    if trimmed == "/" {
                        self.push_current();
                        return;
                    }
                }
            }
        }

        self.process_text(line);
        self.current.push('\n');
        // Line comments never span lines.
        self.state.in_line_comment = false;
    }

    fn process_text(&mut self, text: &str) {
        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mysql = self.dialect == SqlDialect::MySql;
        let oracle = self.dialect == SqlDialect::Oracle;
        let mut i = 0usize;

        while i < len {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            if self.state.in_line_comment {
                self.current.push(c);
                i += 1;
                continue;
            }

            if self.state.in_block_comment {
                self.current.push(c);
                if c == '*' && next == Some('/') {
                    self.current.push('/');
                    self.state.in_block_comment = false;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }

            if self.state.in_q_quote {
                self.current.push(c);
                if Some(c) == self.state.q_quote_end && next == Some('\'') {
                    self.current.push('\'');
                    self.state.in_q_quote = false;
                    self.state.q_quote_end = None;
                    i += 2;
                    continue;
                }
                i += 1;
                continue;
            }

            if self.state.in_single_quote || self.state.in_double_quote || self.state.in_backtick {
                let quote = if self.state.in_single_quote {
                    '\''
                } else if self.state.in_double_quote {
                    '"'
                } else {
                    '`'
                };
                self.current.push(c);
                if mysql && c == '\\' && quote != '`' {
                    if let Some(escaped) = next {
                        self.current.push(escaped);
                        i += 2;
                        continue;
                    }
                }
                if c == quote {
                    if next == Some(quote) {
                        self.current.push(quote);
                        i += 2;
                        continue;
                    }
                    self.state.in_single_quote = false;
                    self.state.in_double_quote = false;
                    self.state.in_backtick = false;
                }
                i += 1;
                continue;
            }

            if c == '-' && next == Some('-') {
                self.state.in_line_comment = true;
                self.current.push_str("--");
                i += 2;
                continue;
            }

            if mysql && c == '#' {
                self.state.in_line_comment = true;
                self.current.push(c);
                i += 1;
                continue;
            }

            if c == '/' && next == Some('*') {
                self.state.in_block_comment = true;
                self.current.push_str("/*");
                i += 2;
                continue;
            }

            if oracle
                && (c == 'n' || c == 'N')
                && matches!(next, Some('q') | Some('Q'))
                && chars.get(i + 2) == Some(&'\'')
            {
                if let Some(&delimiter) = chars.get(i + 3) {
                    self.state.start_q_quote(delimiter);
                    self.current.extend(&chars[i..i + 4]);
                    i += 4;
                    continue;
                }
            }

            if oracle && (c == 'q' || c == 'Q') && next == Some('\'') {
                if let Some(&delimiter) = chars.get(i + 2) {
                    self.state.start_q_quote(delimiter);
                    self.current.extend(&chars[i..i + 3]);
                    i += 3;
                    continue;
                }
            }

            match c {
                '\'' => self.state.in_single_quote = true,
                '"' => self.state.in_double_quote = true,
                '`' if mysql => self.state.in_backtick = true,
                _ => {}
            }
            if !self.state.is_idle() {
                self.current.push(c);
                i += 1;
                continue;
            }

            if chars[i..].starts_with(&self.delimiter) {
                if oracle && ScriptSplitter::is_plsql_unit(&self.current) {
                    // Blocks run until a `/` line; the inner `;` belongs to the body.
                    self.current.push(c);
                    i += 1;
                    continue;
                }
                self.push_current();
                i += self.delimiter.len();
                continue;
            }

            self.current.push(c);
            i += 1;
        }
    }

    fn finalize(mut self) -> Vec<String> {
        self.push_current();
        self.statements
    }
}

/// Dialect-aware statement splitting and the leading-token helpers the
/// classifier and dispatcher share.
pub struct ScriptSplitter;

impl ScriptSplitter {
    /// Split a script into statement texts. Quotes and comments are never
    /// split; whitespace-only segments are dropped. Segments that hold only
    /// comments are kept and left to the classifier to skip.
    pub fn split(sql: &str, dialect: SqlDialect) -> Vec<String> {
        let mut builder = StatementBuilder::new(dialect);
        for line in sql.lines() {
            builder.process_line(line);
        }
        builder.finalize()
    }

    /// `DELIMITER $$` style directive, returning the new terminator.
    fn delimiter_directive(line: &str) -> Option<&str> {
        let (keyword, rest) = line.split_once(char::is_whitespace)?;
        if !keyword.eq_ignore_ascii_case("DELIMITER") {
            return None;
        }
        let delimiter = rest.trim();
        if delimiter.is_empty() || delimiter.contains(char::is_whitespace) {
            return None;
        }
        Some(delimiter)
    }

    /// True for Oracle units terminated by a `/` line rather than `;`.
    pub(crate) fn is_plsql_unit(text: &str) -> bool {
        let cleaned = Self::strip_leading_comments(text).to_uppercase();
        let mut tokens = cleaned.split_whitespace();
        match tokens.next() {
            Some("BEGIN") | Some("DECLARE") => true,
            Some("CREATE") => {
                for token in tokens {
                    match token {
                        "OR" | "REPLACE" | "EDITIONABLE" | "NONEDITIONABLE" => continue,
                        "PROCEDURE" | "FUNCTION" | "PACKAGE" | "TRIGGER" | "TYPE" => {
                            return true
                        }
                        _ => return false,
                    }
                }
                false
            }
            _ => false,
        }
    }

    /// Remove leading whitespace, `--`/`#` line comments and `/* */` block
    /// comments, repeatedly. An all-comment input yields an empty string.
    pub fn strip_leading_comments(sql: &str) -> String {
        let mut remaining = sql;

        loop {
            let trimmed = remaining.trim_start();

            if trimmed.starts_with("--") || trimmed.starts_with('#') {
                if let Some(line_end) = trimmed.find('\n') {
                    remaining = &trimmed[line_end + 1..];
                    continue;
                }
                return String::new();
            }

            if let Some(body) = trimmed.strip_prefix("/*") {
                if let Some(block_end) = body.find("*/") {
                    remaining = &body[block_end + 2..];
                    continue;
                }
                return String::new();
            }

            return trimmed.to_string();
        }
    }

    /// First word of the comment-stripped statement, uppercased.
    /// `None` when nothing but comments and whitespace remain.
    pub fn leading_keyword(sql: &str) -> Option<String> {
        let cleaned = Self::strip_leading_comments(sql);
        if cleaned.is_empty() {
            return None;
        }
        let word: String = cleaned
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();
        Some(word.to_uppercase())
    }

    /// Database named by a bare `USE <name>` statement, unquoted.
    pub fn use_directive_target(sql: &str) -> Option<String> {
        let cleaned = Self::strip_leading_comments(sql);
        let body = cleaned.trim().trim_end_matches(';').trim_end();
        let (keyword, rest) = body.split_once(char::is_whitespace)?;
        if !keyword.eq_ignore_ascii_case("USE") {
            return None;
        }
        Self::unquote_identifier(rest.trim())
    }

    fn unquote_identifier(name: &str) -> Option<String> {
        let mut chars = name.chars();
        let first = chars.next()?;
        let closing = match first {
            '`' => '`',
            '"' => '"',
            '[' => ']',
            _ => {
                if name.contains(char::is_whitespace) {
                    return None;
                }
                return Some(name.to_string());
            }
        };
        let inner = name.strip_prefix(first)?.strip_suffix(closing)?;
        if inner.is_empty() {
            return None;
        }
        let doubled = format!("{closing}{closing}");
        Some(inner.replace(&doubled, &closing.to_string()))
    }
}
