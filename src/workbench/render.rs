use crate::db::query::RowSet;
use crate::workbench::result_tabs::{ResultPayload, ResultTab};

const NULL_TEXT: &str = "NULL";
const ELLIPSIS: &str = "...";

/// Plain-text rendering of one result tab.
pub fn render_tab(tab: &ResultTab, max_cell_chars: usize) -> String {
    match &tab.payload {
        ResultPayload::RowSet(rows) => {
            let mut out = render_row_set(rows, max_cell_chars);
            out.push_str(&format!("({})\n", row_count_label(rows.row_count())));
            out
        }
        ResultPayload::Update {
            affected_rows,
            last_insert_id,
        } => {
            let mut out = format!("{}\n", affected_label(*affected_rows));
            if let Some(id) = last_insert_id {
                out.push_str(&format!("Last insert id: {id}\n"));
            }
            out
        }
        ResultPayload::Error { message } => {
            format!("Error: {message}\nStatement: {}\n", tab.source_sql.trim())
        }
    }
}

pub fn row_count_label(count: usize) -> String {
    if count == 1 {
        "1 row".to_string()
    } else {
        format!("{count} rows")
    }
}

pub fn affected_label(count: u64) -> String {
    if count == 1 {
        "1 row affected".to_string()
    } else {
        format!("{count} rows affected")
    }
}

fn display_cell(value: Option<&str>, max_chars: usize) -> String {
    let text = match value {
        Some(text) => text.replace(['\r', '\n', '\t'], " "),
        None => return NULL_TEXT.to_string(),
    };
    if max_chars == 0 || text.chars().count() <= max_chars {
        return text;
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut truncated: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Aligned grid with a header rule. `max_cell_chars == 0` disables truncation.
pub fn render_row_set(rows: &RowSet, max_cell_chars: usize) -> String {
    if rows.columns.is_empty() {
        return String::new();
    }

    let header: Vec<String> = rows
        .columns
        .iter()
        .map(|col| display_cell(Some(&col.name), max_cell_chars))
        .collect();
    let body: Vec<Vec<String>> = rows
        .rows
        .iter()
        .map(|row| {
            (0..header.len())
                .map(|i| display_cell(row.get(i).and_then(|v| v.as_deref()), max_cell_chars))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &body {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let format_line = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let pad = width.saturating_sub(cell.chars().count());
                format!("{cell}{}", " ".repeat(pad))
            })
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = format_line(&header);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&rule.join("-+-"));
    out.push('\n');
    for row in &body {
        out.push_str(&format_line(row));
    }
    out
}
