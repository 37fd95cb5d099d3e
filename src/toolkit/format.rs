//! Output formatting for tool results.
//!
//! Query results are returned to the agent as markdown tables; sample rows in
//! table descriptions use [`format_value`] directly.

use crate::models::QueryResult;
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Escape a cell so it can't break the table layout.
fn markdown_cell(value: &JsonValue) -> String {
    format_value(value)
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace('\n', " ")
}

/// Render a result as a padded markdown table with a row count footer.
pub fn format_as_markdown(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let header: Vec<String> = result
        .columns
        .iter()
        .map(|c| c.name.replace('|', "\\|"))
        .collect();
    let cells: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| {
            (0..header.len())
                .map(|i| markdown_cell(row.get(i).unwrap_or(&JsonValue::Null)))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.width().max(3)).collect();
    for row in &cells {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.width());
        }
    }

    let pad = |s: &str, w: usize| format!("{}{}", s, " ".repeat(w.saturating_sub(s.width())));

    let mut output = String::new();
    let header_line: String = header
        .iter()
        .zip(&widths)
        .map(|(h, w)| format!("| {} ", pad(h, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header_line);

    let sep: String = widths
        .iter()
        .map(|w| format!("|{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "|\n";
    output.push_str(&sep);

    for row in &cells {
        let row_str: String = row
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("| {} ", pad(cell, *w)))
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    let row_count = result.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    if result.truncated {
        output.push_str(&format!(
            "\n*{} of {} rows shown (truncated). Add a LIMIT or aggregate to see the rest.*",
            row_count, result.total_rows
        ));
    } else {
        output.push_str(&format!("\n*{} {}*", row_count, row_text));
    }

    output
}
