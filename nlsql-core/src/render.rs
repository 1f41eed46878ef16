//! Result-set rendering for hosts: an HTML table for web clients and a text
//! grid for terminals.

use nlsql_types::QueryResult;
use serde_json::Value;

pub const NO_RESULTS_HTML: &str = "<p>No results found.</p>";
pub const NO_RESULTS_TEXT: &str = "No results found.";

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

pub fn render_html_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return NO_RESULTS_HTML.into();
    }
    let mut html = String::from("<table class=\"table table-striped table-bordered\">\n  <thead>\n    <tr>\n");
    for col in &result.columns {
        html.push_str(&format!("      <th>{}</th>\n", escape_html(col)));
    }
    html.push_str("    </tr>\n  </thead>\n  <tbody>\n");
    for row in &result.rows {
        html.push_str("    <tr>\n");
        for value in result.values(row) {
            html.push_str(&format!("      <td>{}</td>\n", escape_html(&cell(&value))));
        }
        html.push_str("    </tr>\n");
    }
    html.push_str("  </tbody>\n</table>");
    html
}

pub fn render_text_table(result: &QueryResult) -> String {
    if result.is_empty() {
        return NO_RESULTS_TEXT.into();
    }
    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|r| result.values(r).iter().map(cell).collect())
        .collect();

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.chars().count()).collect();
    for row in &rows {
        for (w, v) in widths.iter_mut().zip(row) {
            *w = (*w).max(v.chars().count());
        }
    }

    let border = {
        let parts: Vec<String> = widths.iter().map(|w| "-".repeat(w + 2)).collect();
        format!("+{}+", parts.join("+"))
    };
    let line = |cells: &[String]| {
        let parts: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!(" {c:<width$} ", width = *w))
            .collect();
        format!("|{}|", parts.join("|"))
    };

    let mut out = vec![border.clone(), line(&result.columns), border.clone()];
    for row in &rows {
        out.push(line(row));
    }
    out.push(border);
    out.join("\n")
}
