//! Text-level SQL rules for the Trino dialect.
//!
//! Everything here is deterministic string work: fence stripping, rewriting
//! common foreign-dialect functions, naming the constructs Trino rejects, and
//! the read-only gate applied right before execution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny(String),
}

/// Function rewrites applied before issue detection, in order.
static REWRITES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bNOW\s*\(\s*\)", "current_timestamp"),
        (r"(?i)\bGETDATE\s*\(\s*\)", "current_timestamp"),
        (r"(?i)\bSYSDATE\s*\(\s*\)", "current_timestamp"),
        (r"(?i)\bIFNULL\s*\(", "coalesce("),
        (r"(?i)\bISNULL\s*\(", "coalesce("),
        (r"(?i)\bNVL\s*\(", "coalesce("),
    ]
    .into_iter()
    .map(|(pat, repl)| (Regex::new(pat).unwrap(), repl))
    .collect()
});

// operand: quoted literal, function call (name directly followed by its
// argument list), parenthesized expression, or a (dotted) identifier.
// Argument lists may nest one level, so CAST(x AS decimal(10, 2)) is one operand.
// target: type name with an optional precision list, e.g. decimal(10, 2).
static PG_CAST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"('[^']*'|\w+(?:\.\w+)*\((?:[^()]|\([^()]*\))*\)|\((?:[^()]|\([^()]*\))*\)|\w+(?:\.\w+)*)\s*::\s*(\w+(?:\s*\(\s*\d+(?:\s*,\s*\d+)*\s*\))?)",
    )
    .unwrap()
});

static MUTATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(DROP|TRUNCATE|DELETE|UPDATE|MERGE|ALTER|CREATE|INSERT|REPLACE)\b").unwrap()
});

/// Constructs Trino does not accept, reported by name to the repair prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectIssue {
    Backticks,
    TopClause,
    DateSub,
    StrToDate,
    GetdateNow,
    IntervalKeyword,
    AutoIncrement,
    Ifnull,
    Isnull,
    Nvl,
    FromUnixtime,
    UnixTimestamp,
    WithTies,
    PostgresCast,
    Ddl,
}

impl DialectIssue {
    pub const ALL: [DialectIssue; 15] = [
        DialectIssue::Backticks,
        DialectIssue::TopClause,
        DialectIssue::DateSub,
        DialectIssue::StrToDate,
        DialectIssue::GetdateNow,
        DialectIssue::IntervalKeyword,
        DialectIssue::AutoIncrement,
        DialectIssue::Ifnull,
        DialectIssue::Isnull,
        DialectIssue::Nvl,
        DialectIssue::FromUnixtime,
        DialectIssue::UnixTimestamp,
        DialectIssue::WithTies,
        DialectIssue::PostgresCast,
        DialectIssue::Ddl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DialectIssue::Backticks => "backticks",
            DialectIssue::TopClause => "top_clause",
            DialectIssue::DateSub => "date_sub",
            DialectIssue::StrToDate => "str_to_date",
            DialectIssue::GetdateNow => "getdate_now",
            DialectIssue::IntervalKeyword => "interval_keyword",
            DialectIssue::AutoIncrement => "auto_increment",
            DialectIssue::Ifnull => "ifnull",
            DialectIssue::Isnull => "isnull",
            DialectIssue::Nvl => "nvl",
            DialectIssue::FromUnixtime => "from_unixtime",
            DialectIssue::UnixTimestamp => "unix_timestamp",
            DialectIssue::WithTies => "with_ties",
            DialectIssue::PostgresCast => "postgres_cast",
            DialectIssue::Ddl => "ddl",
        }
    }

    fn pattern(&self) -> &'static str {
        match self {
            DialectIssue::Backticks => r"`",
            DialectIssue::TopClause => r"(?i)\bTOP\b",
            DialectIssue::DateSub => r"(?i)\bDATE_SUB\b",
            DialectIssue::StrToDate => r"(?i)\bSTR_TO_DATE\b",
            DialectIssue::GetdateNow => r"(?i)\b(NOW\(|GETDATE\(|SYSDATE\()",
            DialectIssue::IntervalKeyword => r"(?i)\bINTERVAL\b",
            DialectIssue::AutoIncrement => r"(?i)\bAUTO_INCREMENT\b",
            DialectIssue::Ifnull => r"(?i)\bIFNULL\b",
            DialectIssue::Isnull => r"(?i)\bISNULL\b",
            DialectIssue::Nvl => r"(?i)\bNVL\s*\(",
            DialectIssue::FromUnixtime => r"(?i)\bFROM_UNIXTIME\b",
            DialectIssue::UnixTimestamp => r"(?i)\bUNIX_TIMESTAMP\b",
            DialectIssue::WithTies => r"(?i)\bWITH\s+TIES\b",
            DialectIssue::PostgresCast => r"::\s*\w+",
            DialectIssue::Ddl => r"(?i)\b(DROP|TRUNCATE|DELETE|UPDATE|MERGE|ALTER|CREATE)\b",
        }
    }
}

impl std::fmt::Display for DialectIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static ISSUE_CHECKS: Lazy<Vec<(DialectIssue, Regex)>> = Lazy::new(|| {
    DialectIssue::ALL
        .iter()
        .map(|issue| (*issue, Regex::new(issue.pattern()).unwrap()))
        .collect()
});

/// Remove a surrounding Markdown code fence (with or without a language tag).
pub fn strip_code_fences(sql: &str) -> String {
    let sql = sql.trim();
    if !sql.starts_with("```") {
        return sql.to_string();
    }
    let lines: Vec<&str> = sql.lines().collect();
    let body = match lines.last() {
        Some(last) if lines.len() > 1 && last.trim() == "```" => &lines[1..lines.len() - 1],
        _ => &lines[1..],
    };
    body.join("\n").trim().to_string()
}

/// Rewrite common non-Trino constructs into Trino equivalents.
///
/// Idempotent: normalizing already-normalized SQL returns it unchanged.
pub fn normalize(sql: &str) -> String {
    let mut out = sql.to_string();
    for (re, repl) in REWRITES.iter() {
        out = re.replace_all(&out, *repl).into_owned();
    }
    // backticks before casts, so `col`::int is rewritten too
    out = out.replace('`', "");
    rewrite_casts(out)
}

/// Rewrite `x::t` one cast at a time, leftmost first, until none matches.
/// In a chain like `x::int::varchar` the next operand is the previous rewrite.
/// Each pass removes one `::`, so the loop is bounded.
fn rewrite_casts(mut sql: String) -> String {
    loop {
        let next = PG_CAST.replacen(&sql, 1, "CAST($1 AS $2)").into_owned();
        if next == sql {
            return sql;
        }
        sql = next;
    }
}

/// Fence stripping followed by normalization.
pub fn sanitize(sql: &str) -> String {
    normalize(&strip_code_fences(sql))
}

/// Every issue whose pattern matches, in declaration order.
pub fn detect_issues(sql: &str) -> Vec<DialectIssue> {
    ISSUE_CHECKS
        .iter()
        .filter(|(_, re)| re.is_match(sql))
        .map(|(issue, _)| *issue)
        .collect()
}

/// Read-only gate: deny any statement containing a mutating keyword.
pub fn check_read_only(sql: &str) -> PolicyDecision {
    match MUTATING.find(sql) {
        Some(m) => PolicyDecision::Deny(m.as_str().to_uppercase()),
        None => PolicyDecision::Allow,
    }
}

/// Drop trailing statement terminators and whitespace.
pub fn strip_trailing_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}
