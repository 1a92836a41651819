//! SQL safety validation
//!
//! Pure text checks that run before any statement reaches a backend driver:
//! a read-only gate, a common blocklist, per-dialect blocklists, and LIMIT
//! injection. This is a fast heuristic over the raw SQL, not a parser — a
//! semicolon or keyword inside a string literal is matched like any other
//! text. That trade-off is deliberate; see the multi-statement note below.

use once_cell::sync::Lazy;
use regex::RegexSet;

use crate::errors::ValidationError;

/// Mutation keywords and file-exfiltration primitives no dialect may run.
pub static COMMON_BLOCKLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\binsert\b",
        r"(?i)\bupdate\b",
        r"(?i)\bdelete\b",
        r"(?i)\bdrop\b",
        r"(?i)\btruncate\b",
        r"(?i)\balter\b",
        r"(?i)\bcreate\b",
        r"(?i)\bgrant\b",
        r"(?i)\brevoke\b",
        r"(?i)\bexec\b",
        r"(?i)\bexecute\b",
        r"(?i)\binto\s+outfile\b",
        r"(?i)\binto\s+dumpfile\b",
        r"(?i)\bload_file\b",
        r"(?i)\bload\s+data\b",
    ])
    .expect("common blocklist patterns are valid")
});

/// Postgres file/server-side escape hatches.
pub static POSTGRES_BLOCKLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bpg_read_file\b",
        r"(?i)\bpg_read_binary_file\b",
        r"(?i)\bpg_ls_dir\b",
        r"(?i)\blo_import\b",
        r"(?i)\blo_export\b",
        r"(?i)\bcopy\b",
        r"(?i)\bdblink\b",
    ])
    .expect("postgres blocklist patterns are valid")
});

pub static MYSQL_BLOCKLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\binto\s+outfile\b",
        r"(?i)\binto\s+dumpfile\b",
        r"(?i)\bload_file\b",
        r"(?i)\bload\s+data\b",
        r"(?i)\bbenchmark\s*\(",
        r"(?i)\bsleep\s*\(",
    ])
    .expect("mysql blocklist patterns are valid")
});

pub static SQLITE_BLOCKLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\battach\b",
        r"(?i)\bdetach\b",
        r"(?i)\bload_extension\b",
        r"(?i)\breadfile\b",
        r"(?i)\bwritefile\b",
    ])
    .expect("sqlite blocklist patterns are valid")
});

/// ClickHouse table functions that reach outside the configured database:
/// local/remote files and cross-engine sources.
pub static CLICKHOUSE_BLOCKLIST: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bfile\s*\(",
        r"(?i)\burl\s*\(",
        r"(?i)\bremote(Secure)?\s*\(",
        r"(?i)\bs3\s*\(",
        r"(?i)\bhdfs\s*\(",
        r"(?i)\bmysql\s*\(",
        r"(?i)\bpostgresql\s*\(",
        r"(?i)\bmongodb\s*\(",
        r"(?i)\bjdbc\s*\(",
        r"(?i)\bodbc\s*\(",
        r"(?i)\bexecutable\s*\(",
    ])
    .expect("clickhouse blocklist patterns are valid")
});

/// Drop leading whitespace, `--` line comments and `/* */` blocks so a
/// statement hidden behind a comment is still seen by the keyword checks.
fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = match after.find('\n') {
                Some(idx) => after[idx + 1..].trim_start(),
                None => "",
            };
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = match after.find("*/") {
                Some(idx) => after[idx + 2..].trim_start(),
                // Unterminated block comment: nothing executable follows.
                None => "",
            };
        } else {
            return rest;
        }
    }
}

fn leading_keyword(sql: &str) -> &str {
    let end = sql
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(sql.len());
    &sql[..end]
}

/// Validate one statement against the read-only rules plus `extra`, the
/// calling adapter's dialect blocklist.
///
/// Multi-statement detection counts top-level `;` after stripping one
/// trailing terminator. A `;` inside a string literal is a false positive —
/// a known limitation of the heuristic, kept conservative on purpose.
pub fn validate_sql(sql: &str, extra: &RegexSet) -> Result<(), ValidationError> {
    let body = strip_leading_comments(sql);
    if body.is_empty() {
        return Err(ValidationError::EmptyQuery);
    }

    let body = body.trim_end();
    let single = body.strip_suffix(';').unwrap_or(body);
    if single.contains(';') {
        return Err(ValidationError::MultipleStatements);
    }

    let keyword = leading_keyword(single);
    if !keyword.eq_ignore_ascii_case("select") && !keyword.eq_ignore_ascii_case("with") {
        return Err(ValidationError::NotReadOnly);
    }

    if COMMON_BLOCKLIST.is_match(single) || extra.is_match(single) {
        return Err(ValidationError::BlockedPattern);
    }

    Ok(())
}

/// Append a row cap unless the statement already carries the dialect's
/// limit keyword. The presence check is a case-insensitive substring test,
/// which makes the function idempotent over its own output. Applied at
/// execution time only, after validation has passed.
pub fn enforce_limit(sql: &str, max_rows: u32, limit_keyword: &str) -> String {
    let lowered = sql.to_lowercase();
    if lowered.contains(&limit_keyword.to_lowercase()) {
        return sql.to_string();
    }
    let trimmed = sql.trim_end().trim_end_matches(';').trim_end();
    format!("{} {} {}", trimmed, limit_keyword, max_rows)
}
