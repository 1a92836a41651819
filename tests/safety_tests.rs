//! End-to-end checks of the safety validator against the statements an
//! LLM (or an attacker steering one) is likely to produce.

use regex::RegexSet;
use sqlgate::ValidationError;
use sqlgate::safety::{
    CLICKHOUSE_BLOCKLIST, MYSQL_BLOCKLIST, POSTGRES_BLOCKLIST, SQLITE_BLOCKLIST, enforce_limit,
    validate_sql,
};

fn no_dialect() -> RegexSet {
    RegexSet::empty()
}

#[test]
fn rejects_everything_that_does_not_start_with_select_or_with() {
    for sql in [
        "INSERT INTO users VALUES (1)",
        "  update users set admin = true",
        "\tDELETE FROM users",
        "DROP TABLE users",
        "TRUNCATE users",
        "GRANT ALL ON users TO intruder",
        "EXPLAIN ANALYZE SELECT 1",
        "VACUUM",
        "BEGIN",
    ] {
        assert!(validate_sql(sql, &no_dialect()).is_err(), "{sql}");
    }
    assert!(validate_sql("SELECT 1", &no_dialect()).is_ok());
    assert!(validate_sql("  with x as (select 1) select * from x", &no_dialect()).is_ok());
}

#[test]
fn blocklist_matches_are_case_insensitive() {
    for sql in [
        "SELECT 1 FROM t WHERE 1=1 UNION SELECT * FROM x WHERE y = 0 OR DrOp",
        "SELECT * FROM t InTo OuTfIlE '/tmp/x'",
        "SELECT LoAd_FiLe('/etc/passwd')",
        "WITH x AS (SELECT 1) SELECT TRUNCATE",
    ] {
        assert_eq!(
            validate_sql(sql, &no_dialect()),
            Err(ValidationError::BlockedPattern),
            "{sql}"
        );
    }
}

#[test]
fn enforce_limit_is_idempotent() {
    let once = enforce_limit("SELECT * FROM users", 50, "LIMIT");
    let twice = enforce_limit(&once, 50, "LIMIT");
    assert_eq!(once, twice);
}

#[test]
fn enforce_limit_appends_when_missing() {
    let out = enforce_limit("SELECT id FROM events ORDER BY id;", 100, "LIMIT");
    assert!(out.ends_with("LIMIT 100"), "{out}");
    assert!(!out.contains(';'));
}

#[test]
fn multi_statement_injection_is_rejected() {
    assert_eq!(
        validate_sql("SELECT * FROM users; DROP TABLE users", &no_dialect()),
        Err(ValidationError::MultipleStatements)
    );
}

#[test]
fn enforce_limit_concrete_scenario() {
    assert_eq!(
        enforce_limit("SELECT * FROM users", 50, "LIMIT"),
        "SELECT * FROM users LIMIT 50"
    );
}

#[test]
fn dialect_specific_patterns_only_trip_their_own_dialect() {
    let sql = "SELECT pg_read_file('/etc/passwd')";
    assert_eq!(
        validate_sql(sql, &POSTGRES_BLOCKLIST),
        Err(ValidationError::BlockedPattern)
    );
    assert!(validate_sql(sql, &SQLITE_BLOCKLIST).is_ok());

    let sql = "SELECT * FROM s3('https://bucket/x.parquet')";
    assert_eq!(
        validate_sql(sql, &CLICKHOUSE_BLOCKLIST),
        Err(ValidationError::BlockedPattern)
    );
    assert!(validate_sql(sql, &MYSQL_BLOCKLIST).is_ok());
}

#[test]
fn validation_errors_stay_generic() {
    // Rejections must not leak which pattern fired.
    let err = validate_sql("SELECT pg_read_file('/etc/passwd')", &POSTGRES_BLOCKLIST)
        .unwrap_err()
        .to_string();
    assert!(!err.contains("pg_read_file"));
}
