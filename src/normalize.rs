//! SQL text canonicalisation.
//!
//! Queries that differ only in literal values, comments or optimizer hints
//! should land in the same aggregation group. [`normalize_sql`] rewrites a
//! raw query into that canonical form and [`fingerprint`] hashes it into the
//! 32-character hex key used throughout the crate.

use once_cell::sync::Lazy;
use regex::Regex;

// Statically compiled regular expressions for the normalisation pipeline.
// The substitution order below is load-bearing: hint forms must be removed
// before plain block comments, and all comment forms before literals.
static RE_HINT_VERSIONED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*![0-9]{5}.*?\*/").unwrap());
static RE_HINT_SIMPLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*!.*?\*/").unwrap());
static RE_HINT_EXECUTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*\+.*?\*/").unwrap());
static RE_BLOCK_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());
static RE_LINE_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--[^\n]*$").unwrap());
static RE_IN_LIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bIN\s*\((?:[^()]*|\([^()]*\))*\)").unwrap());
static RE_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*""#).unwrap());
static RE_NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)?\b").unwrap());
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

static RE_FROM_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bfrom\s+([`"\w.\-]+)"#).unwrap());
static RE_UPDATE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bupdate\s+([`"\w.\-]+)"#).unwrap());
static RE_INTO_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\binto\s+([`"\w.\-]+)"#).unwrap());

/// Rewrites a raw SQL statement into its canonical, parameter-free form.
///
/// Versioned (`/*!40001 ... */`), simple (`/*! ... */`) and executor
/// (`/*+ ... */`) hints are dropped first, then ordinary comments, then
/// `IN (...)` lists, string and numeric literals collapse to `?`. The result
/// is whitespace-collapsed, stripped of a trailing semicolon and lowercased.
///
/// A block comment whose body is exactly `TRUNCATED` survives: it is the
/// marker appended to tail-truncated queries and must stay visible in the
/// canonical form.
pub fn normalize_sql(sql: &str) -> String {
    let s = sql.trim();

    let s = RE_HINT_VERSIONED.replace_all(s, " ");
    let s = RE_HINT_SIMPLE.replace_all(&s, " ");
    let s = RE_HINT_EXECUTOR.replace_all(&s, " ");
    let s = RE_BLOCK_COMMENT.replace_all(&s, |caps: &regex::Captures| {
        let m = &caps[0];
        let body = &m[2..m.len() - 2];
        if body.trim().eq_ignore_ascii_case("truncated") {
            m.to_string()
        } else {
            " ".to_string()
        }
    });
    let s = RE_LINE_COMMENT.replace_all(&s, " ");

    let s = RE_IN_LIST.replace_all(&s, " IN (?) ");
    let s = RE_STRING.replace_all(&s, "?");
    let s = RE_NUMERIC.replace_all(&s, "?");

    let s = RE_WHITESPACE.replace_all(&s, " ");
    s.trim_end_matches([';', ' ']).trim().to_lowercase()
}

/// 128-bit MD5 digest of the canonical form, as lowercase hex.
pub fn fingerprint(sql: &str) -> String {
    format!("{:x}", md5::compute(normalize_sql(sql).as_bytes()))
}

/// Best-effort guess of the table a query is mainly about.
///
/// Looks for the first `FROM <ident>`, then `UPDATE <ident>`, then
/// `INTO <ident>` in the raw text. Not part of the fingerprint.
pub fn extract_main_table(sql: &str) -> Option<String> {
    RE_FROM_TABLE
        .captures(sql)
        .or_else(|| RE_UPDATE_TABLE.captures(sql))
        .or_else(|| RE_INTO_TABLE.captures(sql))
        .map(|caps| caps[1].trim_matches(['`', '"']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_versioned_hint_and_literals() {
        let sql = "SELECT * FROM t WHERE id = 42 AND name = 'bob' /*!40001 SQL_NO_CACHE */;";
        assert_eq!(normalize_sql(sql), "select * from t where id = ? and name = ?");
    }

    #[test]
    fn strips_executor_hint_and_collapses_in_list() {
        let sql = "SELECT /*+ USE_INDEX(t idx) */ a FROM t WHERE x IN (1,2,3);";
        assert_eq!(normalize_sql(sql), "select a from t where x in (?)");
    }

    #[test]
    fn strips_line_comment() {
        let sql = "SELECT 1; -- trailing comment\n";
        assert_eq!(normalize_sql(sql), "select ?");
    }

    #[test]
    fn collapses_nested_in_list() {
        let sql = "SELECT a FROM t WHERE x IN (1, (2), 3)";
        assert_eq!(normalize_sql(sql), "select a from t where x in (?)");
    }

    #[test]
    fn strips_simple_hint_and_block_comment() {
        let sql = "SELECT /*!STRAIGHT_JOIN */ a /* pick the fast plan */ FROM t";
        assert_eq!(normalize_sql(sql), "select a from t");
    }

    #[test]
    fn keeps_truncated_marker() {
        let sql = "SELECT * FROM t WHERE id = 7 /* TRUNCATED */";
        assert_eq!(normalize_sql(sql), "select * from t where id = ? /* truncated */");
    }

    #[test]
    fn redacts_escaped_strings() {
        let sql = r#"SELECT a FROM t WHERE s = 'it\'s' AND d = "a \"b\"""#;
        assert_eq!(normalize_sql(sql), "select a from t where s = ? and d = ?");
    }

    #[test]
    fn is_idempotent() {
        let inputs = [
            "SELECT * FROM t WHERE id = 42 AND name = 'bob' /*!40001 SQL_NO_CACHE */;",
            "SELECT /*+ USE_INDEX(t idx) */ a FROM t WHERE x IN (1,2,3);",
            "UPDATE orders SET total = 10.5 WHERE id IN (1, 2) -- fixup",
            "SELECT * FROM t WHERE id = 7 /* TRUNCATED */",
        ];
        for sql in inputs {
            let once = normalize_sql(sql);
            assert_eq!(normalize_sql(&once), once, "not idempotent for {sql:?}");
        }
    }

    #[test]
    fn fingerprint_ignores_literals_but_not_columns() {
        let a = fingerprint("SELECT * FROM t WHERE id = 1");
        let b = fingerprint("SELECT * FROM t WHERE id = 999");
        let c = fingerprint("SELECT id FROM t WHERE id = 1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.bytes().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn main_table_from_update_into() {
        assert_eq!(extract_main_table("SELECT * FROM users WHERE id = 1"), Some("users".into()));
        assert_eq!(extract_main_table("UPDATE `orders` SET x = 1"), Some("orders".into()));
        assert_eq!(extract_main_table("INSERT INTO db1.logs VALUES (1)"), Some("db1.logs".into()));
        assert_eq!(extract_main_table("COMMIT"), None);
    }
}
