//! Lightweight statement inspection: the simulator-only query filter and
//! transaction-state tracking.

use sqlparser::ast::{CreateTable, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

const BOOST_VARIABLE: &str = "@@boost_cached_queries";

/// Statements that open, close or implicitly commit a transaction.
const TRANSACTION_KEYWORDS: &[&str] = &[
    "BEGIN", "START", "COMMIT", "ROLLBACK", "CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME",
    "LOCK",
];

/// Bytes tokenized when looking for the leading keywords.
const KEYWORD_SCAN_BYTES: usize = 512;

/// Returns true for statements the gateway acknowledges without running.
///
/// Two forms are filtered:
/// - `SET @@boost_cached_queries ...`, a gateway-only session variable
/// - `USE ...` whose argument contains `@`, a keyspace/branch selector
///   the backend does not understand
pub fn is_query_filtered(query: &str) -> bool {
    let query = query.trim();
    let (Some(head), Some(rest)) = (query.get(..4), query.get(4..)) else {
        return false;
    };

    if head.eq_ignore_ascii_case("set ") {
        let target = rest.trim_start();
        return target
            .get(..BOOST_VARIABLE.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BOOST_VARIABLE));
    }
    if head.eq_ignore_ascii_case("use ") {
        return rest.contains('@');
    }
    false
}

/// Transaction state after `query` succeeds, or `None` when the statement
/// leaves it unchanged.
pub fn transaction_state_after(query: &str) -> Option<bool> {
    let keywords = leading_keywords(query)?;
    let first = keywords.first()?.as_str();
    let second = keywords.get(1).map(String::as_str);
    if !TRANSACTION_KEYWORDS.contains(&first) {
        return None;
    }
    if first == "LOCK" {
        return matches!(second, Some("TABLES" | "TABLE")).then_some(false);
    }

    match Parser::parse_sql(&MySqlDialect {}, query) {
        Ok(statements) => statements.iter().rev().find_map(statement_effect),
        Err(_) => unparsed_effect(first, second),
    }
}

/// First two keywords of `query`, skipping whitespace and comments.
fn leading_keywords(query: &str) -> Option<Vec<String>> {
    let dialect = MySqlDialect {};
    let mut cut = query.len().min(KEYWORD_SCAN_BYTES);
    while !query.is_char_boundary(cut) {
        cut -= 1;
    }
    // A cut inside a literal or comment fails to tokenize; retry on the whole text.
    let tokens = Tokenizer::new(&dialect, &query[..cut])
        .tokenize()
        .or_else(|_| Tokenizer::new(&dialect, query).tokenize())
        .ok()?;

    Some(
        tokens
            .into_iter()
            .filter(|token| !matches!(token, Token::Whitespace(_)))
            .take(2)
            .map_while(|token| match token {
                Token::Word(word) => Some(word.value.to_ascii_uppercase()),
                _ => None,
            })
            .collect(),
    )
}

fn statement_effect(statement: &Statement) -> Option<bool> {
    match statement {
        Statement::StartTransaction { .. } => Some(true),
        Statement::Commit { chain, .. } => Some(*chain),
        Statement::Rollback {
            savepoint: Some(_), ..
        } => None,
        Statement::Rollback { chain, .. } => Some(*chain),
        Statement::CreateTable(CreateTable {
            temporary: false, ..
        })
        | Statement::Drop {
            temporary: false, ..
        }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateDatabase { .. }
        | Statement::AlterTable { .. }
        | Statement::Truncate { .. } => Some(false),
        _ => None,
    }
}

/// Effect of statements sqlparser rejects, judged by their leading keywords.
fn unparsed_effect(first: &str, second: Option<&str>) -> Option<bool> {
    match (first, second) {
        ("BEGIN", _) | ("START", Some("TRANSACTION")) => Some(true),
        ("START", _) | ("ROLLBACK", Some("TO")) => None,
        ("CREATE" | "DROP", Some("TEMPORARY")) => None,
        // MySQL-only DDL still commits implicitly.
        _ => Some(false),
    }
}
