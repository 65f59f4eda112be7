use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::{ast::Statement, dialect::GenericDialect, parser::Parser};

lazy_static! {
  static ref LIMIT_OR_OFFSET: Regex = Regex::new(r"(?i)\b(LIMIT|OFFSET)\b").unwrap();
}

/// Statement kind as far as the engine cares: does it produce a result set,
/// an affected-row count, or an EXPLAIN plan payload. The DML/DDL keyword is
/// kept for user-facing messaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
  Select,
  Insert,
  Update,
  Delete,
  Ddl(String),
  Explain { analyze: bool },
  Other(String),
}

impl StatementKind {
  /// True when executing this statement yields columns and rows rather than
  /// just an affected-row count.
  pub fn returns_rows(&self) -> bool {
    match self {
      StatementKind::Select | StatementKind::Explain { .. } => true,
      StatementKind::Other(keyword) => matches!(keyword.as_str(), "SHOW" | "VALUES" | "TABLE" | "PRAGMA" | "WITH"),
      _ => false,
    }
  }

  /// True only for statements eligible for LIMIT/OFFSET augmentation.
  pub fn is_select_shaped(&self) -> bool {
    matches!(self, StatementKind::Select) || matches!(self, StatementKind::Other(k) if k == "WITH")
  }

  /// Keyword used in status messages ("INSERT completed, 3 rows affected").
  pub fn keyword(&self) -> &str {
    match self {
      StatementKind::Select => "SELECT",
      StatementKind::Insert => "INSERT",
      StatementKind::Update => "UPDATE",
      StatementKind::Delete => "DELETE",
      StatementKind::Ddl(keyword) | StatementKind::Other(keyword) => keyword,
      StatementKind::Explain { .. } => "EXPLAIN",
    }
  }
}

/// Determine the statement kind. The sqlparser verdict wins whenever it maps
/// to a known type; otherwise the first keyword of the comment-stripped text
/// decides. Leading comments and whitespace never affect the result.
pub fn classify(sql: &str) -> StatementKind {
  let stripped = strip_comments(sql);
  let trimmed = stripped.trim();

  if let Ok(statements) = Parser::parse_sql(&GenericDialect {}, trimmed) {
    if let Some(statement) = statements.first() {
      if let Some(kind) = kind_from_ast(statement) {
        return kind;
      }
    }
  }

  kind_from_keyword(trimmed)
}

fn kind_from_ast(statement: &Statement) -> Option<StatementKind> {
  let kind = match statement {
    Statement::Query(_) => StatementKind::Select,
    Statement::Insert(_) => StatementKind::Insert,
    Statement::Update { .. } => StatementKind::Update,
    Statement::Delete(_) => StatementKind::Delete,
    Statement::Explain { analyze, options, .. } => {
      // The bare `EXPLAIN ANALYZE` keyword sets the flag; the parenthesized
      // form `EXPLAIN (ANALYZE, FORMAT JSON)` lands in the options list.
      let analyze = *analyze
        || options.as_ref().map_or(false, |opts| {
          opts.iter().any(|opt| opt.name.value.eq_ignore_ascii_case("analyze") && explain_option_enabled(opt))
        });
      StatementKind::Explain { analyze }
    },
    Statement::CreateTable(_)
    | Statement::CreateView { .. }
    | Statement::CreateIndex(_)
    | Statement::CreateSchema { .. }
    | Statement::CreateDatabase { .. } => StatementKind::Ddl("CREATE".to_string()),
    Statement::Drop { .. } => StatementKind::Ddl("DROP".to_string()),
    Statement::AlterTable { .. } | Statement::AlterIndex { .. } => StatementKind::Ddl("ALTER".to_string()),
    Statement::Truncate { .. } => StatementKind::Ddl("TRUNCATE".to_string()),
    _ => return None,
  };
  Some(kind)
}

fn explain_option_enabled(option: &sqlparser::ast::UtilityOption) -> bool {
  match &option.arg {
    None => true,
    Some(arg) => !matches!(arg.to_string().to_uppercase().as_str(), "FALSE" | "OFF" | "0"),
  }
}

fn kind_from_keyword(stripped: &str) -> StatementKind {
  let keyword = match first_keyword(stripped) {
    Some(keyword) => keyword,
    None => return StatementKind::Other(String::new()),
  };

  match keyword.as_str() {
    "SELECT" => StatementKind::Select,
    "INSERT" => StatementKind::Insert,
    "UPDATE" => StatementKind::Update,
    "DELETE" => StatementKind::Delete,
    "EXPLAIN" => {
      let rest = stripped.trim_start()[7..].to_uppercase();
      StatementKind::Explain { analyze: rest.trim_start().starts_with("ANALYZE") || explain_options_contain(&rest, "ANALYZE") }
    },
    "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "RENAME" | "COMMENT" | "GRANT" | "REVOKE" => StatementKind::Ddl(keyword),
    _ => StatementKind::Other(keyword),
  }
}

fn explain_options_contain(rest: &str, option: &str) -> bool {
  let rest = rest.trim_start();
  if !rest.starts_with('(') {
    return false;
  }
  match rest.find(')') {
    Some(close) => rest[1..close].contains(option),
    None => false,
  }
}

fn first_keyword(sql: &str) -> Option<String> {
  sql
    .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
    .find(|token| !token.is_empty())
    .map(|token| token.to_uppercase())
}

/// Remove `--` line comments and `/* */` block comments, leaving string and
/// quoted-identifier contents untouched. Comments are replaced by a single
/// space so token boundaries survive.
pub fn strip_comments(sql: &str) -> String {
  let mut out = String::with_capacity(sql.len());
  let mut chars = sql.chars().peekable();
  let mut in_string = false;
  let mut in_ident = false;

  while let Some(c) = chars.next() {
    if in_string {
      out.push(c);
      if c == '\'' {
        in_string = false;
      }
      continue;
    }
    if in_ident {
      out.push(c);
      if c == '"' {
        in_ident = false;
      }
      continue;
    }
    match c {
      '\'' => {
        in_string = true;
        out.push(c);
      },
      '"' => {
        in_ident = true;
        out.push(c);
      },
      '-' if chars.peek() == Some(&'-') => {
        for next in chars.by_ref() {
          if next == '\n' {
            out.push('\n');
            break;
          }
        }
      },
      '/' if chars.peek() == Some(&'*') => {
        chars.next();
        let mut prev = ' ';
        for next in chars.by_ref() {
          if prev == '*' && next == '/' {
            break;
          }
          prev = next;
        }
        out.push(' ');
      },
      _ => out.push(c),
    }
  }
  out
}

/// Locate the statement under the cursor in a semicolon-delimited editor
/// buffer. `cursor` is a byte offset into `text`. A cursor sitting on the
/// terminating semicolon still belongs to the statement it ends. Falls back
/// to the only statement when the buffer holds exactly one.
pub fn statement_at_cursor(text: &str, cursor: usize) -> Option<String> {
  let mut offset = 0usize;
  let mut only: Option<&str> = None;
  let mut nonempty = 0usize;
  let mut hit: Option<&str> = None;

  for segment in text.split(';') {
    let start = offset;
    let end = offset + segment.len();
    // +1 so the semicolon itself counts as part of the preceding statement.
    let span_end = if end < text.len() { end + 1 } else { end };

    if !segment.trim().is_empty() {
      nonempty += 1;
      only = Some(segment);
      if hit.is_none() && cursor >= start && cursor < span_end.max(start + 1) {
        hit = Some(segment);
      }
    }
    offset = end + 1;
  }

  // A cursor sitting at the very end of the buffer edits the last statement.
  if hit.is_none() && cursor >= text.len() {
    hit = only;
  }

  let chosen = hit.or(if nonempty == 1 { only } else { None })?;
  let trimmed = chosen.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_string())
  }
}

/// Produce the exact text dispatched to the adapter. SELECT-shaped statements
/// with a positive limit and no LIMIT/OFFSET of their own get `LIMIT <n>`
/// (and `OFFSET <m>` when m > 0) appended. The result always ends with
/// exactly one semicolon.
pub fn prepare_for_execution(statement: &str, kind: &StatementKind, limit: u64, offset: u64) -> String {
  let mut sql = statement.trim().trim_end_matches(';').trim_end().to_string();

  if kind.is_select_shaped() && limit > 0 && !has_limit_or_offset(&sql) {
    sql.push_str(&format!(" LIMIT {limit}"));
    if offset > 0 {
      sql.push_str(&format!(" OFFSET {offset}"));
    }
  }

  sql.push(';');
  sql
}

fn has_limit_or_offset(sql: &str) -> bool {
  LIMIT_OR_OFFSET.is_match(&strip_strings(&strip_comments(sql)))
}

/// Blank out single-quoted strings and double-quoted identifiers so clause
/// scans never match words inside literals.
fn strip_strings(sql: &str) -> String {
  let mut out = String::with_capacity(sql.len());
  let mut quote: Option<char> = None;
  for c in sql.chars() {
    match quote {
      Some(q) => {
        if c == q {
          quote = None;
          out.push(c);
        }
      },
      None => {
        if c == '\'' || c == '"' {
          quote = Some(c);
        }
        out.push(c);
      },
    }
  }
  out
}

/// Wrap a statement in `EXPLAIN (FORMAT JSON)` unless it already carries an
/// EXPLAIN prefix.
pub fn with_explain(sql: &str) -> String {
  let trimmed = sql.trim();
  if trimmed.to_uppercase().starts_with("EXPLAIN") {
    trimmed.to_string()
  } else {
    format!("EXPLAIN (FORMAT JSON) {trimmed}")
  }
}

/// Wrap a statement in `EXPLAIN (ANALYZE, FORMAT JSON)`, adding ANALYZE to an
/// existing options list when the statement is already an EXPLAIN.
pub fn with_explain_analyze(sql: &str) -> String {
  let trimmed = sql.trim();
  let upper = trimmed.to_uppercase();

  if !upper.starts_with("EXPLAIN") {
    return format!("EXPLAIN (ANALYZE, FORMAT JSON) {trimmed}");
  }

  let remaining = trimmed[7..].trim_start();
  if remaining.starts_with('(') {
    match remaining.find(')') {
      Some(close) => {
        let options = &remaining[1..close];
        if options.to_uppercase().contains("ANALYZE") {
          trimmed.to_string()
        } else {
          let query_part = remaining[close + 1..].trim();
          format!("EXPLAIN ({options}, ANALYZE) {query_part}")
        }
      },
      // Malformed options, fall back to the standard form.
      None => format!("EXPLAIN (ANALYZE, FORMAT JSON) {remaining}"),
    }
  } else {
    format!("EXPLAIN (ANALYZE, FORMAT JSON) {remaining}")
  }
}

/// Remove an EXPLAIN prefix (with any parenthesized options) from a
/// statement, returning the bare query.
pub fn strip_explain(sql: &str) -> String {
  let trimmed = sql.trim();
  if !trimmed.to_uppercase().starts_with("EXPLAIN") {
    return trimmed.to_string();
  }

  let mut remaining = trimmed[7..].trim_start();
  if remaining.to_uppercase().starts_with("ANALYZE") {
    remaining = remaining[7..].trim_start();
  }
  if remaining.starts_with('(') {
    if let Some(close) = remaining.find(')') {
      remaining = remaining[close + 1..].trim_start();
    }
  }
  remaining.to_string()
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn classifies_select_behind_comment_and_whitespace() {
    let kind = classify("-- comment\n  select * from t");
    assert_eq!(kind, StatementKind::Select);
  }

  #[test]
  fn classifies_block_comment_prefix() {
    assert_eq!(classify("/* setup */ INSERT INTO t VALUES (1)"), StatementKind::Insert);
    assert_eq!(classify("/* x */ delete from t where id = 1"), StatementKind::Delete);
  }

  #[test]
  fn classifies_ddl_with_keyword() {
    assert_eq!(classify("CREATE TABLE t (id INT)"), StatementKind::Ddl("CREATE".to_string()));
    assert_eq!(classify("drop table t"), StatementKind::Ddl("DROP".to_string()));
    assert_eq!(classify("TRUNCATE TABLE t"), StatementKind::Ddl("TRUNCATE".to_string()));
  }

  #[test]
  fn classifies_explain_variants() {
    assert_eq!(classify("EXPLAIN SELECT 1"), StatementKind::Explain { analyze: false });
    assert_eq!(classify("EXPLAIN ANALYZE SELECT 1"), StatementKind::Explain { analyze: true });
    assert_eq!(classify("EXPLAIN (ANALYZE, FORMAT JSON) SELECT 1"), StatementKind::Explain { analyze: true });
    assert_eq!(classify("EXPLAIN (FORMAT JSON) SELECT 1"), StatementKind::Explain { analyze: false });
  }

  #[test]
  fn falls_back_to_first_keyword_on_unparsable_text() {
    assert_eq!(classify("VACUUM full something"), StatementKind::Other("VACUUM".to_string()));
  }

  #[test]
  fn comment_stripping_preserves_string_contents() {
    let stripped = strip_comments("select '--not a comment' -- real comment\nfrom t");
    assert!(stripped.contains("'--not a comment'"));
    assert!(!stripped.contains("real comment"));
  }

  #[test]
  fn cursor_picks_containing_statement() {
    let text = "select 1; select 2; select 3";
    assert_eq!(statement_at_cursor(text, 2).as_deref(), Some("select 1"));
    assert_eq!(statement_at_cursor(text, 12).as_deref(), Some("select 2"));
    assert_eq!(statement_at_cursor(text, 25).as_deref(), Some("select 3"));
  }

  #[test]
  fn cursor_on_semicolon_belongs_to_preceding_statement() {
    let text = "select 1; select 2";
    assert_eq!(statement_at_cursor(text, 8).as_deref(), Some("select 1"));
  }

  #[test]
  fn single_statement_wins_regardless_of_cursor() {
    assert_eq!(statement_at_cursor("  select * from t  ", 0).as_deref(), Some("select * from t"));
  }

  #[test]
  fn empty_buffer_yields_none() {
    assert_eq!(statement_at_cursor("   ;  ; ", 3), None);
  }

  #[test]
  fn appends_limit_and_offset_once() {
    let sql = prepare_for_execution("select * from t", &StatementKind::Select, 100, 200);
    assert_eq!(sql, "select * from t LIMIT 100 OFFSET 200;");
    assert_eq!(sql.matches(';').count(), 1);
  }

  #[test]
  fn zero_offset_is_omitted() {
    let sql = prepare_for_execution("select * from t;", &StatementKind::Select, 50, 0);
    assert_eq!(sql, "select * from t LIMIT 50;");
  }

  #[test]
  fn existing_limit_is_left_alone() {
    let sql = prepare_for_execution("select * from t limit 5", &StatementKind::Select, 100, 0);
    assert_eq!(sql, "select * from t limit 5;");
  }

  #[test]
  fn zero_limit_disables_augmentation() {
    let sql = prepare_for_execution("select * from t", &StatementKind::Select, 0, 10);
    assert_eq!(sql, "select * from t;");
  }

  #[test]
  fn limit_inside_a_string_literal_does_not_block_pagination() {
    let sql = prepare_for_execution("select * from notes where note = 'no limit'", &StatementKind::Select, 100, 0);
    assert_eq!(sql, "select * from notes where note = 'no limit' LIMIT 100;");
  }

  #[test]
  fn dml_is_never_paginated() {
    let sql = prepare_for_execution("delete from t", &StatementKind::Delete, 100, 0);
    assert_eq!(sql, "delete from t;");
  }

  #[test]
  fn trailing_semicolons_collapse_to_one() {
    let sql = prepare_for_execution("select 1;;;", &StatementKind::Select, 0, 0);
    assert_eq!(sql, "select 1;");
  }

  #[test]
  fn explain_wrapping_respects_existing_prefix() {
    assert_eq!(with_explain("select 1"), "EXPLAIN (FORMAT JSON) select 1");
    assert_eq!(with_explain("EXPLAIN select 1"), "EXPLAIN select 1");
    assert_eq!(with_explain_analyze("EXPLAIN (FORMAT JSON) select 1"), "EXPLAIN (FORMAT JSON, ANALYZE) select 1");
    assert_eq!(with_explain_analyze("EXPLAIN (ANALYZE) select 1"), "EXPLAIN (ANALYZE) select 1");
  }

  #[test]
  fn strip_explain_unwraps_options() {
    assert_eq!(strip_explain("EXPLAIN (ANALYZE, BUFFERS) select 1"), "select 1");
    assert_eq!(strip_explain("explain select 2"), "select 2");
    assert_eq!(strip_explain("select 3"), "select 3");
  }
}
