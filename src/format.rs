//! Rendering of SQL text and bound arguments into the `db.statement` attribute.

use std::sync::Arc;

use crate::arg::Arg;

/// Renders a statement and its arguments into a single string for tracing.
pub type SqlFormatter = Arc<dyn Fn(&str, &[Arg]) -> String + Send + Sync>;

/// Append the JSON form of the argument list to the SQL text.
///
/// Argument lists without a structured form (see [`Arg::Opaque`]) are
/// rendered as plain text instead, so this never fails.
///
/// ```rust
/// use sea_orm_otel::{default_format_sql, Arg};
///
/// let rendered = default_format_sql("SELECT $1", &[Arg::from(42), Arg::from("x")]);
/// assert_eq!(rendered, r#"SELECT $1 [42,"x"]"#);
/// ```
pub fn default_format_sql(sql: &str, args: &[Arg]) -> String {
    let rendered = serde_json::to_string(args).unwrap_or_else(|_| plain_list(args));
    format!("{sql} {rendered}")
}

/// Substitute each positional placeholder with the quoted argument value.
///
/// `$1` is replaced by the first argument, `$2` by the second, and so on.
/// References are rendered through to the value they point at.
///
/// This is plain text replacement: placeholders inside string literals or
/// comments are substituted too, `$1` also matches the start of `$10`, and
/// arguments without a placeholder are dropped.
///
/// ```rust
/// use sea_orm_otel::{format_sql_replace, Arg};
///
/// let rendered = format_sql_replace("WHERE id=$1 AND name=$2", &[Arg::from(7), Arg::from("bob")]);
/// assert_eq!(rendered, "WHERE id='7' AND name='bob'");
/// ```
pub fn format_sql_replace(sql: &str, args: &[Arg]) -> String {
    args.iter()
        .enumerate()
        .fold(sql.to_owned(), |sql, (i, arg)| {
            sql.replace(&format!("${}", i + 1), &format!("'{}'", arg.referent()))
        })
}

fn plain_list(args: &[Arg]) -> String {
    let items: Vec<String> = args.iter().map(ToString::to_string).collect();
    format!("[{}]", items.join(" "))
}
