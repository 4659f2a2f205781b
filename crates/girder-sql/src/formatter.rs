//! Dialect seam and literal formatting.
//!
//! The AST contains zero dialect-specific string literals; all quoting and
//! escaping is delegated here. A new dialect is added by implementing
//! [`Dialect`]; value types are never reopened or extended.

use crate::value::Value;

/// Identifier and string quoting hooks for one SQL dialect.
///
/// This is an enumerated interface: the compiler calls exactly these
/// methods, nothing is forwarded dynamically.
pub trait Dialect: Send + Sync {
    fn quote_table_name(&self, name: &str) -> String;
    fn quote_column_name(&self, name: &str) -> String;
    fn quote_string(&self, value: &str) -> String;
}

/// Generic ANSI dialect: double-quoted identifiers, single-quoted strings,
/// embedded quotes doubled.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn quote_table_name(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_column_name(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Literal binding policy for one compile call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// Literals are rendered into the SQL text; the bind list stays empty.
    Inline,
    /// Literals become `$1…$n` placeholders, collected in encounter order.
    Parameters,
}

/// Renders AST leaves to SQL text and owns the bind list for one compile
/// call. One method per operand variant; the tree itself never quotes.
pub struct Formatter<'d> {
    dialect: &'d dyn Dialect,
    mode: BindMode,
    binds: Vec<Value>,
}

impl<'d> Formatter<'d> {
    pub fn new(dialect: &'d dyn Dialect, mode: BindMode) -> Self {
        Self { dialect, mode, binds: Vec::new() }
    }

    pub fn mode(&self) -> BindMode {
        self.mode
    }

    pub fn into_binds(self) -> Vec<Value> {
        self.binds
    }

    /// Qualified attribute reference.
    pub fn attribute(&self, qualifier: &str, name: &str) -> String {
        format!(
            "{}.{}",
            self.dialect.quote_table_name(qualifier),
            self.dialect.quote_column_name(name)
        )
    }

    /// Quoted table name, with an alias clause when the display name
    /// differs from the underlying table.
    pub fn table(&self, name: &str, display: &str) -> String {
        if name == display {
            self.dialect.quote_table_name(name)
        } else {
            format!(
                "{} {}",
                self.dialect.quote_table_name(name),
                self.dialect.quote_table_name(display)
            )
        }
    }

    /// Scalar literal, rendered inline or as a placeholder per the bind
    /// mode.
    pub fn scalar(&mut self, value: &Value) -> String {
        match self.mode {
            BindMode::Inline => self.render_inline(value),
            BindMode::Parameters => {
                self.binds.push(value.clone());
                format!("${}", self.binds.len())
            },
        }
    }

    /// Parenthesized value list for IN / NOT IN.
    pub fn list(&mut self, values: &[Value]) -> String {
        let rendered: Vec<String> = values.iter().map(|v| self.scalar(v)).collect();
        format!("({})", rendered.join(", "))
    }

    /// `lo AND hi` for BETWEEN.
    pub fn range(&mut self, lo: &Value, hi: &Value) -> String {
        let lo = self.scalar(lo);
        let hi = self.scalar(hi);
        format!("{} AND {}", lo, hi)
    }

    fn render_inline(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(true) => "TRUE".to_string(),
            Value::Bool(false) => "FALSE".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Decimal(d) => d.clone(),
            Value::Str(s) => self.dialect.quote_string(s),
            Value::Time(t) => self.dialect.quote_string(&t.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ansi_identifier_quoting() {
        let d = AnsiDialect;
        assert_eq!(d.quote_table_name("users"), "\"users\"");
        assert_eq!(d.quote_column_name("name"), "\"name\"");
        assert_eq!(d.quote_table_name("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_ansi_string_escaping() {
        let d = AnsiDialect;
        assert_eq!(d.quote_string("it's"), "'it''s'");
    }

    #[test]
    fn test_inline_scalars() {
        let d = AnsiDialect;
        let mut f = Formatter::new(&d, BindMode::Inline);
        assert_eq!(f.scalar(&Value::Integer(5)), "5");
        assert_eq!(f.scalar(&Value::Str("hi".into())), "'hi'");
        assert_eq!(f.scalar(&Value::Null), "NULL");
        assert_eq!(f.scalar(&Value::Bool(true)), "TRUE");
        assert!(f.into_binds().is_empty());
    }

    #[test]
    fn test_parameter_scalars_collect_binds() {
        let d = AnsiDialect;
        let mut f = Formatter::new(&d, BindMode::Parameters);
        assert_eq!(f.scalar(&Value::Integer(5)), "$1");
        assert_eq!(f.scalar(&Value::Str("hi".into())), "$2");
        assert_eq!(f.into_binds(), vec![Value::Integer(5), Value::Str("hi".into())]);
    }

    #[test]
    fn test_list_rendering() {
        let d = AnsiDialect;
        let mut f = Formatter::new(&d, BindMode::Inline);
        let sql = f.list(&[Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert_eq!(sql, "(1, 2, 3)");
    }

    #[test]
    fn test_attribute_qualification() {
        let d = AnsiDialect;
        let f = Formatter::new(&d, BindMode::Inline);
        assert_eq!(f.attribute("users", "id"), "\"users\".\"id\"");
    }

    #[test]
    fn test_table_with_display_alias() {
        let d = AnsiDialect;
        let f = Formatter::new(&d, BindMode::Inline);
        assert_eq!(f.table("users", "users"), "\"users\"");
        assert_eq!(f.table("users", "users_2"), "\"users\" \"users_2\"");
    }
}
