//! Write relations: INSERT, UPDATE, DELETE.
//!
//! Write statements compile through a distinct, simpler path than selects,
//! reusing the shared predicate formatter for their WHERE clauses.

use crate::attribute::Attribute;
use crate::compiler::{render_predicate, Compiled};
use crate::error::{Result, SqlError};
use crate::formatter::{BindMode, Dialect, Formatter};
use crate::predicate::Predicate;
use crate::relation::{RelNode, Relation};
use crate::value::Value;
use std::collections::HashMap;

/// INSERT: a target table paired with a record of attribute→value bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub(crate) table: Relation,
    pub(crate) record: Vec<(Attribute, Value)>,
}

/// UPDATE: per-attribute assignments plus the filters collected from the
/// target relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub(crate) table: Relation,
    pub(crate) assignments: Vec<(Attribute, Value)>,
    pub(crate) wheres: Vec<Predicate>,
}

/// DELETE: the filters collected from the target relation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub(crate) table: Relation,
    pub(crate) wheres: Vec<Predicate>,
}

impl Relation {
    /// Turn this relation into an INSERT. The target must be a plain table.
    pub fn to_insert(self, record: Vec<(Attribute, Value)>) -> Result<Insert> {
        if !self.is_plain_table() {
            return Err(SqlError::shape("INSERT target must be a plain table"));
        }
        if record.is_empty() {
            return Err(SqlError::shape("INSERT requires at least one column"));
        }
        self.check_resolves(record.iter().map(|(attr, _)| attr), "insert record")?;
        Ok(Insert { table: self, record })
    }

    /// Turn this relation into an UPDATE. The target may be a table wrapped
    /// in filters; those filters become the WHERE clause.
    pub fn to_update(self, assignments: Vec<(Attribute, Value)>) -> Result<Update> {
        if assignments.is_empty() {
            return Err(SqlError::shape("UPDATE requires at least one assignment"));
        }
        let (table, wheres) = self.into_table_and_wheres("UPDATE")?;
        table.check_resolves(assignments.iter().map(|(attr, _)| attr), "update assignments")?;
        Ok(Update { table, assignments, wheres })
    }

    /// Turn this relation into a DELETE. The target may be a table wrapped
    /// in filters; those filters become the WHERE clause.
    pub fn to_delete(self) -> Result<Delete> {
        let (table, wheres) = self.into_table_and_wheres("DELETE")?;
        Ok(Delete { table, wheres })
    }

    fn into_table_and_wheres(self, statement: &str) -> Result<(Relation, Vec<Predicate>)> {
        match self.node {
            RelNode::Table { .. } => Ok((self, Vec::new())),
            RelNode::Selection { child, predicate } => {
                let (table, mut wheres) = child.into_table_and_wheres(statement)?;
                wheres.push(predicate);
                Ok((table, wheres))
            },
            _ => Err(SqlError::shape(format!(
                "{} target supports only a table with filters",
                statement
            ))),
        }
    }
}

fn table_parts(relation: &Relation) -> Result<(&str, HashMap<String, String>)> {
    match &relation.node {
        RelNode::Table { name, alias } => {
            let tag = alias.as_deref().unwrap_or(name);
            let mut aliases = HashMap::new();
            aliases.insert(tag.to_string(), name.to_string());
            Ok((name, aliases))
        },
        _ => Err(SqlError::compile("write statement lost its table")),
    }
}

/// Compile an INSERT: column list plus VALUES.
pub fn compile_insert(insert: &Insert, dialect: &dyn Dialect, mode: BindMode) -> Result<Compiled> {
    let (table_name, _aliases) = table_parts(&insert.table)?;
    let mut fmt = Formatter::new(dialect, mode);

    let columns: Vec<String> = insert
        .record
        .iter()
        .map(|(attr, _)| dialect.quote_column_name(attr.name()))
        .collect();
    let values: Vec<String> =
        insert.record.iter().map(|(_, value)| fmt.scalar(value)).collect();

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote_table_name(table_name),
        columns.join(", "),
        values.join(", ")
    );
    Ok(Compiled { sql, binds: fmt.into_binds() })
}

/// Compile an UPDATE: SET list plus collected WHERE clause.
pub fn compile_update(update: &Update, dialect: &dyn Dialect, mode: BindMode) -> Result<Compiled> {
    let (table_name, aliases) = table_parts(&update.table)?;
    let mut fmt = Formatter::new(dialect, mode);

    let assignments: Vec<String> = {
        let mut rendered = Vec::with_capacity(update.assignments.len());
        for (attr, value) in &update.assignments {
            let scalar = fmt.scalar(value);
            rendered.push(format!("{} = {}", dialect.quote_column_name(attr.name()), scalar));
        }
        rendered
    };

    let mut sql = format!(
        "UPDATE {} SET {}",
        dialect.quote_table_name(table_name),
        assignments.join(", ")
    );
    append_wheres(&mut sql, &update.wheres, &mut fmt, &aliases)?;
    Ok(Compiled { sql, binds: fmt.into_binds() })
}

/// Compile a DELETE: WHERE-only.
pub fn compile_delete(delete: &Delete, dialect: &dyn Dialect, mode: BindMode) -> Result<Compiled> {
    let (table_name, aliases) = table_parts(&delete.table)?;
    let mut fmt = Formatter::new(dialect, mode);

    let mut sql = format!("DELETE FROM {}", dialect.quote_table_name(table_name));
    append_wheres(&mut sql, &delete.wheres, &mut fmt, &aliases)?;
    Ok(Compiled { sql, binds: fmt.into_binds() })
}

fn append_wheres(
    sql: &mut String,
    wheres: &[Predicate],
    fmt: &mut Formatter<'_>,
    aliases: &HashMap<String, String>,
) -> Result<()> {
    if wheres.is_empty() {
        return Ok(());
    }
    let mut rendered = Vec::with_capacity(wheres.len());
    for predicate in wheres {
        rendered.push(render_predicate(predicate, fmt, aliases)?);
    }
    sql.push_str(" WHERE ");
    sql.push_str(&rendered.join(" AND "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formatter::AnsiDialect;

    fn users() -> Relation {
        Relation::table("users").unwrap()
    }

    #[test]
    fn test_insert_compiles_columns_and_values() {
        let users = users();
        let insert = users
            .clone()
            .to_insert(vec![
                (users.attr("name"), Value::from("Alice")),
                (users.attr("age"), Value::from(30)),
            ])
            .unwrap();
        let compiled = compile_insert(&insert, &AnsiDialect, BindMode::Inline).unwrap();
        assert_eq!(
            compiled.sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ('Alice', 30)"
        );
    }

    #[test]
    fn test_insert_parameter_mode() {
        let users = users();
        let insert = users
            .clone()
            .to_insert(vec![(users.attr("name"), Value::from("Alice"))])
            .unwrap();
        let compiled = compile_insert(&insert, &AnsiDialect, BindMode::Parameters).unwrap();
        assert_eq!(compiled.sql, "INSERT INTO \"users\" (\"name\") VALUES ($1)");
        assert_eq!(compiled.binds, vec![Value::from("Alice")]);
    }

    #[test]
    fn test_insert_requires_plain_table() {
        let users = users();
        let filtered = users.clone().filter(users.attr("id").eq(1)).unwrap();
        let err = filtered.to_insert(vec![(users.attr("name"), Value::from("x"))]).unwrap_err();
        assert!(matches!(err, SqlError::Shape(_)));
    }

    #[test]
    fn test_insert_requires_columns() {
        let err = users().to_insert(vec![]).unwrap_err();
        assert!(matches!(err, SqlError::Shape(_)));
    }

    #[test]
    fn test_update_collects_filters_into_where() {
        let users = users();
        let update = users
            .clone()
            .filter(users.attr("id").eq(5))
            .unwrap()
            .to_update(vec![(users.attr("name"), Value::from("Bob"))])
            .unwrap();
        let compiled = compile_update(&update, &AnsiDialect, BindMode::Inline).unwrap();
        assert_eq!(
            compiled.sql,
            "UPDATE \"users\" SET \"name\" = 'Bob' WHERE \"users\".\"id\" = 5"
        );
    }

    #[test]
    fn test_update_rejects_joined_target() {
        let users = users();
        let photos = Relation::table("photos").unwrap();
        let joined = users
            .clone()
            .join(photos.clone())
            .on(users.attr("id").eq(photos.attr("user_id")))
            .unwrap();
        let err = joined.to_update(vec![(users.attr("name"), Value::from("x"))]).unwrap_err();
        assert!(matches!(err, SqlError::Shape(_)));
    }

    #[test]
    fn test_delete_where_only() {
        let users = users();
        let delete = users.clone().filter(users.attr("id").eq(9)).unwrap().to_delete().unwrap();
        let compiled = compile_delete(&delete, &AnsiDialect, BindMode::Parameters).unwrap();
        assert_eq!(compiled.sql, "DELETE FROM \"users\" WHERE \"users\".\"id\" = $1");
        assert_eq!(compiled.binds, vec![Value::Integer(9)]);
    }

    #[test]
    fn test_delete_without_filters_has_no_where() {
        let delete = users().to_delete().unwrap();
        let compiled = compile_delete(&delete, &AnsiDialect, BindMode::Inline).unwrap();
        assert_eq!(compiled.sql, "DELETE FROM \"users\"");
    }
}
