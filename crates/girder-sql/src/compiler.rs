//! Relation-to-SQL compilation.
//!
//! One bottom-up traversal collects the clauses of the tree, then renders
//! them in fixed order: SELECT, FROM, JOIN, WHERE, GROUP BY, ORDER BY,
//! LIMIT/OFFSET. The order operations were chained in during construction
//! never changes the rendered clause order.

use crate::attribute::Attribute;
use crate::christener::Christener;
use crate::error::{Result, SqlError};
use crate::formatter::{BindMode, Dialect, Formatter};
use crate::predicate::{Operand, Predicate, PredicateOp};
use crate::relation::{JoinKind, OrderDirection, Ordering, RelNode, Relation};
use crate::value::Value;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Output of a compile call: SQL text plus the ordered bind list.
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub binds: Vec<Value>,
}

/// Compile a relation to SQL under the given dialect and bind mode.
pub fn compile(relation: &Relation, dialect: &dyn Dialect, mode: BindMode) -> Result<Compiled> {
    let mut fmt = Formatter::new(dialect, mode);
    let sql = compile_select(relation, &mut fmt)?;
    Ok(Compiled { sql, binds: fmt.into_binds() })
}

/// Memoized compilation keyed by the relation's structural fingerprint.
/// One cache serves one (dialect, bind mode) pair; the engine owns it.
#[derive(Debug, Default)]
pub struct CompileCache {
    entries: DashMap<u64, Arc<Compiled>>,
}

impl CompileCache {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_or_compile(
        &self,
        relation: &Relation,
        dialect: &dyn Dialect,
        mode: BindMode,
    ) -> Result<Arc<Compiled>> {
        if let Some(hit) = self.entries.get(&relation.fingerprint()) {
            return Ok(hit.clone());
        }
        let compiled = Arc::new(compile(relation, dialect, mode)?);
        self.entries.insert(relation.fingerprint(), compiled.clone());
        Ok(compiled)
    }
}

#[derive(Default)]
struct SelectParts<'r> {
    table: Option<(&'r str, Option<&'r str>)>,
    joins: Vec<JoinItem<'r>>,
    wheres: Vec<&'r Predicate>,
    projections: Vec<&'r Attribute>,
    orderings: Vec<&'r Ordering>,
    groupings: Vec<&'r Attribute>,
    taken: Option<u64>,
    skipped: Option<u64>,
}

enum JoinItem<'r> {
    Structured { kind: JoinKind, right: &'r Relation, on: &'r [Predicate] },
    Raw(&'r str),
}

fn collect<'r>(relation: &'r Relation, parts: &mut SelectParts<'r>) {
    match &relation.node {
        RelNode::Table { name, alias } => {
            if parts.table.is_none() {
                parts.table = Some((name.as_str(), alias.as_deref()));
            }
        },
        RelNode::Selection { child, predicate } => {
            collect(child, parts);
            parts.wheres.push(predicate);
        },
        RelNode::Projection { child, attributes } => {
            collect(child, parts);
            parts.projections.extend(attributes.iter());
        },
        RelNode::Order { child, orderings } => {
            collect(child, parts);
            parts.orderings.extend(orderings.iter());
        },
        RelNode::Grouping { child, attributes } => {
            collect(child, parts);
            parts.groupings.extend(attributes.iter());
        },
        RelNode::Take { child, count } => {
            collect(child, parts);
            // Outermost bound wins.
            parts.taken = Some(*count);
        },
        RelNode::Skip { child, count } => {
            collect(child, parts);
            parts.skipped = Some(*count);
        },
        RelNode::Join { kind, left, right, on } => {
            collect(left, parts);
            parts.joins.push(JoinItem::Structured { kind: *kind, right, on });
        },
        RelNode::StringJoin { child, sql } => {
            collect(child, parts);
            parts.joins.push(JoinItem::Raw(sql));
        },
    }
}

/// Compile one SELECT. Recursively invoked for subqueries and derived
/// tables, sharing the formatter so binds land in SQL order; each level
/// builds its own `Christener` (alias scope is per SELECT).
pub(crate) fn compile_select(relation: &Relation, fmt: &mut Formatter<'_>) -> Result<String> {
    let mut parts = SelectParts::default();
    collect(relation, &mut parts);

    let (table_name, table_alias) = parts
        .table
        .ok_or_else(|| SqlError::compile("relation has no table to select from"))?;

    let mut christener = Christener::new();
    let mut aliases: HashMap<String, String> = HashMap::new();

    let table_display = christener.christen(table_name, table_alias);
    aliases.insert(table_alias.unwrap_or(table_name).to_string(), table_display.clone());
    let from_clause = fmt.table(table_name, &table_display);

    // Joins render before WHERE so the bind list matches SQL order; the
    // alias map fills as each join side is named.
    let mut join_clauses: Vec<String> = Vec::new();
    for item in &parts.joins {
        match item {
            JoinItem::Structured { kind, right, on } => {
                let clause = render_join(*kind, right, on, fmt, &mut christener, &mut aliases)?;
                join_clauses.push(clause);
            },
            JoinItem::Raw(sql) => join_clauses.push((*sql).to_string()),
        }
    }

    let select_list = if parts.projections.is_empty() {
        "*".to_string()
    } else {
        let mut items = Vec::with_capacity(parts.projections.len());
        for attr in &parts.projections {
            items.push(render_attribute(attr, fmt, &aliases)?);
        }
        items.join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", select_list, from_clause);
    for clause in join_clauses {
        sql.push(' ');
        sql.push_str(&clause);
    }

    if !parts.wheres.is_empty() {
        let mut rendered = Vec::with_capacity(parts.wheres.len());
        for predicate in &parts.wheres {
            rendered.push(render_predicate(predicate, fmt, &aliases)?);
        }
        sql.push_str(" WHERE ");
        sql.push_str(&rendered.join(" AND "));
    }

    if !parts.groupings.is_empty() {
        let mut rendered = Vec::with_capacity(parts.groupings.len());
        for attr in &parts.groupings {
            rendered.push(render_attribute(attr, fmt, &aliases)?);
        }
        sql.push_str(" GROUP BY ");
        sql.push_str(&rendered.join(", "));
    }

    if !parts.orderings.is_empty() {
        let mut rendered = Vec::with_capacity(parts.orderings.len());
        for ordering in &parts.orderings {
            let attr = render_attribute(&ordering.attribute, fmt, &aliases)?;
            let dir = match ordering.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
            };
            rendered.push(format!("{} {}", attr, dir));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&rendered.join(", "));
    }

    if let Some(count) = parts.taken {
        sql.push_str(&format!(" LIMIT {}", count));
    }
    if let Some(count) = parts.skipped {
        sql.push_str(&format!(" OFFSET {}", count));
    }

    Ok(sql)
}

fn render_join(
    kind: JoinKind,
    right: &Relation,
    on: &[Predicate],
    fmt: &mut Formatter<'_>,
    christener: &mut Christener,
    aliases: &mut HashMap<String, String>,
) -> Result<String> {
    let table_sql = match &right.node {
        RelNode::Table { name, alias } => {
            let display = christener.christen(name, alias.as_deref());
            // First occurrence wins in the attribute map: an unaliased
            // repeat is reachable in the FROM clause but not addressable.
            aliases
                .entry(alias.as_deref().unwrap_or(name).to_string())
                .or_insert_with(|| display.clone());
            fmt.table(name, &display)
        },
        // A compound join side compiles as a derived table with its own
        // alias scope.
        _ => {
            let display = christener.christen(right.tag(), None);
            aliases.entry(right.tag().to_string()).or_insert_with(|| display.clone());
            let inner = compile_select(right, fmt)?;
            format!("({}) {}", inner, fmt.table(&display, &display))
        },
    };

    let mut clause = format!("{} {}", kind.keyword(), table_sql);
    if !on.is_empty() {
        let mut rendered = Vec::with_capacity(on.len());
        for predicate in on {
            rendered.push(render_predicate(predicate, fmt, aliases)?);
        }
        clause.push_str(" ON ");
        clause.push_str(&rendered.join(" AND "));
    }
    Ok(clause)
}

pub(crate) fn render_attribute(
    attr: &Attribute,
    fmt: &Formatter<'_>,
    aliases: &HashMap<String, String>,
) -> Result<String> {
    match aliases.get(attr.relation()) {
        Some(display) => Ok(fmt.attribute(display, attr.name())),
        None => Err(SqlError::compile(format!(
            "attribute \"{}\".\"{}\" does not resolve to any table in this query",
            attr.relation(),
            attr.name()
        ))),
    }
}

pub(crate) fn render_predicate(
    predicate: &Predicate,
    fmt: &mut Formatter<'_>,
    aliases: &HashMap<String, String>,
) -> Result<String> {
    match predicate {
        Predicate::And(l, r) => Ok(format!(
            "{} AND {}",
            render_predicate(l, fmt, aliases)?,
            render_predicate(r, fmt, aliases)?
        )),
        Predicate::Or(l, r) => Ok(format!(
            "({} OR {})",
            render_predicate(l, fmt, aliases)?,
            render_predicate(r, fmt, aliases)?
        )),
        Predicate::Binary { left, op, right } => {
            render_binary(left, *op, right, fmt, aliases)
        },
    }
}

fn render_binary(
    left: &Operand,
    op: PredicateOp,
    right: &Operand,
    fmt: &mut Formatter<'_>,
    aliases: &HashMap<String, String>,
) -> Result<String> {
    // Normalize NULL comparisons so the null lands on the right.
    let (left, right) = match (op, is_null(left), is_null(right)) {
        (PredicateOp::Eq | PredicateOp::NotEq, true, false) => (right, left),
        _ => (left, right),
    };

    let lhs = render_operand(left, fmt, aliases)?;

    match op {
        PredicateOp::Eq if is_null(right) => Ok(format!("{} IS NULL", lhs)),
        PredicateOp::NotEq if is_null(right) => Ok(format!("{} IS NOT NULL", lhs)),
        PredicateOp::In | PredicateOp::NotIn => {
            let keyword = if op == PredicateOp::In { "IN" } else { "NOT IN" };
            match right {
                Operand::List(values) => {
                    if values.is_empty() {
                        return Err(SqlError::compile(format!(
                            "{} predicate has an empty value list",
                            keyword
                        )));
                    }
                    let list = fmt.list(values);
                    Ok(format!("{} {} {}", lhs, keyword, list))
                },
                Operand::Subquery(_) => {
                    let sub = render_operand(right, fmt, aliases)?;
                    Ok(format!("{} {} {}", lhs, keyword, sub))
                },
                _ => Err(SqlError::compile(format!(
                    "{} predicate expects a collection or subquery operand",
                    keyword
                ))),
            }
        },
        PredicateOp::Between => match right {
            Operand::Range(lo, hi) => {
                let bounds = fmt.range(lo, hi);
                Ok(format!("{} BETWEEN {}", lhs, bounds))
            },
            _ => Err(SqlError::compile("BETWEEN predicate expects a range operand")),
        },
        PredicateOp::Matches => {
            let rhs = render_operand(right, fmt, aliases)?;
            Ok(format!("{} LIKE {}", lhs, rhs))
        },
        _ => {
            let rhs = render_operand(right, fmt, aliases)?;
            Ok(format!("{} {} {}", lhs, op_symbol(op), rhs))
        },
    }
}

fn render_operand(
    operand: &Operand,
    fmt: &mut Formatter<'_>,
    aliases: &HashMap<String, String>,
) -> Result<String> {
    match operand {
        Operand::Attribute(attr) => render_attribute(attr, fmt, aliases),
        Operand::Value(value) => Ok(fmt.scalar(value)),
        Operand::Subquery(relation) => {
            let inner = compile_select(relation, fmt)?;
            Ok(format!("({})", inner))
        },
        Operand::List(_) => {
            Err(SqlError::compile("collection operand is only valid with IN / NOT IN"))
        },
        Operand::Range(_, _) => {
            Err(SqlError::compile("range operand is only valid with BETWEEN"))
        },
    }
}

fn is_null(operand: &Operand) -> bool {
    matches!(operand, Operand::Value(Value::Null))
}

fn op_symbol(op: PredicateOp) -> &'static str {
    match op {
        PredicateOp::Eq => "=",
        PredicateOp::NotEq => "<>",
        PredicateOp::Lt => "<",
        PredicateOp::LtEq => "<=",
        PredicateOp::Gt => ">",
        PredicateOp::GtEq => ">=",
        // The remaining operators render through their dedicated branches.
        PredicateOp::Matches => "LIKE",
        PredicateOp::In => "IN",
        PredicateOp::NotIn => "NOT IN",
        PredicateOp::Between => "BETWEEN",
    }
}
