//! Composable relation tree.
//!
//! A relation is a tree of immutable value nodes: a plain table at the
//! leaves, wrapped by compound nodes for selection, projection, ordering,
//! grouping, bounds, and joins. Every refinement returns a new node; nothing
//! is mutated after construction. Attribute references are checked when the
//! wrapping node is built, so a predicate that points outside the tree fails
//! fast, before any SQL exists.

use crate::attribute::{AttrType, Attribute};
use crate::error::{Result, SqlError};
use crate::predicate::Predicate;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Join flavor. Raw string joins carry their own SQL verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Outer,
}

impl JoinKind {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Outer => "LEFT OUTER JOIN",
        }
    }
}

/// Sort direction for an ORDER BY entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

/// A single ORDER BY entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub attribute: Attribute,
    pub direction: OrderDirection,
}

impl Attribute {
    /// Ascending ORDER BY entry on this attribute.
    pub fn asc(&self) -> Ordering {
        Ordering { attribute: self.clone(), direction: OrderDirection::Asc }
    }

    /// Descending ORDER BY entry on this attribute.
    pub fn desc(&self) -> Ordering {
        Ordering { attribute: self.clone(), direction: OrderDirection::Desc }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RelNode {
    Table {
        name: String,
        alias: Option<String>,
    },
    Selection {
        child: Box<Relation>,
        predicate: Predicate,
    },
    Projection {
        child: Box<Relation>,
        attributes: Vec<Attribute>,
    },
    Order {
        child: Box<Relation>,
        orderings: Vec<Ordering>,
    },
    Grouping {
        child: Box<Relation>,
        attributes: Vec<Attribute>,
    },
    Take {
        child: Box<Relation>,
        count: u64,
    },
    Skip {
        child: Box<Relation>,
        count: u64,
    },
    Join {
        kind: JoinKind,
        left: Box<Relation>,
        right: Box<Relation>,
        on: Vec<Predicate>,
    },
    StringJoin {
        child: Box<Relation>,
        sql: String,
    },
}

/// A queryable relation: a table, or a compound node wrapping one.
#[derive(Debug, Clone)]
pub struct Relation {
    pub(crate) node: RelNode,
    fingerprint: u64,
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Relation {
    /// A plain table reference.
    pub fn table(name: impl Into<String>) -> Result<Relation> {
        let name = name.into();
        if name.is_empty() {
            return Err(SqlError::shape("table name cannot be empty"));
        }
        Ok(Self::with_node(RelNode::Table { name, alias: None }))
    }

    /// A table reference under an explicit alias. Attributes created from
    /// this relation qualify against the alias, which is what makes
    /// self-joins addressable.
    pub fn table_with_alias(name: impl Into<String>, alias: impl Into<String>) -> Result<Relation> {
        let name = name.into();
        let alias = alias.into();
        if name.is_empty() {
            return Err(SqlError::shape("table name cannot be empty"));
        }
        if alias.is_empty() {
            return Err(SqlError::shape("table alias cannot be empty"));
        }
        Ok(Self::with_node(RelNode::Table { name, alias: Some(alias) }))
    }

    /// An attribute of this relation with an undefined type tag.
    pub fn attr(&self, name: impl Into<String>) -> Attribute {
        Attribute::new(self.tag(), name, AttrType::Undefined)
    }

    /// An attribute of this relation with an explicit type tag.
    pub fn attr_typed(&self, name: impl Into<String>, ty: AttrType) -> Attribute {
        Attribute::new(self.tag(), name, ty)
    }

    /// Restrict with a predicate. All attributes the predicate references
    /// must resolve within this relation's tree.
    pub fn filter(self, predicate: Predicate) -> Result<Relation> {
        self.check_resolves(predicate.attributes().into_iter(), "filter predicate")?;
        Ok(Self::with_node(RelNode::Selection { child: Box::new(self), predicate }))
    }

    /// Project a list of attributes.
    pub fn select(self, attributes: Vec<Attribute>) -> Result<Relation> {
        self.check_resolves(attributes.iter(), "projection")?;
        Ok(Self::with_node(RelNode::Projection { child: Box::new(self), attributes }))
    }

    /// Append ORDER BY entries.
    pub fn order(self, orderings: Vec<Ordering>) -> Result<Relation> {
        self.check_resolves(orderings.iter().map(|o| &o.attribute), "ordering")?;
        Ok(Self::with_node(RelNode::Order { child: Box::new(self), orderings }))
    }

    /// Append GROUP BY attributes.
    pub fn group(self, attributes: Vec<Attribute>) -> Result<Relation> {
        self.check_resolves(attributes.iter(), "grouping")?;
        Ok(Self::with_node(RelNode::Grouping { child: Box::new(self), attributes }))
    }

    /// LIMIT. An outer `take` overrides an inner one.
    pub fn take(self, count: u64) -> Relation {
        Self::with_node(RelNode::Take { child: Box::new(self), count })
    }

    /// OFFSET. An outer `skip` overrides an inner one.
    pub fn skip(self, count: u64) -> Relation {
        Self::with_node(RelNode::Skip { child: Box::new(self), count })
    }

    /// Begin an inner join against `right`.
    pub fn join(self, right: Relation) -> JoinBuilder {
        JoinBuilder { kind: JoinKind::Inner, left: self, right }
    }

    /// Begin a left outer join against `right`.
    pub fn outer_join(self, right: Relation) -> JoinBuilder {
        JoinBuilder { kind: JoinKind::Outer, left: self, right }
    }

    /// Append a raw SQL join clause verbatim.
    pub fn string_join(self, sql: impl Into<String>) -> Relation {
        Self::with_node(RelNode::StringJoin { child: Box::new(self), sql: sql.into() })
    }

    /// The tag attributes of this relation qualify against: the leftmost
    /// reachable table's alias, or its name when no alias was given.
    pub fn tag(&self) -> &str {
        match &self.node {
            RelNode::Table { name, alias } => alias.as_deref().unwrap_or(name),
            RelNode::Selection { child, .. }
            | RelNode::Projection { child, .. }
            | RelNode::Order { child, .. }
            | RelNode::Grouping { child, .. }
            | RelNode::Take { child, .. }
            | RelNode::Skip { child, .. }
            | RelNode::StringJoin { child, .. } => child.tag(),
            RelNode::Join { left, .. } => left.tag(),
        }
    }

    /// Projected attributes, re-bound to this relation. Compound nodes
    /// delegate to the wrapped child.
    pub fn attributes(&self) -> Vec<Attribute> {
        match &self.node {
            RelNode::Table { .. } => Vec::new(),
            RelNode::Projection { attributes, .. } => {
                attributes.iter().map(|a| a.bind(self)).collect()
            },
            RelNode::Selection { child, .. }
            | RelNode::Order { child, .. }
            | RelNode::Grouping { child, .. }
            | RelNode::Take { child, .. }
            | RelNode::Skip { child, .. }
            | RelNode::StringJoin { child, .. } => {
                child.attributes().iter().map(|a| a.bind(self)).collect()
            },
            RelNode::Join { left, right, .. } => {
                let mut attrs = left.attributes();
                attrs.extend(right.attributes());
                attrs
            },
        }
    }

    /// Structural fingerprint, computed once at construction. Equal trees
    /// have equal fingerprints; usable as a compile-cache key.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Whether this is a bare table reference (no compound wrapping).
    pub(crate) fn is_plain_table(&self) -> bool {
        matches!(self.node, RelNode::Table { .. })
    }

    /// Tags of every table reachable through this tree.
    pub(crate) fn reachable_tags(&self) -> Vec<&str> {
        match &self.node {
            RelNode::Table { name, alias } => vec![alias.as_deref().unwrap_or(name)],
            RelNode::Selection { child, .. }
            | RelNode::Projection { child, .. }
            | RelNode::Order { child, .. }
            | RelNode::Grouping { child, .. }
            | RelNode::Take { child, .. }
            | RelNode::Skip { child, .. }
            | RelNode::StringJoin { child, .. } => child.reachable_tags(),
            RelNode::Join { left, right, .. } => {
                let mut tags = left.reachable_tags();
                tags.extend(right.reachable_tags());
                tags
            },
        }
    }

    pub(crate) fn check_resolves<'a>(
        &self,
        attributes: impl Iterator<Item = &'a Attribute>,
        context: &str,
    ) -> Result<()> {
        let tags = self.reachable_tags();
        for attr in attributes {
            if !tags.contains(&attr.relation()) {
                return Err(SqlError::shape(format!(
                    "{} references \"{}\".\"{}\", but \"{}\" is not reachable from this relation",
                    context,
                    attr.relation(),
                    attr.name(),
                    attr.relation()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn with_node(node: RelNode) -> Relation {
        let fingerprint = Self::fingerprint_of(&node);
        Relation { node, fingerprint }
    }

    fn fingerprint_of(node: &RelNode) -> u64 {
        let mut state = DefaultHasher::new();
        match node {
            RelNode::Table { name, alias } => {
                state.write_u8(0);
                state.write(name.as_bytes());
                if let Some(alias) = alias {
                    state.write_u8(1);
                    state.write(alias.as_bytes());
                }
            },
            RelNode::Selection { child, predicate } => {
                state.write_u8(1);
                state.write_u64(child.fingerprint);
                predicate.hash_into(&mut state);
            },
            RelNode::Projection { child, attributes } => {
                state.write_u8(2);
                state.write_u64(child.fingerprint);
                for attr in attributes {
                    attr.hash_into(&mut state);
                }
            },
            RelNode::Order { child, orderings } => {
                state.write_u8(3);
                state.write_u64(child.fingerprint);
                for o in orderings {
                    o.attribute.hash_into(&mut state);
                    state.write_u8(matches!(o.direction, OrderDirection::Desc) as u8);
                }
            },
            RelNode::Grouping { child, attributes } => {
                state.write_u8(4);
                state.write_u64(child.fingerprint);
                for attr in attributes {
                    attr.hash_into(&mut state);
                }
            },
            RelNode::Take { child, count } => {
                state.write_u8(5);
                state.write_u64(child.fingerprint);
                state.write_u64(*count);
            },
            RelNode::Skip { child, count } => {
                state.write_u8(6);
                state.write_u64(child.fingerprint);
                state.write_u64(*count);
            },
            RelNode::Join { kind, left, right, on } => {
                state.write_u8(7);
                state.write_u8(matches!(kind, JoinKind::Outer) as u8);
                state.write_u64(left.fingerprint);
                state.write_u64(right.fingerprint);
                for predicate in on {
                    predicate.hash_into(&mut state);
                }
            },
            RelNode::StringJoin { child, sql } => {
                state.write_u8(8);
                state.write_u64(child.fingerprint);
                state.write(sql.as_bytes());
            },
        }
        state.finish()
    }
}

/// Pending join awaiting its ON condition.
pub struct JoinBuilder {
    kind: JoinKind,
    left: Relation,
    right: Relation,
}

impl JoinBuilder {
    /// Complete the join. The condition is bound to the join's environment:
    /// its attributes may reference tables on either side.
    pub fn on(self, predicate: Predicate) -> Result<Relation> {
        let joined = Relation::with_node(RelNode::Join {
            kind: self.kind,
            left: Box::new(self.left),
            right: Box::new(self.right),
            on: vec![predicate],
        });
        if let RelNode::Join { on, .. } = &joined.node {
            joined.check_resolves(
                on.iter().flat_map(|p| p.attributes()),
                "join condition",
            )?;
        }
        Ok(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Relation {
        Relation::table("users").unwrap()
    }

    #[test]
    fn test_table_requires_name() {
        assert!(matches!(Relation::table(""), Err(SqlError::Shape(_))));
    }

    #[test]
    fn test_filter_accepts_resolvable_attribute() {
        let users = users();
        let pred = users.attr("id").eq(5);
        assert!(users.filter(pred).is_ok());
    }

    #[test]
    fn test_filter_rejects_foreign_attribute() {
        let users = users();
        let other = Relation::table("accounts").unwrap();
        let pred = other.attr("id").eq(5);
        let err = users.filter(pred).unwrap_err();
        assert!(matches!(err, SqlError::Shape(_)));
    }

    #[test]
    fn test_join_environment_reaches_both_sides() {
        let users = users();
        let photos = Relation::table("photos").unwrap();
        let pred = users.attr("id").eq(photos.attr("user_id"));
        assert!(users.join(photos).on(pred).is_ok());
    }

    #[test]
    fn test_join_condition_rejects_third_table() {
        let users = users();
        let photos = Relation::table("photos").unwrap();
        let stranger = Relation::table("comments").unwrap();
        let pred = users.attr("id").eq(stranger.attr("user_id"));
        assert!(users.join(photos).on(pred).is_err());
    }

    #[test]
    fn test_refinement_does_not_mutate_original() {
        let users = users();
        let snapshot = users.clone();
        let _refined = users.clone().filter(users.attr("id").eq(1)).unwrap().take(1);
        assert_eq!(users, snapshot);
    }

    #[test]
    fn test_fingerprint_is_structural() {
        let a = users().filter(users().attr("id").eq(5)).unwrap();
        let b = users().filter(users().attr("id").eq(5)).unwrap();
        let c = users().filter(users().attr("id").eq(6)).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_alias_changes_tag() {
        let aliased = Relation::table_with_alias("users", "managers").unwrap();
        assert_eq!(aliased.tag(), "managers");
        assert_eq!(aliased.attr("id").relation(), "managers");
    }

    #[test]
    fn test_attributes_delegate_through_compound_nodes() {
        let users = users();
        let projected = users
            .clone()
            .select(vec![users.attr("id"), users.attr("name")])
            .unwrap()
            .take(10);
        let attrs = projected.attributes();
        assert_eq!(attrs.len(), 2);
        assert!(attrs.iter().all(|a| a.relation() == "users"));
    }

    #[test]
    fn test_bind_rescopes_attribute() {
        let users = users();
        let aliased = Relation::table_with_alias("users", "reports").unwrap();
        let attr = users.attr("id");
        let bound = attr.bind(&aliased);
        assert_eq!(bound.relation(), "reports");
        assert_eq!(attr.relation(), "users");
    }
}
