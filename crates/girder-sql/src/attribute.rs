//! Column references and their predicate combinators.

use crate::error::{Result, SqlError};
use crate::predicate::{Operand, Predicate, PredicateOp};
use crate::value::Value;
use std::hash::Hasher;

/// Type tag on an attribute. Selects formatting and bind behavior only;
/// no validation happens at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    String,
    Time,
    Boolean,
    Decimal,
    Float,
    Integer,
    Undefined,
}

/// Reference to a column on a named relation. Immutable once constructed;
/// rebinding produces a new attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Attribute {
    /// Tag of the relation this attribute is scoped to: the table name, or
    /// its explicit alias when one was given.
    relation: String,
    name: String,
    ty: AttrType,
}

impl Attribute {
    pub fn new(relation: impl Into<String>, name: impl Into<String>, ty: AttrType) -> Self {
        Self { relation: relation.into(), name: name.into(), ty }
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> AttrType {
        self.ty
    }

    /// Return a new attribute scoped to `relation`'s tag. Pure: the
    /// receiver is untouched.
    pub fn bind(&self, relation: &crate::relation::Relation) -> Attribute {
        Attribute { relation: relation.tag().to_string(), name: self.name.clone(), ty: self.ty }
    }

    /// Return a new attribute scoped to an explicit tag.
    pub fn bind_to(&self, tag: impl Into<String>) -> Attribute {
        Attribute { relation: tag.into(), name: self.name.clone(), ty: self.ty }
    }

    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        state.write(self.relation.as_bytes());
        state.write_u8(0xfe);
        state.write(self.name.as_bytes());
        state.write_u8(self.ty as u8);
    }

    // ---- predicate combinators ----

    /// Equality. A collection operand routes to `IN`, a range to `BETWEEN`.
    pub fn eq(&self, operand: impl Into<Operand>) -> Predicate {
        match operand.into() {
            Operand::List(values) => self.binary(PredicateOp::In, Operand::List(values)),
            Operand::Range(lo, hi) => self.binary(PredicateOp::Between, Operand::Range(lo, hi)),
            other => self.binary(PredicateOp::Eq, other),
        }
    }

    /// Inequality. A collection operand routes to `NOT IN`.
    pub fn not_eq(&self, operand: impl Into<Operand>) -> Predicate {
        match operand.into() {
            Operand::List(values) => self.binary(PredicateOp::NotIn, Operand::List(values)),
            other => self.binary(PredicateOp::NotEq, other),
        }
    }

    pub fn lt(&self, operand: impl Into<Operand>) -> Result<Predicate> {
        self.scalar_binary(PredicateOp::Lt, operand.into())
    }

    pub fn lteq(&self, operand: impl Into<Operand>) -> Result<Predicate> {
        self.scalar_binary(PredicateOp::LtEq, operand.into())
    }

    pub fn gt(&self, operand: impl Into<Operand>) -> Result<Predicate> {
        self.scalar_binary(PredicateOp::Gt, operand.into())
    }

    pub fn gteq(&self, operand: impl Into<Operand>) -> Result<Predicate> {
        self.scalar_binary(PredicateOp::GtEq, operand.into())
    }

    /// SQL LIKE.
    pub fn matches(&self, operand: impl Into<Operand>) -> Result<Predicate> {
        self.scalar_binary(PredicateOp::Matches, operand.into())
    }

    /// SQL IN. The list must be non-empty.
    pub fn in_list(&self, values: Vec<Value>) -> Result<Predicate> {
        if values.is_empty() {
            return Err(SqlError::shape(format!(
                "IN predicate on \"{}\".\"{}\" requires at least one value",
                self.relation, self.name
            )));
        }
        Ok(self.binary(PredicateOp::In, Operand::List(values)))
    }

    /// SQL NOT IN. The list must be non-empty.
    pub fn not_in_list(&self, values: Vec<Value>) -> Result<Predicate> {
        if values.is_empty() {
            return Err(SqlError::shape(format!(
                "NOT IN predicate on \"{}\".\"{}\" requires at least one value",
                self.relation, self.name
            )));
        }
        Ok(self.binary(PredicateOp::NotIn, Operand::List(values)))
    }

    /// SQL BETWEEN (inclusive bounds).
    pub fn between(&self, lo: impl Into<Value>, hi: impl Into<Value>) -> Predicate {
        self.binary(
            PredicateOp::Between,
            Operand::Range(Box::new(lo.into()), Box::new(hi.into())),
        )
    }

    fn binary(&self, op: PredicateOp, right: Operand) -> Predicate {
        Predicate::binary(Operand::Attribute(self.clone()), op, right)
    }

    fn scalar_binary(&self, op: PredicateOp, right: Operand) -> Result<Predicate> {
        match &right {
            Operand::List(_) => Err(SqlError::shape(format!(
                "{:?} predicate on \"{}\".\"{}\" expects a scalar operand, got a collection",
                op, self.relation, self.name
            ))),
            Operand::Range(_, _) => Err(SqlError::shape(format!(
                "{:?} predicate on \"{}\".\"{}\" expects a scalar operand, got a range",
                op, self.relation, self.name
            ))),
            _ => Ok(self.binary(op, right)),
        }
    }
}
