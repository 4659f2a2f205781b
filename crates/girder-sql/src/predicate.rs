//! Boolean-valued AST nodes for WHERE and JOIN-ON clauses.

use crate::attribute::Attribute;
use crate::relation::Relation;
use crate::value::Value;
use std::hash::Hasher;

/// The closed set of operand variants a formatter must handle.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Attribute(Attribute),
    Value(Value),
    List(Vec<Value>),
    Range(Box<Value>, Box<Value>),
    Subquery(Box<Relation>),
}

impl Operand {
    pub fn subquery(relation: Relation) -> Self {
        Operand::Subquery(Box::new(relation))
    }

    /// Attributes referenced by this operand. Subquery internals resolve
    /// against their own relation tree and are not surfaced here.
    pub(crate) fn attributes(&self) -> Vec<&Attribute> {
        match self {
            Operand::Attribute(attr) => vec![attr],
            _ => Vec::new(),
        }
    }

    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        match self {
            Operand::Attribute(attr) => {
                state.write_u8(0);
                attr.hash_into(state);
            },
            Operand::Value(v) => {
                state.write_u8(1);
                v.hash_into(state);
            },
            Operand::List(values) => {
                state.write_u8(2);
                state.write_usize(values.len());
                for v in values {
                    v.hash_into(state);
                }
            },
            Operand::Range(lo, hi) => {
                state.write_u8(3);
                lo.hash_into(state);
                hi.hash_into(state);
            },
            Operand::Subquery(rel) => {
                state.write_u8(4);
                state.write_u64(rel.fingerprint());
            },
        }
    }
}

impl From<Attribute> for Operand {
    fn from(attr: Attribute) -> Self {
        Operand::Attribute(attr)
    }
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Operand::Value(v)
    }
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Value(Value::Integer(v))
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Value(Value::Integer(v as i64))
    }
}

impl From<bool> for Operand {
    fn from(v: bool) -> Self {
        Operand::Value(Value::Bool(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Value(Value::Float(v))
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Value(Value::Str(v.to_string()))
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::Value(Value::Str(v))
    }
}

impl From<Vec<Value>> for Operand {
    fn from(values: Vec<Value>) -> Self {
        Operand::List(values)
    }
}

impl From<(Value, Value)> for Operand {
    fn from((lo, hi): (Value, Value)) -> Self {
        Operand::Range(Box::new(lo), Box::new(hi))
    }
}

/// Binary predicate operator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredicateOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Matches,
    In,
    NotIn,
    Between,
}

impl PredicateOp {
    /// Whether operand order is interchangeable. Only genuinely commutative
    /// operators qualify; comparisons, LIKE, and inclusion stay
    /// order-sensitive.
    pub fn is_commutative(&self) -> bool {
        matches!(self, PredicateOp::Eq | PredicateOp::NotEq)
    }
}

/// A boolean-valued AST node.
#[derive(Debug, Clone)]
pub enum Predicate {
    Binary { left: Operand, op: PredicateOp, right: Operand },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn binary(left: Operand, op: PredicateOp, right: Operand) -> Self {
        Predicate::Binary { left, op, right }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Predicate {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// All attributes referenced by this predicate tree.
    pub(crate) fn attributes(&self) -> Vec<&Attribute> {
        match self {
            Predicate::Binary { left, right, .. } => {
                let mut attrs = left.attributes();
                attrs.extend(right.attributes());
                attrs
            },
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                let mut attrs = l.attributes();
                attrs.extend(r.attributes());
                attrs
            },
        }
    }

    pub(crate) fn hash_into(&self, state: &mut impl Hasher) {
        match self {
            Predicate::Binary { left, op, right } => {
                state.write_u8(0);
                state.write_u8(*op as u8);
                if op.is_commutative() {
                    // Hash commutative predicates order-independently so
                    // structurally equal nodes hash alike.
                    let mut lh = std::collections::hash_map::DefaultHasher::new();
                    left.hash_into(&mut lh);
                    let mut rh = std::collections::hash_map::DefaultHasher::new();
                    right.hash_into(&mut rh);
                    let (a, b) = {
                        let (l, r) = (lh.finish(), rh.finish());
                        if l <= r {
                            (l, r)
                        } else {
                            (r, l)
                        }
                    };
                    state.write_u64(a);
                    state.write_u64(b);
                } else {
                    left.hash_into(state);
                    right.hash_into(state);
                }
            },
            Predicate::And(l, r) => {
                state.write_u8(1);
                l.hash_into(state);
                r.hash_into(state);
            },
            Predicate::Or(l, r) => {
                state.write_u8(2);
                l.hash_into(state);
                r.hash_into(state);
            },
        }
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Predicate::Binary { left: l1, op: op1, right: r1 },
                Predicate::Binary { left: l2, op: op2, right: r2 },
            ) => {
                if op1 != op2 {
                    return false;
                }
                if l1 == l2 && r1 == r2 {
                    return true;
                }
                // Operand order is interchangeable for commutative operators.
                op1.is_commutative() && l1 == r2 && r1 == l2
            },
            (Predicate::And(l1, r1), Predicate::And(l2, r2)) => l1 == l2 && r1 == r2,
            (Predicate::Or(l1, r1), Predicate::Or(l2, r2)) => l1 == l2 && r1 == r2,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttrType;

    fn attr(name: &str) -> Attribute {
        Attribute::new("users", name, AttrType::Integer)
    }

    #[test]
    fn test_equality_is_symmetric() {
        let a = Operand::Attribute(attr("id"));
        let b = Operand::Value(Value::Integer(5));

        let p1 = Predicate::binary(a.clone(), PredicateOp::Eq, b.clone());
        let p2 = Predicate::binary(b, PredicateOp::Eq, a);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_not_eq_is_symmetric() {
        let a = Operand::Attribute(attr("id"));
        let b = Operand::Attribute(attr("other_id"));

        let p1 = Predicate::binary(a.clone(), PredicateOp::NotEq, b.clone());
        let p2 = Predicate::binary(b, PredicateOp::NotEq, a);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_less_than_is_order_sensitive() {
        let a = Operand::Attribute(attr("id"));
        let b = Operand::Value(Value::Integer(5));

        let p1 = Predicate::binary(a.clone(), PredicateOp::Lt, b.clone());
        let p2 = Predicate::binary(b, PredicateOp::Lt, a);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_matches_is_order_sensitive() {
        let a = Operand::Attribute(attr("name"));
        let b = Operand::Value(Value::Str("A%".into()));

        let p1 = Predicate::binary(a.clone(), PredicateOp::Matches, b.clone());
        let p2 = Predicate::binary(b, PredicateOp::Matches, a);
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_symmetric_predicates_hash_alike() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::Hasher;

        let a = Operand::Attribute(attr("id"));
        let b = Operand::Value(Value::Integer(5));
        let p1 = Predicate::binary(a.clone(), PredicateOp::Eq, b.clone());
        let p2 = Predicate::binary(b, PredicateOp::Eq, a);

        let mut h1 = DefaultHasher::new();
        p1.hash_into(&mut h1);
        let mut h2 = DefaultHasher::new();
        p2.hash_into(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn test_and_composition() {
        let p = attr("id").eq(5).and(attr("age").eq(30));
        assert!(matches!(p, Predicate::And(_, _)));
        assert_eq!(p.attributes().len(), 2);
    }
}
