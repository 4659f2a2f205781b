//! Relational AST and SQL compiler for Girder.
//!
//! Application code builds a relation tree out of immutable value nodes:
//! attributes, predicates, tables and compound wrappers. It compiles
//! to dialect-specific SQL text plus an ordered bind list. Execution is
//! delegated to an injected [`engine::Adapter`]; this crate never touches a
//! database itself.
//!
//! # Example
//!
//! ```
//! use girder_sql::{compile, AnsiDialect, BindMode, Relation};
//!
//! let users = Relation::table("users").unwrap();
//! let query = users
//!     .clone()
//!     .select(vec![users.attr("name")])
//!     .unwrap()
//!     .filter(users.attr("id").eq(5))
//!     .unwrap()
//!     .take(1);
//!
//! let compiled = compile(&query, &AnsiDialect, BindMode::Inline).unwrap();
//! assert_eq!(
//!     compiled.sql,
//!     "SELECT \"users\".\"name\" FROM \"users\" WHERE \"users\".\"id\" = 5 LIMIT 1"
//! );
//! ```

pub mod attribute;
mod christener;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod predicate;
pub mod relation;
pub mod value;
pub mod writes;

pub use attribute::{AttrType, Attribute};
pub use compiler::{compile, CompileCache, Compiled};
pub use engine::{Adapter, AdapterError, Engine, EngineError};
pub use error::{Result, SqlError};
pub use formatter::{AnsiDialect, BindMode, Dialect, Formatter};
pub use predicate::{Operand, Predicate, PredicateOp};
pub use relation::{JoinKind, OrderDirection, Ordering, Relation};
pub use value::Value;
pub use writes::{compile_delete, compile_insert, compile_update, Delete, Insert, Update};
