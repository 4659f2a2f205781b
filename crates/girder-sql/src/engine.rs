//! Adapter boundary and the engine facade.
//!
//! The compiler's contract ends at producing SQL plus binds; execution
//! belongs to a connection adapter supplied by the embedding application.
//! The adapter interface is a fixed, enumerated set of methods; nothing is
//! forwarded dynamically, and adapter failures propagate unwrapped.

use crate::compiler::{compile, CompileCache, Compiled};
use crate::error::SqlError;
use crate::formatter::{BindMode, Dialect};
use crate::relation::Relation;
use crate::value::Value;
use crate::writes::{compile_delete, compile_insert, compile_update, Delete, Insert, Update};
use std::sync::Arc;
use thiserror::Error;

/// Error raised by a connection adapter at execution time. Kept separate
/// from [`SqlError`] so callers can tell "bad query shape" from "database
/// unavailable".
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("adapter error: {message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Connection adapter consumed by the engine: identifier quoting plus
/// statement execution. The compiler never executes SQL itself.
pub trait Adapter: Send + Sync {
    fn quote_table_name(&self, name: &str) -> String;
    fn quote_column_name(&self, name: &str) -> String;

    /// Execute a statement, returning the affected/returned row count.
    fn execute(&self, sql: &str, binds: &[Value]) -> Result<u64, AdapterError>;
}

/// Bridges an [`Adapter`]'s quoting hooks into the formatter's dialect
/// seam. String quoting follows ANSI conventions.
struct AdapterDialect<'a> {
    adapter: &'a dyn Adapter,
}

impl Dialect for AdapterDialect<'_> {
    fn quote_table_name(&self, name: &str) -> String {
        self.adapter.quote_table_name(name)
    }

    fn quote_column_name(&self, name: &str) -> String {
        self.adapter.quote_column_name(name)
    }

    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }
}

/// Engine failure: either the query was malformed, or the adapter rejected
/// its execution. The adapter error is carried as-is, never rewrapped.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Compiles relations and hands the result to an injected adapter.
pub struct Engine {
    adapter: Arc<dyn Adapter>,
    mode: BindMode,
    cache: CompileCache,
}

impl Engine {
    /// Engine with parameterized binds (the default policy).
    pub fn new(adapter: Arc<dyn Adapter>) -> Self {
        Self::with_mode(adapter, BindMode::Parameters)
    }

    pub fn with_mode(adapter: Arc<dyn Adapter>, mode: BindMode) -> Self {
        Self { adapter, mode, cache: CompileCache::new() }
    }

    pub fn bind_mode(&self) -> BindMode {
        self.mode
    }

    /// Compile a relation without executing it. Results are memoized by the
    /// relation's structural fingerprint.
    pub fn compile(&self, relation: &Relation) -> Result<Arc<Compiled>, SqlError> {
        let dialect = AdapterDialect { adapter: self.adapter.as_ref() };
        self.cache.get_or_compile(relation, &dialect, self.mode)
    }

    /// Compile and execute a SELECT.
    pub fn execute(&self, relation: &Relation) -> Result<u64, EngineError> {
        let compiled = self.compile(relation)?;
        log::debug!("executing: {}", compiled.sql);
        Ok(self.adapter.execute(&compiled.sql, &compiled.binds)?)
    }

    /// Compile and execute an INSERT.
    pub fn execute_insert(&self, insert: &Insert) -> Result<u64, EngineError> {
        let dialect = AdapterDialect { adapter: self.adapter.as_ref() };
        let compiled = compile_insert(insert, &dialect, self.mode)?;
        log::debug!("executing: {}", compiled.sql);
        Ok(self.adapter.execute(&compiled.sql, &compiled.binds)?)
    }

    /// Compile and execute an UPDATE.
    pub fn execute_update(&self, update: &Update) -> Result<u64, EngineError> {
        let dialect = AdapterDialect { adapter: self.adapter.as_ref() };
        let compiled = compile_update(update, &dialect, self.mode)?;
        log::debug!("executing: {}", compiled.sql);
        Ok(self.adapter.execute(&compiled.sql, &compiled.binds)?)
    }

    /// Compile and execute a DELETE.
    pub fn execute_delete(&self, delete: &Delete) -> Result<u64, EngineError> {
        let dialect = AdapterDialect { adapter: self.adapter.as_ref() };
        let compiled = compile_delete(delete, &dialect, self.mode)?;
        log::debug!("executing: {}", compiled.sql);
        Ok(self.adapter.execute(&compiled.sql, &compiled.binds)?)
    }
}

/// Compile a relation against a plain dialect, without an engine. Useful
/// when the caller executes SQL through its own machinery.
pub fn compile_with(
    relation: &Relation,
    dialect: &dyn Dialect,
    mode: BindMode,
) -> Result<Compiled, SqlError> {
    compile(relation, dialect, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct RecordedCall {
        sql: String,
        binds: Vec<Value>,
    }

    // A tiny recording adapter; quoting follows ANSI conventions.
    struct RecordingAdapter {
        calls: std::sync::Mutex<Vec<RecordedCall>>,
        fail_with: Option<String>,
    }

    impl RecordingAdapter {
        fn new() -> Self {
            Self { calls: std::sync::Mutex::new(Vec::new()), fail_with: None }
        }

        fn failing(message: &str) -> Self {
            Self {
                calls: std::sync::Mutex::new(Vec::new()),
                fail_with: Some(message.to_string()),
            }
        }
    }

    impl Adapter for RecordingAdapter {
        fn quote_table_name(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }

        fn quote_column_name(&self, name: &str) -> String {
            format!("\"{}\"", name)
        }

        fn execute(&self, sql: &str, binds: &[Value]) -> Result<u64, AdapterError> {
            if let Some(message) = &self.fail_with {
                return Err(AdapterError::new(message.clone()));
            }
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall { sql: sql.to_string(), binds: binds.to_vec() });
            Ok(1)
        }
    }

    fn users() -> Relation {
        Relation::table("users").unwrap()
    }

    #[test]
    fn test_engine_executes_compiled_sql() {
        let adapter = Arc::new(RecordingAdapter::new());
        let engine = Engine::new(adapter.clone());

        let users = users();
        let relation = users.clone().filter(users.attr("id").eq(5)).unwrap();
        engine.execute(&relation).unwrap();

        let calls = adapter.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].sql, "SELECT * FROM \"users\" WHERE \"users\".\"id\" = $1");
        assert_eq!(calls[0].binds, vec![Value::Integer(5)]);
    }

    #[test]
    fn test_adapter_error_propagates_unwrapped() {
        let adapter = Arc::new(RecordingAdapter::failing("connection lost"));
        let engine = Engine::new(adapter);

        let err = engine.execute(&users()).unwrap_err();
        match err {
            EngineError::Adapter(inner) => assert_eq!(inner.message, "connection lost"),
            other => panic!("expected adapter error, got {:?}", other),
        }
    }

    #[test]
    fn test_shape_error_stays_distinct_from_adapter_error() {
        let users = users();
        let other = Relation::table("accounts").unwrap();
        let err = users.clone().filter(other.attr("id").eq(1)).unwrap_err();
        let engine_err = EngineError::from(err);
        assert!(matches!(engine_err, EngineError::Sql(SqlError::Shape(_))));
    }

    #[test]
    fn test_compile_is_cached_across_executes() {
        let adapter = Arc::new(RecordingAdapter::new());
        let engine = Engine::new(adapter);

        let relation = users().take(1);
        let first = engine.compile(&relation).unwrap();
        let second = engine.compile(&relation).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
