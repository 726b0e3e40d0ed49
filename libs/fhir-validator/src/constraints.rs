//! Constraint-evaluator collaborator contract.
//!
//! The expression language itself lives outside this crate; the engine
//! only defines how expressions are compiled, cached, and invoked. The
//! constraints step never fails validation because an expression could
//! not be handled — those outcomes become warnings.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("compile error: {0}")]
    Compile(String),

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("evaluation was cancelled")]
    Cancelled,
}

/// A compiled constraint expression, reusable across resources.
pub trait CompiledExpression: Send + Sync {
    /// Evaluate against a focus element, with the enclosing resource
    /// available for `%resource`-style references. Constraints are
    /// boolean by contract.
    fn evaluate(&self, resource: &Value, element: &Value) -> Result<bool, EvalError>;
}

/// Compiles constraint expressions on behalf of the engine.
pub trait ConstraintEvaluator: Send + Sync {
    fn compile(&self, expression: &str) -> Result<Arc<dyn CompiledExpression>, EvalError>;
}

/// Keyed cache of compiled expressions. Compile failures are cached too,
/// so a bad expression is reported once per validator rather than once
/// per resource. The cache is read-mostly; once the capacity is reached
/// further expressions are compiled on every use instead of evicting.
pub struct ExpressionCache {
    capacity: usize,
    inner: RwLock<HashMap<String, Result<Arc<dyn CompiledExpression>, EvalError>>>,
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_compile(
        &self,
        evaluator: &dyn ConstraintEvaluator,
        expression: &str,
    ) -> Result<Arc<dyn CompiledExpression>, EvalError> {
        {
            let cache = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(expression) {
                return hit.clone();
            }
        }

        let compiled = evaluator.compile(expression);
        let mut cache = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if cache.len() >= self.capacity && !cache.contains_key(expression) {
            return compiled;
        }
        cache
            .entry(expression.to_string())
            .or_insert(compiled)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
