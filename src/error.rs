use std::time::Duration;

use thiserror::Error;

use crate::encoding::VertexId;
use crate::graph::validation::Violation;

pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors surfaced by the schema graph.
///
/// Validation and root-mutation failures are returned at the call site and
/// leave the transaction usable. Concurrency and invariant failures poison the
/// transaction; the only recovery is rollback.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("malformed key: {0}")]
    MalformedKey(&'static str),
    #[error("unsupported schema version: {0}")]
    UnsupportedSchemaVersion(u8),
    #[error("corruption detected: {0}")]
    Corruption(String),
    #[error("type '{0}' not found")]
    TypeNotFound(String),
    #[error("root type '{0}' cannot be mutated")]
    RootTypeMutation(String),
    #[error("schema validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),
    #[error("concurrent schema write detected")]
    ConcurrentSchemaWrite,
    #[error("commit timed out after {0:?}")]
    CommitTimeout(Duration),
    #[error("subtype hierarchy contains a cycle through '{0}'")]
    SchemaCycle(String),
    #[error("adjacency mirror out of sync between vertices {from:?} and {to:?}")]
    MirrorAsymmetry { from: VertexId, to: VertexId },
    #[error("transaction is poisoned and must be rolled back")]
    TransactionPoisoned,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl SchemaError {
    /// Whether the transaction remains usable after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SchemaError::Validation(_)
                | SchemaError::RootTypeMutation(_)
                | SchemaError::TypeNotFound(_)
                | SchemaError::InvalidArgument(_)
        )
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
