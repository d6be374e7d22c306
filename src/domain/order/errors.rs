use std::fmt;

use crate::clients::ClientError;
use crate::context::Cancelled;
use crate::idempotency::IdempotencyError;
use crate::messaging::PublishError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Order Errors
// ============================================================================
//
// Everything above `Publish` is returned synchronously, before any durable
// side effect other than the idempotency reservation. `Publish` is only ever
// reported alongside a committed order, never as an operation failure.
//
// ============================================================================

/// Outbound collaborator a line item is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    Stock,
    Pricing,
}

impl Collaborator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collaborator::Stock => "stock",
            Collaborator::Pricing => "pricing",
        }
    }
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("duplicate request: idempotency key '{0}' already used")]
    DuplicateRequest(String),

    #[error("validation failed{}: {reason}", describe_product(.product_id))]
    Validation {
        product_id: Option<i64>,
        reason: String,
    },

    #[error("{service} service failed for product {product_id}: {source}")]
    Collaborator {
        service: Collaborator,
        product_id: i64,
        #[source]
        source: ClientError,
    },

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),

    #[error("order {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("idempotency store failure: {0}")]
    Idempotency(#[from] IdempotencyError),

    #[error("request cancelled")]
    Cancelled,
}

fn describe_product(product_id: &Option<i64>) -> String {
    match product_id {
        Some(id) => format!(" for product {id}"),
        None => String::new(),
    }
}

impl OrderError {
    pub fn validation(product_id: Option<i64>, reason: impl Into<String>) -> Self {
        OrderError::Validation {
            product_id,
            reason: reason.into(),
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::DuplicateRequest(_) => "duplicate_request",
            OrderError::Validation { .. } => "validation",
            OrderError::Collaborator { .. } => "collaborator",
            OrderError::Persistence(_) => "persistence",
            OrderError::NotFound(_) => "not_found",
            OrderError::Publish(_) => "publish",
            OrderError::Idempotency(_) => "idempotency",
            OrderError::Cancelled => "cancelled",
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => OrderError::NotFound(id),
            StoreError::DuplicateKey(key) => OrderError::DuplicateRequest(key),
            other => OrderError::Persistence(other),
        }
    }
}

impl From<Cancelled> for OrderError {
    fn from(_: Cancelled) -> Self {
        OrderError::Cancelled
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::Collaborator { source, .. } => source.is_transient(),
            OrderError::Persistence(e) => e.is_transient(),
            OrderError::Publish(e) => e.is_transient(),
            OrderError::Idempotency(e) => e.is_transient(),
            OrderError::DuplicateRequest(_)
            | OrderError::Validation { .. }
            | OrderError::NotFound(_)
            | OrderError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_product() {
        let err = OrderError::validation(Some(2), "insufficient stock");
        assert_eq!(err.to_string(), "validation failed for product 2: insufficient stock");

        let err = OrderError::validation(None, "empty order");
        assert_eq!(err.to_string(), "validation failed: empty order");
    }

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        assert!(matches!(OrderError::from(StoreError::NotFound(5)), OrderError::NotFound(5)));
        assert!(matches!(
            OrderError::from(StoreError::DuplicateKey("k".into())),
            OrderError::DuplicateRequest(ref k) if k == "k"
        ));
        assert!(matches!(
            OrderError::from(StoreError::Conflict(5)),
            OrderError::Persistence(StoreError::Conflict(5))
        ));
    }

    #[test]
    fn test_business_errors_are_not_transient() {
        assert!(!OrderError::validation(None, "x").is_transient());
        assert!(!OrderError::DuplicateRequest("k".into()).is_transient());
        assert!(!OrderError::NotFound(1).is_transient());
    }

    #[test]
    fn test_idempotency_errors_defer_to_source() {
        assert!(!OrderError::Idempotency(IdempotencyError::EmptyKey).is_transient());
    }
}
