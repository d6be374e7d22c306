// ============================================================================
// Core Actor Abstractions
// ============================================================================
//
// Generic, reusable actor traits and types.
// Infrastructure actors implement these traits.
//
// ============================================================================

pub mod health;

// Re-export core types
pub use health::*;

/// Implement `kameo::reply::Reply` for a plain value returned by a handler.
macro_rules! plain_reply {
    ($ty:ty) => {
        impl kameo::reply::Reply for $ty {
            type Ok = Self;
            type Error = kameo::error::Infallible;
            type Value = Self;

            fn to_result(self) -> Result<Self, kameo::error::Infallible> {
                Ok(self)
            }

            fn into_any_err(self) -> Option<Box<dyn kameo::reply::ReplyError>> {
                None
            }

            fn into_value(self) -> Self::Value {
                self
            }
        }
    };
}

pub(crate) use plain_reply;
