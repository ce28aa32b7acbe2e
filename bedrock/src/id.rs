//! Typed ID wrappers for artifacts and principals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up artifact IDs and principal IDs.
/// These are just strings underneath — no UUID enforcement, no format
/// requirement. The kernel doesn't care what your IDs look like, only
/// that they are unique across the single shared namespace.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new typed ID from anything that converts to String.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(ArtifactId, "Unique identifier for an artifact.");
typed_id!(
    PrincipalId,
    "Identifier of an artifact with standing (may hold balances)."
);

impl From<&ArtifactId> for PrincipalId {
    fn from(id: &ArtifactId) -> Self {
        Self(id.0.clone())
    }
}

impl From<&PrincipalId> for ArtifactId {
    fn from(id: &PrincipalId) -> Self {
        Self(id.0.clone())
    }
}
