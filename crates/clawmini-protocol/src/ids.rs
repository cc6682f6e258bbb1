//! Typed ID wrappers.
//!
//! IDs are opaque String wrappers (serde-transparent). Session ids come from
//! clients and double as file stems, so they carry a validity check.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new_uuid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Opaque identifier of a conversation session.
    SessionId
);
typed_id!(
    /// Identifier of one execution run inside a turn (agent loop or model step).
    RunId
);

impl SessionId {
    /// Ensure the id can be used as a single file stem under the sessions dir.
    pub fn validate(&self) -> CoreResult<()> {
        let id = self.0.as_str();
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.starts_with('.')
            && !id.contains(['/', '\\', '\0']);
        if valid {
            Ok(())
        } else {
            Err(CoreError::InvalidSessionId(id.to_owned()))
        }
    }
}
