//! Identifiers for strand objects.
//!
//! Groups and managed threads get a random UUID when they are created, so
//! their identity is stable before any OS thread exists and is never reused
//! within a process. The two kinds are separate types.
//!
//! # Examples
//!
//! ```
//! use strand_core::id::{GroupId, ThreadUid};
//!
//! let group = GroupId::new();
//! assert_eq!(group.short().len(), 8);
//! assert!(group.to_string().starts_with(&group.short()));
//!
//! let thread: ThreadUid = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
//! assert_eq!(thread.short(), "550e8400");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The first eight hex digits, for log lines.
            pub fn short(&self) -> String {
                let mut buf = Uuid::encode_buffer();
                self.0.simple().encode_lower(&mut buf)[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id! {
    /// Identity of a thread group.
    GroupId
}

define_id! {
    /// Stable identity of a managed thread, assigned before the OS thread exists.
    ThreadUid
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<ThreadUid> = (0..100).map(|_| ThreadUid::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_parse_and_display() {
        let text = "00000000-0000-0000-0000-00000000002a";
        let group: GroupId = text.parse().unwrap();
        assert_eq!(group.to_string(), text);
        assert_eq!(group.short(), "00000000");
        assert!("not-a-uuid".parse::<GroupId>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_uuid() {
        let id = GroupId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: GroupId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
