//! Branded ID newtypes for type safety.
//!
//! Every entity vigil tracks has a distinct ID type implemented as a newtype
//! wrapper around `String`. This prevents accidentally passing a project id
//! where a session id is expected.
//!
//! Session ids and project ids are supplied by the subprocess/caller and are
//! opaque strings (§3), not generated here. `RequestId` is the one id vigil
//! itself mints, as UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`].

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random id (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }

            /// Wrap an existing string value (e.g. one supplied by the subprocess).
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Opaque session identifier, supplied by the subprocess or the caller (§3).
    SessionId
}

branded_id! {
    /// Opaque project identifier, derived from its directory name (§3).
    ProjectId
}

branded_id! {
    /// Identifier for a pending permission request (§3), minted by the wrapper.
    RequestId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_new_is_uuid_v7() {
        let id = RequestId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_string_wraps_opaque_caller_id() {
        let id = SessionId::from_string("caller-supplied-123".to_owned());
        assert_eq!(id.as_str(), "caller-supplied-123");
    }

    #[test]
    fn from_str_ref() {
        let id = ProjectId::from("my-project");
        assert_eq!(id.as_str(), "my-project");
    }

    #[test]
    fn deref_to_str() {
        let id = SessionId::from("hello");
        let s: &str = &id;
        assert_eq!(s, "hello");
    }

    #[test]
    fn display() {
        let id = SessionId::from("display-me");
        assert_eq!(format!("{id}"), "display-me");
    }

    #[test]
    fn into_string() {
        let id = ProjectId::from("convert");
        let s: String = id.into();
        assert_eq!(s, "convert");
    }

    #[test]
    fn serde_roundtrip() {
        let id = SessionId::from("serde-test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"serde-test\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_in_struct() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Envelope {
            session_id: SessionId,
            project_id: ProjectId,
        }

        let env = Envelope {
            session_id: SessionId::from("sess-1"),
            project_id: ProjectId::from("proj-1"),
        };
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(env, back);
    }

    #[test]
    fn hash_and_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        let id = SessionId::from("same");
        let _ = set.insert(id.clone());
        let _ = set.insert(id.clone());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn default_creates_new() {
        let id1 = RequestId::default();
        let id2 = RequestId::default();
        assert_ne!(id1, id2, "default should create unique ids");
    }

    #[test]
    fn into_inner() {
        let id = SessionId::from("inner-test");
        let inner = id.into_inner();
        assert_eq!(inner, "inner-test");
    }

    #[test]
    fn ordering_is_lexicographic_on_inner_string() {
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        assert!(a < b);
    }
}
