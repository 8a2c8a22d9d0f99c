//! Cheap-to-clone channel identifiers
//!
//! Both logical subscription names and physical topic keys are created once
//! at registration time and cloned into every dispatcher snapshot, so they
//! wrap an `Arc<str>` and clone in O(1).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

macro_rules! arc_str_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Default)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a new identifier from a string slice.
            #[inline]
            pub fn new(s: &str) -> Self {
                Self(Arc::from(s))
            }

            /// Get the underlying string slice.
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            #[inline]
            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            #[inline]
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            #[inline]
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            #[inline]
            fn from(s: &str) -> Self {
                Self(Arc::from(s))
            }
        }

        impl From<String> for $name {
            #[inline]
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl PartialEq for $name {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
            }
        }

        impl Eq for $name {}

        impl PartialEq<str> for $name {
            #[inline]
            fn eq(&self, other: &str) -> bool {
                self.0.as_ref() == other
            }
        }

        impl PartialEq<&str> for $name {
            #[inline]
            fn eq(&self, other: &&str) -> bool {
                self.0.as_ref() == *other
            }
        }

        impl PartialEq<String> for $name {
            #[inline]
            fn eq(&self, other: &String) -> bool {
                self.0.as_ref() == other
            }
        }

        // Same as the str hash so maps keyed by this type can be queried with &str
        impl Hash for $name {
            #[inline]
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash(state)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }
    };
}

arc_str_id!(
    /// Logical subscription name (a "vchannel").
    ///
    /// Every record on a physical topic carries the name of the logical
    /// channel it belongs to; dispatchers match on it.
    ///
    /// ```
    /// use contracts::ChannelName;
    ///
    /// let name: ChannelName = "dml_0_441v0".into();
    /// assert_eq!(name, "dml_0_441v0");
    /// ```
    ChannelName
);

arc_str_id!(
    /// Broker-level topic key (a "pchannel").
    PhysicalTopic
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_is_cheap() {
        let a: ChannelName = "v1".into();
        let b = a.clone();
        assert_eq!(a.as_str().as_ptr(), b.as_str().as_ptr());
    }

    #[test]
    fn test_equality() {
        let topic: PhysicalTopic = "p0".into();
        assert_eq!(topic, "p0");
        assert_eq!(topic, String::from("p0"));
        assert_eq!(topic, PhysicalTopic::new("p0"));
    }

    #[test]
    fn test_hashmap_lookup_by_str() {
        let mut map: HashMap<ChannelName, u32> = HashMap::new();
        map.insert("v1".into(), 1);
        assert_eq!(map.get("v1"), Some(&1));
        assert_eq!(map.get("v2"), None);
    }

    #[test]
    fn test_serde_as_plain_string() {
        let name: ChannelName = "v1".into();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"v1\"");
        let back: ChannelName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn test_debug_names_type() {
        let topic: PhysicalTopic = "p0".into();
        assert_eq!(format!("{topic:?}"), "PhysicalTopic(\"p0\")");
    }
}
