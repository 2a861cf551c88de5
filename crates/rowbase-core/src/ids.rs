//! Typed identifiers.
//!
//! Every identifier is a 16-byte UUID. Newly minted ids use UUID v7 so that
//! their byte order follows creation time, which keeps sled key ranges for
//! recent rows together.

use std::fmt;
use std::str::FromStr;

use rkyv::{Archive, Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Mint a new time-ordered identifier.
            pub fn new() -> Self {
                Self(*Uuid::now_v7().as_bytes())
            }

            /// Wrap raw identifier bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Decode from a 16-byte slice, as stored in sled keys.
            pub fn from_slice(bytes: &[u8]) -> Option<Self> {
                <[u8; 16]>::try_from(bytes).ok().map(Self)
            }

            /// Raw identifier bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// View as a UUID.
            pub fn as_uuid(&self) -> Uuid {
                Uuid::from_bytes(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(*uuid.as_bytes())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.as_uuid().hyphenated(), f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_uuid().hyphenated())
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self::from)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <String as serde::Deserialize>::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(
    /// Identifies an entity definition.
    EntityId
);
define_id!(
    /// Identifies a property definition within the catalog.
    PropertyId
);
define_id!(
    /// Identifies a row.
    RowId
);
define_id!(
    /// Identifies a tenant.
    TenantId
);
define_id!(
    /// Identifies a user actor.
    UserId
);
define_id!(
    /// Identifies an API key actor.
    ApiKeyId
);
define_id!(
    /// Identifies a relationship definition between two entities.
    RelationshipDefId
);
define_id!(
    /// Identifies one parent/child link between two rows.
    RelationshipId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_parses_back() {
        let id = RowId::new();
        let parsed: RowId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_v7_ids_are_time_ordered() {
        let first = RowId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = RowId::new();
        assert!(first < second);
    }

    #[test]
    fn test_serde_uses_uuid_string() {
        let id = EntityId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        assert!(UserId::from_slice(&[0u8; 15]).is_none());
        assert!(UserId::from_slice(&[7u8; 16]).is_some());
    }
}
