//! Polymorphic entity addressing.
//!
//! Tracked entities of any type are addressed by a `(type discriminator, id)`
//! pair. The discriminator is the key used by the entity type registry.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Stable address of one tracked entity instance.
///
/// Ordering is by type, then id. Composite hashing relies on this ordering
/// when folding dependency collections.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub struct EntityRef {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityRef {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

impl FromStr for EntityRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((ty, id)) if !ty.is_empty() && !id.is_empty() => Ok(Self::new(ty, id)),
            _ => Err(CoreError::InvalidEntityRef(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let r = EntityRef::new("article", "42");
        assert_eq!(r.to_string(), "article:42");
        assert_eq!("article:42".parse::<EntityRef>().unwrap(), r);
    }

    #[test]
    fn id_may_contain_colons() {
        let r: EntityRef = "doc:urn:isbn:123".parse().unwrap();
        assert_eq!(r.entity_type, "doc");
        assert_eq!(r.entity_id, "urn:isbn:123");
    }

    #[test]
    fn rejects_malformed() {
        assert!("nocolon".parse::<EntityRef>().is_err());
        assert!(":42".parse::<EntityRef>().is_err());
        assert!("article:".parse::<EntityRef>().is_err());
    }

    #[test]
    fn orders_by_type_then_id() {
        let mut refs = vec![
            EntityRef::new("b", "1"),
            EntityRef::new("a", "2"),
            EntityRef::new("a", "10"),
        ];
        refs.sort();
        assert_eq!(refs[0], EntityRef::new("a", "10"));
        assert_eq!(refs[1], EntityRef::new("a", "2"));
        assert_eq!(refs[2], EntityRef::new("b", "1"));
    }
}
