//! Entity key parsing and validation
//!
//! An entity key identifies one independent progress/storage stream:
//! `ENTITY:GRANULARITY`, e.g. `bitcoin:daily`.

use crate::Granularity;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Maximum accepted entity id length
const MAX_ENTITY_ID_LEN: usize = 128;

/// Key of one (entity, granularity) stream
///
/// Entity ids are normalized to lowercase. They name store files on disk, so only
/// `[a-z0-9._-]` is accepted and a leading dot is rejected.
///
/// # Examples
///
/// ```
/// use ohlc_backfill::identifier::EntityKey;
/// use ohlc_backfill::Granularity;
///
/// let key = EntityKey::parse("Bitcoin:daily").unwrap();
/// assert_eq!(key.entity_id(), "bitcoin");
/// assert_eq!(key.granularity(), Granularity::Daily);
/// assert_eq!(key.to_string(), "bitcoin:daily");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    entity_id: String,
    granularity: Granularity,
}

impl EntityKey {
    /// Build a key from an entity id and granularity, validating the id
    pub fn new(entity_id: &str, granularity: Granularity) -> Result<Self, IdentifierError> {
        let entity_id = normalize_entity_id(entity_id)?;
        Ok(Self {
            entity_id,
            granularity,
        })
    }

    /// Parse a key string of the form `ENTITY:GRANULARITY`
    ///
    /// # Errors
    ///
    /// Returns an error if the format is invalid, the granularity is unknown, or the
    /// entity id is not filesystem safe.
    pub fn parse(s: &str) -> Result<Self, IdentifierError> {
        let (entity, granularity) = s.rsplit_once(':').ok_or_else(|| {
            IdentifierError::InvalidFormat(
                "invalid entity key format: expected ENTITY:GRANULARITY".to_string(),
            )
        })?;

        let granularity =
            Granularity::from_str(granularity).map_err(IdentifierError::InvalidFormat)?;

        Self::new(entity, granularity)
    }

    /// Get the entity id (lowercase)
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Get the granularity
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_id, self.granularity)
    }
}

impl FromStr for EntityKey {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for EntityKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Normalize and validate an entity id
pub fn normalize_entity_id(raw: &str) -> Result<String, IdentifierError> {
    let id = raw.trim().to_lowercase();

    if id.is_empty() {
        return Err(IdentifierError::InvalidFormat(
            "entity id cannot be empty".to_string(),
        ));
    }

    if id.len() > MAX_ENTITY_ID_LEN {
        return Err(IdentifierError::InvalidFormat(format!(
            "entity id longer than {MAX_ENTITY_ID_LEN} characters"
        )));
    }

    if id.starts_with('.') {
        return Err(IdentifierError::InvalidFormat(format!(
            "entity id cannot start with '.': {id}"
        )));
    }

    if let Some(bad) = id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
    {
        return Err(IdentifierError::InvalidFormat(format!(
            "entity id contains invalid character {bad:?}: {id}"
        )));
    }

    Ok(id)
}

/// Errors that can occur during entity key parsing
#[derive(Debug, thiserror::Error)]
pub enum IdentifierError {
    /// Invalid key or entity id format
    #[error("identifier error: {0}")]
    InvalidFormat(String),
}
