//! Entity universe selection
//!
//! The universe of a run is the top-N entities by market cap rank, taken from a
//! market listing (fetched live or loaded from a saved listing file).

use crate::identifier::normalize_entity_id;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Maximum accepted listing file size (64 MB)
pub const MAX_LISTING_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// One entry of a market listing
///
/// Extra fields in the source JSON are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityListing {
    /// Stable entity id (e.g. "bitcoin")
    pub id: String,
    /// Ticker symbol
    #[serde(default)]
    pub symbol: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Market cap rank, `None` if unranked
    #[serde(default)]
    pub market_cap_rank: Option<u32>,
}

/// Ordered set of entity ids to ingest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityUniverse {
    ids: Vec<String>,
}

impl EntityUniverse {
    /// Select the top `top_n` entities by rank
    ///
    /// Unranked entities sort after every ranked one; ties keep listing order.
    /// Duplicate ids keep their best-ranked entry and ids that are not filesystem
    /// safe are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Empty`] if no entity survives selection.
    pub fn from_listings(listings: &[EntityListing], top_n: usize) -> Result<Self, RegistryError> {
        let mut ranked: Vec<&EntityListing> = listings.iter().collect();
        ranked.sort_by_key(|listing| listing.market_cap_rank.unwrap_or(u32::MAX));

        let mut seen = HashSet::new();
        let mut ids = Vec::with_capacity(top_n.min(ranked.len()));
        for listing in ranked {
            if ids.len() >= top_n {
                break;
            }

            let id = match normalize_entity_id(&listing.id) {
                Ok(id) => id,
                Err(e) => {
                    warn!(entity = %listing.id, error = %e, "Skipping entity with unusable id");
                    continue;
                }
            };

            if seen.insert(id.clone()) {
                ids.push(id);
            } else {
                debug!(entity = %id, "Skipping duplicate listing");
            }
        }

        if ids.is_empty() {
            return Err(RegistryError::Empty);
        }

        info!(
            requested = top_n,
            selected = ids.len(),
            listed = listings.len(),
            "Entity universe selected"
        );
        Ok(Self { ids })
    }

    /// Universe from explicit ids, in the given order
    pub fn from_ids<I, S>(ids: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for raw in ids {
            let id = normalize_entity_id(raw.as_ref())
                .map_err(|e| RegistryError::InvalidEntity(e.to_string()))?;
            if seen.insert(id.clone()) {
                selected.push(id);
            }
        }

        if selected.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { ids: selected })
    }

    /// Entity ids, best rank first
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Number of entities
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the universe is empty (never true for a constructed universe)
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Load a saved market listing
pub fn load_listings(path: &Path) -> Result<Vec<EntityListing>, RegistryError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| RegistryError::IoError(format!("{}: {e}", path.display())))?;
    if metadata.len() > MAX_LISTING_FILE_SIZE {
        return Err(RegistryError::ParseError(format!(
            "listing file too large: {} bytes (max: {MAX_LISTING_FILE_SIZE} bytes)",
            metadata.len()
        )));
    }

    let contents = std::fs::read_to_string(path)
        .map_err(|e| RegistryError::IoError(format!("{}: {e}", path.display())))?;
    let listings: Vec<EntityListing> = serde_json::from_str(&contents)
        .map_err(|e| RegistryError::ParseError(format!("Failed to parse listing: {e}")))?;

    debug!(path = %path.display(), entities = listings.len(), "Listing loaded");
    Ok(listings)
}

/// Save a market listing with an atomic replace
pub fn save_listings(path: &Path, listings: &[EntityListing]) -> Result<(), RegistryError> {
    let parent_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir).map_err(|e| RegistryError::IoError(e.to_string()))?;

    let json = serde_json::to_string_pretty(listings)
        .map_err(|e| RegistryError::ParseError(format!("Failed to serialize listing: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| RegistryError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| RegistryError::IoError(format!("Failed to write temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| RegistryError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| RegistryError::IoError(format!("Failed to persist temp file: {e}")))?;

    info!(path = %path.display(), entities = listings.len(), "Listing saved");
    Ok(())
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Entity id rejected
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    /// No entity selected
    #[error("entity list is empty")]
    Empty,
}
