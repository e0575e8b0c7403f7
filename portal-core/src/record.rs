//! Character records
//!
//! [`RawRecord`] mirrors the upstream JSON payload; [`Record`] is the slim,
//! filtered shape that gets persisted and served.

use serde::{Deserialize, Deserializer, Serialize};

/// A persisted character.
///
/// Every stored record satisfies [`crate::keep`]. Records are upserted by
/// `id` and never deleted in steady state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Upstream identifier, stable across refreshes.
    pub id: i64,
    pub name: String,
    pub status: String,
    pub species: String,
    /// Origin location name, e.g. "Earth (C-137)".
    #[serde(rename = "origin")]
    pub origin_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Record {
    /// Project a raw upstream record into the persisted shape.
    pub fn from_raw(raw: &RawRecord) -> Self {
        Self {
            id: raw.id,
            name: raw.name.clone(),
            status: raw.status.clone(),
            species: raw.species.clone(),
            origin_name: raw.origin.name.clone(),
            image: raw.image.clone(),
            url: raw.url.clone(),
        }
    }
}

/// Treat an explicit JSON `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Origin block of an upstream character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOrigin {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A character exactly as the upstream API returns it.
///
/// Everything except `id` tolerates absence or `null` so a sparse payload is
/// filtered out rather than failing the whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub species: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub origin: RawOrigin,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// Pagination block of an upstream page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub pages: Option<u32>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub prev: Option<String>,
}

/// One page of upstream results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: PageInfo,
    #[serde(default, deserialize_with = "null_as_default")]
    pub results: Vec<RawRecord>,
}

impl RawPage {
    /// Whether the upstream advertises another page after this one.
    pub fn has_next(&self) -> bool {
        self.info
            .next
            .as_deref()
            .map(|next| !next.is_empty())
            .unwrap_or(false)
    }
}
