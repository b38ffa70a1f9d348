use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Three-state patch value for partial updates that survives serialization round-trips.
/// Unlike `Option<Option<T>>`, each variant has a distinct wire representation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Patch<T> {
    /// Field was not included in the request (no change).
    #[default]
    Absent,
    /// Field was explicitly set to null (clear it).
    Null,
    /// Field was set to a new value.
    Value(T),
}

impl<T> From<Option<Option<T>>> for Patch<T> {
    fn from(v: Option<Option<T>>) -> Self {
        match v {
            None => Patch::Absent,
            Some(None) => Patch::Null,
            Some(Some(v)) => Patch::Value(v),
        }
    }
}

impl<T: Clone> Patch<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Patch::Absent)
    }

    /// Apply the patch to an optional field.
    pub fn apply_to(&self, field: &mut Option<T>) {
        match self {
            Patch::Absent => {}
            Patch::Null => *field = None,
            Patch::Value(v) => *field = Some(v.clone()),
        }
    }
}

/// An album row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub publication_year: Option<i32>,
    /// Owning artist
    #[serde(default)]
    pub artist_id: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A media row: one object in the media bucket, owned by one album.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: u64,
    pub album_id: u64,
    /// Object key
    pub name: String,
    /// Time-limited access URL issued when the object was written
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// Write intent recorded before an object put and cleared when its media row commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingObject {
    pub key: String,
    pub album_id: u64,
    pub created_at: DateTime<Utc>,
    /// Set while the reconciliation sweep removes the object under this key.
    /// No upload may reserve the key until the marker is released.
    #[serde(default)]
    pub reclaiming: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NewAlbum {
    pub name: String,
    pub publication_year: Option<i32>,
    pub artist_id: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlbumPatch {
    pub name: Option<String>,
    pub publication_year: Patch<i32>,
    pub artist_id: Patch<u64>,
}

impl AlbumPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.publication_year.is_absent() && self.artist_id.is_absent()
    }

    pub fn apply(&self, album: &mut AlbumRecord) {
        if let Some(ref name) = self.name {
            album.name = name.clone();
        }
        self.publication_year.apply_to(&mut album.publication_year);
        self.artist_id.apply_to(&mut album.artist_id);
    }
}

/// Filters for album listing
#[derive(Debug, Clone, Default)]
pub struct AlbumFilter {
    /// Case-insensitive substring match on the album name
    pub name: Option<String>,
    pub artist_id: Option<u64>,
}

impl AlbumFilter {
    pub fn matches(&self, album: &AlbumRecord) -> bool {
        let name_matches = self.name.as_deref().map_or(true, |needle| {
            album.name.to_lowercase().contains(&needle.to_lowercase())
        });
        let artist_matches = self
            .artist_id
            .map_or(true, |artist| album.artist_id == Some(artist));
        name_matches && artist_matches
    }
}
