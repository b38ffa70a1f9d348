use redb::TableDefinition;

/// Album records: album id -> AlbumRecord (msgpack)
pub const ALBUMS: TableDefinition<u64, &[u8]> = TableDefinition::new("albums");

/// Media records: media id -> MediaRecord (msgpack)
pub const ALBUM_MEDIA: TableDefinition<u64, &[u8]> = TableDefinition::new("album_media");

/// Album index: album id -> msgpack Vec of media ids
pub const ALBUM_MEDIA_INDEX: TableDefinition<u64, &[u8]> = TableDefinition::new("album_media_index");

/// Unique object key index: object key -> media id
pub const MEDIA_KEYS: TableDefinition<&str, u64> = TableDefinition::new("media_keys");

/// Write intents: object key -> PendingObject (msgpack), recorded before each put
pub const PENDING_OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("pending_objects");

/// Id sequences: sequence name -> last allocated id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub const ALBUM_SEQUENCE: &str = "albums";
pub const MEDIA_SEQUENCE: &str = "album_media";
