use redb::TableDefinition;

/// Upload metadata records: uuid -> UploadRecord (msgpack)
pub const UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("uploads");

/// Content key index: key -> msgpack Vec of record UUIDs. The reference
/// count that gates physical blob deletion lives here.
pub const UPLOAD_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("upload_keys");

/// Owner index: "owner_type/owner_id/attr" -> msgpack Vec of record UUIDs
pub const OWNER_UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_uploads");
