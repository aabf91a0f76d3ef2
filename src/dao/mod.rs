/// Image blob storage and signed read URLs.
pub mod blob_store;
/// Database model definitions.
pub mod models;
/// Session, upload and scoring record persistence.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
