// Archive storage: per-kind folders, collision-safe names, notes

pub mod media_store;

pub use media_store::{MediaStore, StoredFile};
