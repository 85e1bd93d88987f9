//! Core data model for the upload store.
//!
//! Uploads are not tracked in any database; a `StorageKey` is all that is
//! needed to find a stored file on disk or to build its public URL.

pub mod storage_key;
