//! Object store holding the published image archives.

pub mod error;
pub mod supabase;

use async_trait::async_trait;

pub use error::StorageError;
pub use supabase::SupabaseStorage;

/// Named binary objects with a stable public reference per name.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Store `bytes` under `name`, overwriting any existing object.
    async fn upload(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Remove an object. Removing a missing object is not an error.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Public location of the object called `name`. Pure; does not check
    /// that the object exists.
    fn public_reference(&self, name: &str) -> String;
}
