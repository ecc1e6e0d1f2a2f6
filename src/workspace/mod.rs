pub mod feedback;
pub mod finance;
pub mod knowledge;
pub mod profile;
pub mod templates;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::error::RecordError;
use crate::store::Store;

pub use templates::Template;

pub type Result<T> = std::result::Result<T, RecordError>;

/// Feedback, knowledge base, templates, finance bills and the profile. Each
/// list is stored whole under one key; `writes` serializes read-modify-write.
pub struct Workspace {
    store: Store,
    user_id: String,
    writes: Mutex<()>,
    /// Ratings are adjusted in memory only; the catalog itself is static.
    catalog: RwLock<Vec<Template>>,
}

impl Workspace {
    pub fn new(store: Store, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            writes: Mutex::new(()),
            catalog: RwLock::new(templates::catalog()),
        }
    }

    /// Read a list, falling back to `seed` when nothing has been stored yet.
    async fn load_seeded<T: DeserializeOwned>(&self, key: &str, seed: fn() -> Vec<T>) -> Result<Vec<T>> {
        Ok(self.store.get_json(key).await?.unwrap_or_else(seed))
    }

    /// Read-modify-write a seeded list under the write lock.
    async fn update_seeded<T, R>(
        &self,
        key: &str,
        seed: fn() -> Vec<T>,
        mutate: impl FnOnce(&mut Vec<T>) -> Result<R>,
    ) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
    {
        let _guard = self.writes.lock().await;
        let mut items = self.load_seeded(key, seed).await?;
        let result = mutate(&mut items)?;
        self.store.put_json(key, &items).await?;
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) async fn temp_workspace() -> (tempfile::TempDir, Workspace) {
    let (dir, store) = crate::store::temp_store().await;
    (dir, Workspace::new(store, "admin"))
}
