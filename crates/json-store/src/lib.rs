//! Whole-file JSON repositories used by the run and rule registries.

mod lock;
mod models;
mod open;
mod query;
mod write;

pub use models::*;
pub use open::JsonIndex;

use anyhow::Result;

/// Keyed storage for registry records.
///
/// `update` runs a read-modify-write under the store's single-writer lock and
/// only persists when the closure changed something.
pub trait Repository<T> {
    fn get(&self, key: &str) -> Option<T>;
    fn list(&self) -> Vec<T>;
    fn put(&self, key: &str, value: T) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Entries<T>) -> Result<R>;
}
