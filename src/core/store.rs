use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use indexmap::{IndexMap, IndexSet};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::checkin::UserRecord;
use super::error::Result;
use super::idol::IdolRecord;

pub type IdolMap = IndexMap<String, IdolRecord>;
pub type UserMap = IndexMap<String, UserRecord>;
pub type AdminList = IndexSet<String>;
/// Reserved for group management; always written as `{}`.
pub type GroupMap = IndexMap<String, Value>;

/// What a guarded mutation wants done with the collection afterwards.
pub enum Change<R> {
    /// The data changed; flush it to disk.
    Save(R),
    /// Nothing changed; leave the file alone.
    Keep(R),
}

/// One JSON file mirrored in memory as a whole.
///
/// Every load-mutate-persist sequence runs under the write guard, so callers
/// cannot interleave into a lost update. Reads see a consistent snapshot.
pub struct Collection<T> {
    name: &'static str,
    path: Option<PathBuf>,
    data: RwLock<T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load a collection from `path`, creating it when missing and resetting it
    /// to the empty default when it cannot be read.
    pub fn open(name: &'static str, path: PathBuf) -> Self {
        let data = match Self::load(&path) {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!(collection = name, path = %path.display(), "creating empty collection");
                Self::write_default(name, &path)
            }
            Err(e) => {
                warn!(collection = name, path = %path.display(), error = %e, "collection unreadable, resetting to empty");
                Self::write_default(name, &path)
            }
        };

        Collection {
            name,
            path: Some(path),
            data: RwLock::new(data),
        }
    }

    /// A collection that never touches the disk.
    pub fn in_memory(name: &'static str) -> Self {
        Collection {
            name,
            path: None,
            data: RwLock::new(T::default()),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.data.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn snapshot(&self) -> T
    where
        T: Clone,
    {
        self.read(|data| data.clone())
    }

    /// Run `f` under the exclusive guard and flush when it reports a change.
    ///
    /// A failed flush is logged and swallowed: the in-memory state keeps the
    /// change and the caller sees success.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> Change<R>) -> R {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        match f(&mut guard) {
            Change::Save(result) => {
                if let Err(e) = self.flush(&guard) {
                    error!(collection = self.name, error = %e, "failed to save collection");
                }
                result
            }
            Change::Keep(result) => result,
        }
    }

    fn load(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        let data = serde_json::from_str(&content)?;
        Ok(Some(data))
    }

    fn write_default(name: &'static str, path: &Path) -> T {
        let data = T::default();
        if let Err(e) = write_json(path, &data) {
            error!(collection = name, path = %path.display(), error = %e, "failed to write empty collection");
        }
        data
    }

    fn flush(&self, data: &T) -> Result<()> {
        match &self.path {
            Some(path) => write_json(path, data),
            None => Ok(()),
        }
    }
}

fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(data)?;
    fs::write(path, content)?;
    Ok(())
}

/// All persisted collections of the bot, stored under `<data_dir>/data/`.
pub struct Store {
    pub idols: Arc<Collection<IdolMap>>,
    pub users: Arc<Collection<UserMap>>,
    pub admins: Arc<Collection<AdminList>>,
    pub groups: Arc<Collection<GroupMap>>,
}

impl Store {
    pub fn open(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("data");
        fs::create_dir_all(&dir)?;

        Ok(Store {
            idols: Arc::new(Collection::open("idols", dir.join("idols.json"))),
            users: Arc::new(Collection::open("users", dir.join("users.json"))),
            admins: Arc::new(Collection::open("admins", dir.join("admins.json"))),
            groups: Arc::new(Collection::open("groups", dir.join("groups.json"))),
        })
    }

    pub fn in_memory() -> Self {
        Store {
            idols: Arc::new(Collection::in_memory("idols")),
            users: Arc::new(Collection::in_memory("users")),
            admins: Arc::new(Collection::in_memory("admins")),
            groups: Arc::new(Collection::in_memory("groups")),
        }
    }
}
