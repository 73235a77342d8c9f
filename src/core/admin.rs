use std::sync::Arc;

use tracing::info;

use super::store::{AdminList, Change, Collection};

/// Users allowed to run administrative commands. Membership only.
pub struct AdminSet {
    admins: Arc<Collection<AdminList>>,
}

impl AdminSet {
    pub fn new(admins: Arc<Collection<AdminList>>) -> Self {
        AdminSet { admins }
    }

    /// Returns false when the user was already an admin.
    pub fn add(&self, user: &str) -> bool {
        let added = self.admins.update(|admins| {
            if admins.insert(user.to_string()) {
                Change::Save(true)
            } else {
                Change::Keep(false)
            }
        });
        if added {
            info!(user, "granted admin");
        }
        added
    }

    /// Returns false when the user was not an admin.
    pub fn remove(&self, user: &str) -> bool {
        let removed = self.admins.update(|admins| {
            if admins.shift_remove(user) {
                Change::Save(true)
            } else {
                Change::Keep(false)
            }
        });
        if removed {
            info!(user, "revoked admin");
        }
        removed
    }

    pub fn contains(&self, user: &str) -> bool {
        self.admins.read(|admins| admins.contains(user))
    }

    pub fn is_empty(&self) -> bool {
        self.admins.read(|admins| admins.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_remove_contains() {
        let admins = AdminSet::new(Arc::new(Collection::in_memory("admins")));

        assert!(admins.add("10001"));
        assert!(!admins.add("10001"));
        assert!(admins.contains("10001"));
        assert!(!admins.contains("10002"));

        assert!(admins.remove("10001"));
        assert!(!admins.remove("10001"));
        assert!(admins.is_empty());
    }

    #[test]
    fn test_admins_persist_as_ordered_list() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("admins.json");
        let admins = AdminSet::new(Arc::new(Collection::open("admins", path.clone())));

        admins.add("b");
        admins.add("a");
        admins.add("c");
        admins.remove("a");

        let written: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, vec!["b", "c"]);
    }
}
