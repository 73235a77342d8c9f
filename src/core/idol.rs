use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::assets::AssetLocator;
use super::error::{BotError, Result};
use super::store::{Change, Collection, IdolMap};

pub const DEFAULT_BIO: &str = "这个人很神秘，目前还没有公开资料，等待管理员补充。";

fn default_bio() -> String {
    DEFAULT_BIO.to_string()
}

/// A registered idol. The canonical name is the key in the registry map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdolRecord {
    /// Insertion ordered, no duplicates within one idol.
    #[serde(default)]
    pub nicknames: Vec<String>,

    #[serde(default = "default_bio", alias = "info")]
    pub bio: String,

    /// Trigger text -> response text, in insertion order.
    #[serde(default, alias = "catchphrases")]
    pub triggers: IndexMap<String, String>,
}

impl Default for IdolRecord {
    fn default() -> Self {
        IdolRecord {
            nicknames: Vec::new(),
            bio: default_bio(),
            triggers: IndexMap::new(),
        }
    }
}

impl IdolRecord {
    pub fn has_nickname(&self, nickname: &str) -> bool {
        self.nicknames.iter().any(|n| n == nickname)
    }
}

/// A catchphrase together with the idol that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchphraseEntry {
    pub idol: String,
    pub trigger: String,
}

/// Exact name, then first idol carrying the nickname, in registry order.
fn lookup(idols: &IdolMap, identifier: &str) -> Option<String> {
    if idols.contains_key(identifier) {
        return Some(identifier.to_string());
    }
    idols
        .iter()
        .find(|(_, record)| record.has_nickname(identifier))
        .map(|(name, _)| name.clone())
}

/// Name resolution over a registry snapshot.
///
/// Falls back once to the text after the last hyphen, so "team-Name" finds
/// "Name". The first idol in registry order wins a shared nickname.
pub fn resolve_in(idols: &IdolMap, identifier: &str) -> Option<String> {
    if let Some(name) = lookup(idols, identifier) {
        return Some(name);
    }
    let (_, rest) = identifier.rsplit_once('-')?;
    lookup(idols, rest)
}

pub struct IdolRegistry {
    idols: Arc<Collection<IdolMap>>,
    assets: Arc<dyn AssetLocator>,
}

impl IdolRegistry {
    pub fn new(idols: Arc<Collection<IdolMap>>, assets: Arc<dyn AssetLocator>) -> Self {
        IdolRegistry { idols, assets }
    }

    /// Register an idol. Blank names and existing idols are no-ops.
    /// Returns whether a record was created.
    pub fn register(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }

        let created = self.idols.update(|idols| {
            if idols.contains_key(name) {
                return Change::Keep(false);
            }
            idols.insert(name.to_string(), IdolRecord::default());
            Change::Save(true)
        });

        if created {
            info!(idol = name, "registered idol");
            self.assets.provision(name);
        }
        created
    }

    pub fn resolve(&self, identifier: &str) -> Option<String> {
        self.idols.read(|idols| resolve_in(idols, identifier))
    }

    /// Returns whether the nickname was new for this idol.
    pub fn add_nickname(&self, name: &str, nickname: &str) -> Result<bool> {
        let nickname = nickname.trim();
        self.idols.update(|idols| {
            let Some(real) = resolve_in(idols, name) else {
                return Change::Keep(Err(BotError::IdolNotFound(name.to_string())));
            };
            let record = idols.entry(real).or_default();
            if nickname.is_empty() || record.has_nickname(nickname) {
                return Change::Keep(Ok(false));
            }
            record.nicknames.push(nickname.to_string());
            Change::Save(Ok(true))
        })
    }

    /// Set a trigger on the resolved idol, overwriting any previous response.
    /// Returns the canonical name the catchphrase was stored under.
    pub fn add_catchphrase(&self, name: &str, trigger: &str, response: &str) -> Result<String> {
        self.idols.update(|idols| {
            let Some(real) = resolve_in(idols, name) else {
                return Change::Keep(Err(BotError::IdolNotFound(name.to_string())));
            };
            idols
                .entry(real.clone())
                .or_default()
                .triggers
                .insert(trigger.to_string(), response.to_string());
            Change::Save(Ok(real))
        })
    }

    pub fn random_idol(&self) -> Option<String> {
        self.idols
            .read(|idols| idols.keys().choose(&mut rand::rng()).cloned())
    }

    pub fn get(&self, name: &str) -> Option<IdolRecord> {
        self.idols.read(|idols| idols.get(name).cloned())
    }

    pub fn nicknames(&self, name: &str) -> Vec<String> {
        self.idols
            .read(|idols| idols.get(name).map(|r| r.nicknames.clone()))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> IdolMap {
        self.idols.snapshot()
    }

    pub fn len(&self) -> usize {
        self.idols.read(|idols| idols.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every catchphrase, idols in registry order and triggers in insertion order.
    pub fn catchphrases(&self) -> Vec<CatchphraseEntry> {
        self.idols.read(|idols| {
            idols
                .iter()
                .flat_map(|(idol, record)| {
                    record.triggers.keys().map(move |trigger| CatchphraseEntry {
                        idol: idol.clone(),
                        trigger: trigger.clone(),
                    })
                })
                .collect()
        })
    }

    pub fn locate_image(&self, name: &str) -> Option<PathBuf> {
        let nicknames = self.nicknames(name);
        self.assets.locate(name, &nicknames)
    }

    pub fn assets(&self) -> &Arc<dyn AssetLocator> {
        &self.assets
    }
}
