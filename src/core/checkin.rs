use std::sync::Arc;

use chrono::Local;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::error::{BotError, Result};
use super::idol::IdolRegistry;
use super::store::{Change, Collection, UserMap};

/// Today's date on the host clock, as stored in check-in records.
pub fn today() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Stored check-in state of one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, alias = "last_checkin", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(default, alias = "today_idol", skip_serializing_if = "Option::is_none")]
    pub idol: Option<String>,

    /// Fields written by older versions are carried along untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UserRecord {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.idol.is_none() && self.extra.is_empty()
    }

    pub fn state(&self, today: &str) -> CheckinState {
        match (&self.date, &self.idol) {
            (Some(date), Some(idol)) if date == today => CheckinState::AssignedToday(idol.clone()),
            (Some(date), None) if date == today => CheckinState::CheckedInNoIdol,
            (Some(date), Some(idol)) => CheckinState::Stale {
                idol: idol.clone(),
                date: date.clone(),
            },
            _ => CheckinState::NoRecord,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinState {
    NoRecord,
    AssignedToday(String),
    /// Dated today but the idol was never recorded (older data). Still counts
    /// as checked in.
    CheckedInNoIdol,
    /// Assigned on another day; dates are compared by equality only.
    Stale { idol: String, date: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    /// A new idol was drawn and saved.
    Fresh(String),
    /// The user already checked in today; nothing changed.
    Repeat(String),
    /// Checked in today without a recorded idol; nothing changed.
    RepeatUnknown,
}

impl CheckinOutcome {
    pub fn idol(&self) -> Option<&str> {
        match self {
            CheckinOutcome::Fresh(idol) | CheckinOutcome::Repeat(idol) => Some(idol),
            CheckinOutcome::RepeatUnknown => None,
        }
    }

    pub fn is_repeat(&self) -> bool {
        !matches!(self, CheckinOutcome::Fresh(_))
    }
}

/// User id -> idol for everyone assigned on a given day.
pub type DayAssignments = IndexMap<String, String>;

pub struct CheckinScheduler {
    users: Arc<Collection<UserMap>>,
    registry: Arc<IdolRegistry>,
}

impl CheckinScheduler {
    pub fn new(users: Arc<Collection<UserMap>>, registry: Arc<IdolRegistry>) -> Self {
        CheckinScheduler { users, registry }
    }

    pub fn state(&self, user: &str, today: &str) -> CheckinState {
        self.users.read(|users| {
            users
                .get(user)
                .map(|record| record.state(today))
                .unwrap_or(CheckinState::NoRecord)
        })
    }

    pub fn assignment_today(&self, user: &str, today: &str) -> Option<String> {
        match self.state(user, today) {
            CheckinState::AssignedToday(idol) => Some(idol),
            _ => None,
        }
    }

    pub fn assignments_on(&self, today: &str) -> DayAssignments {
        self.users.read(|users| {
            users
                .iter()
                .filter_map(|(user, record)| match record.state(today) {
                    CheckinState::AssignedToday(idol) => Some((user.clone(), idol)),
                    _ => None,
                })
                .collect()
        })
    }

    /// Draw today's idol for `user`, or return the one already drawn today.
    pub fn checkin(&self, user: &str, today: &str) -> Result<CheckinOutcome> {
        self.users.update(|users| {
            let state = users
                .get(user)
                .map(|record| record.state(today))
                .unwrap_or(CheckinState::NoRecord);
            match state {
                CheckinState::AssignedToday(idol) => {
                    return Change::Keep(Ok(CheckinOutcome::Repeat(idol)));
                }
                CheckinState::CheckedInNoIdol => {
                    return Change::Keep(Ok(CheckinOutcome::RepeatUnknown));
                }
                CheckinState::NoRecord | CheckinState::Stale { .. } => {}
            }

            let Some(idol) = self.registry.random_idol() else {
                return Change::Keep(Err(BotError::EmptyRegistry));
            };

            let record = users.entry(user.to_string()).or_default();
            record.date = Some(today.to_string());
            record.idol = Some(idol.clone());
            info!(user, idol = %idol, date = today, "checked in");
            Change::Save(Ok(CheckinOutcome::Fresh(idol)))
        })
    }

    /// Clear every assignment dated `today`. Returns how many users were reset.
    pub fn reset_today(&self, today: &str) -> usize {
        self.users.update(|users| {
            let mut count = 0;
            users.retain(|_, record| {
                if record.date.as_deref() != Some(today) {
                    return true;
                }
                record.date = None;
                record.idol = None;
                count += 1;
                !record.is_empty()
            });

            if count == 0 {
                return Change::Keep(0);
            }
            info!(count, date = today, "reset today's check-ins");
            Change::Save(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assets::{FsAssetLocator, LocatorSettings, MemoryTree};
    use std::collections::HashSet;

    fn scheduler_with(idols: &[&str]) -> (CheckinScheduler, Arc<Collection<UserMap>>) {
        let locator = FsAssetLocator::new(MemoryTree::new(), LocatorSettings::default());
        let registry = Arc::new(IdolRegistry::new(
            Arc::new(Collection::in_memory("idols")),
            Arc::new(locator),
        ));
        for idol in idols {
            registry.register(idol);
        }
        let users = Arc::new(Collection::in_memory("users"));
        (CheckinScheduler::new(users.clone(), registry), users)
    }

    fn seed(users: &Collection<UserMap>, user: &str, date: &str, idol: &str) {
        users.update(|map| {
            map.insert(
                user.to_string(),
                UserRecord {
                    date: Some(date.to_string()),
                    idol: Some(idol.to_string()),
                    ..UserRecord::default()
                },
            );
            Change::Save(())
        });
    }

    #[test]
    fn test_checkin_same_day_is_idempotent() {
        let (scheduler, _) = scheduler_with(&["A", "B", "C"]);

        let first = scheduler.checkin("u1", "2024-05-01").unwrap();
        let second = scheduler.checkin("u1", "2024-05-01").unwrap();

        assert!(!first.is_repeat());
        assert!(second.is_repeat());
        assert_eq!(first.idol(), second.idol());
    }

    #[test]
    fn test_checkin_other_day_rerolls() {
        let (scheduler, users) = scheduler_with(&["A"]);
        seed(&users, "u1", "2024-05-01", "Ghost");

        assert_eq!(
            scheduler.state("u1", "2024-05-02"),
            CheckinState::Stale {
                idol: "Ghost".to_string(),
                date: "2024-05-01".to_string()
            }
        );

        let outcome = scheduler.checkin("u1", "2024-05-02").unwrap();
        assert_eq!(outcome, CheckinOutcome::Fresh("A".to_string()));

        // an earlier date also counts as stale
        let outcome = scheduler.checkin("u1", "2024-04-30").unwrap();
        assert!(!outcome.is_repeat());
    }

    #[test]
    fn test_checkin_empty_registry_mutates_nothing() {
        let (scheduler, users) = scheduler_with(&[]);

        let err = scheduler.checkin("u1", "2024-05-01").unwrap_err();
        assert!(matches!(err, BotError::EmptyRegistry));
        assert!(users.read(|u| u.is_empty()));
    }

    #[test]
    fn test_reset_today_clears_only_today_and_drops_empty() {
        let (scheduler, users) = scheduler_with(&["A"]);
        seed(&users, "today1", "2024-05-01", "A");
        seed(&users, "today2", "2024-05-01", "A");
        seed(&users, "yesterday", "2024-04-30", "A");
        users.update(|map| {
            let record = map.get_mut("today2").unwrap();
            record.extra.insert("nickname".to_string(), Value::from("x"));
            Change::Save(())
        });

        assert_eq!(scheduler.reset_today("2024-05-01"), 2);

        users.read(|map| {
            assert!(!map.contains_key("today1"));
            let kept = map.get("today2").unwrap();
            assert!(kept.date.is_none() && kept.idol.is_none());
            assert_eq!(map.get("yesterday").unwrap().date.as_deref(), Some("2024-04-30"));
        });

        assert_eq!(scheduler.reset_today("2024-05-01"), 0);
    }

    #[test]
    fn test_assignments_on_lists_only_today() {
        let (scheduler, users) = scheduler_with(&["A"]);
        seed(&users, "u1", "2024-05-01", "A");
        seed(&users, "u2", "2024-04-30", "A");

        let today = scheduler.assignments_on("2024-05-01");
        assert_eq!(today.len(), 1);
        assert_eq!(today.get("u1").map(String::as_str), Some("A"));
        assert_eq!(scheduler.assignment_today("u2", "2024-05-01"), None);
    }

    #[test]
    fn test_concurrent_checkins_do_not_lose_updates() {
        let (scheduler, users) = scheduler_with(&["A", "B"]);

        std::thread::scope(|s| {
            for t in 0..8 {
                let scheduler = &scheduler;
                s.spawn(move || {
                    for i in 0..25 {
                        scheduler.checkin(&format!("u{t}-{i}"), "2024-05-01").unwrap();
                    }
                });
            }
        });

        let ids: HashSet<String> = users.read(|u| u.keys().cloned().collect());
        assert_eq!(ids.len(), 200);
    }

    #[test]
    fn test_legacy_user_fields_are_read() {
        let json = r#"{"last_checkin": "2024-05-01", "today_idol": "A"}"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();

        assert_eq!(record.state("2024-05-01"), CheckinState::AssignedToday("A".to_string()));
        assert!(record.extra.is_empty());

        let written = serde_json::to_value(&record).unwrap();
        assert_eq!(written["date"], "2024-05-01");
        assert_eq!(written["idol"], "A");
    }

    #[test]
    fn test_same_day_record_without_idol_is_not_redrawn() {
        let (scheduler, users) = scheduler_with(&["A"]);
        users.update(|map| {
            let record: UserRecord = serde_json::from_str(r#"{"last_checkin": "2024-05-01"}"#).unwrap();
            map.insert("u".to_string(), record);
            Change::Save(())
        });

        assert_eq!(scheduler.state("u", "2024-05-01"), CheckinState::CheckedInNoIdol);
        let outcome = scheduler.checkin("u", "2024-05-01").unwrap();
        assert_eq!(outcome, CheckinOutcome::RepeatUnknown);
        assert!(outcome.is_repeat());
        assert!(users.read(|map| map["u"].idol.is_none()));
        assert!(scheduler.assignments_on("2024-05-01").is_empty());

        // the next day draws normally
        let outcome = scheduler.checkin("u", "2024-05-02").unwrap();
        assert_eq!(outcome, CheckinOutcome::Fresh("A".to_string()));
    }

    #[test]
    fn test_checkin_racing_reset_loses_nothing() {
        let (scheduler, users) = scheduler_with(&["A", "B"]);
        let day = "2024-05-01";

        let cleared: usize = std::thread::scope(|s| {
            for t in 0..4 {
                let scheduler = &scheduler;
                s.spawn(move || {
                    for i in 0..50 {
                        let outcome = scheduler.checkin(&format!("u{t}-{i}"), day).unwrap();
                        assert!(!outcome.is_repeat());
                    }
                });
            }
            let resetter = s.spawn(|| (0..50).map(|_| scheduler.reset_today(day)).sum::<usize>());
            resetter.join().unwrap()
        });

        // every draw was either cleared by exactly one reset or is still stored
        let remaining = users.read(|u| u.values().filter(|r| r.date.as_deref() == Some(day)).count());
        assert_eq!(cleared + remaining, 200);
    }

    #[test]
    fn test_today_is_iso_date() {
        let date = today();
        assert!(chrono::NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_ok());
    }
}
