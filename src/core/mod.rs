pub mod admin;
pub mod assets;
pub mod checkin;
pub mod error;
pub mod idol;
pub mod matcher;
pub mod store;

pub use admin::AdminSet;
pub use assets::{AssetLocator, FsAssetLocator, LocatorSettings};
pub use checkin::{CheckinOutcome, CheckinScheduler, CheckinState, DayAssignments, UserRecord};
pub use error::{BotError, Result};
pub use idol::{IdolRecord, IdolRegistry};
pub use matcher::{CatchphraseMatcher, Reply, RuleKind};
pub use store::Store;
