use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::checkin::{self, CheckinOutcome};
use crate::core::error::{BotError, Result};
use crate::core::{
    AdminSet, AssetLocator, CatchphraseMatcher, CheckinScheduler, FsAssetLocator, IdolRegistry,
    Reply, Store,
};

const CATCHPHRASE_USAGE: &str = "格式错误，请使用：/add catchphrase -i <姓名> -t <触发句> -r <响应句>";
const NO_PERMISSION: &str = "你没有权限执行此操作。";

/// Text plus an optional picture, ready for the chat transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotReply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
}

impl BotReply {
    pub fn text(text: impl Into<String>) -> Self {
        BotReply {
            text: text.into(),
            image: None,
        }
    }
}

/// The bot as the chat adapter sees it: every command answered with a reply.
pub struct SixSixBot {
    config: Config,
    store: Store,
    registry: Arc<IdolRegistry>,
    scheduler: CheckinScheduler,
    matcher: CatchphraseMatcher,
    admins: AdminSet,
}

impl SixSixBot {
    pub fn new(config: Config) -> Result<Self> {
        let store = Store::open(&config.data_dir)?;
        if config.assets.roots.is_empty() {
            if let Err(e) = std::fs::create_dir_all(config.image_dir()) {
                warn!(error = %e, "failed to create image directory");
            }
        }
        let locator = Arc::new(FsAssetLocator::os(config.locator_settings()));
        Ok(Self::with_parts(config, store, locator))
    }

    pub fn with_parts(config: Config, store: Store, locator: Arc<dyn AssetLocator>) -> Self {
        let registry = Arc::new(IdolRegistry::new(store.idols.clone(), locator));
        let scheduler = CheckinScheduler::new(store.users.clone(), registry.clone());
        let matcher = CatchphraseMatcher::new(registry.clone());
        let admins = AdminSet::new(store.admins.clone());

        SixSixBot {
            config,
            store,
            registry,
            scheduler,
            matcher,
            admins,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn registry(&self) -> &IdolRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &CheckinScheduler {
        &self.scheduler
    }

    pub fn admins(&self) -> &AdminSet {
        &self.admins
    }

    fn with_image(&self, text: impl Into<String>, idol: Option<&str>) -> BotReply {
        let image = idol.and_then(|idol| self.registry.locate_image(idol));
        self.finish(text.into(), idol.is_some(), image)
    }

    fn finish(&self, mut text: String, wants_image: bool, image: Option<PathBuf>) -> BotReply {
        if wants_image && image.is_none() {
            text.push('\n');
            text.push_str(&self.config.default_messages.no_image);
        }
        BotReply { text, image }
    }

    fn from_match(&self, reply: Reply) -> BotReply {
        self.finish(reply.text, reply.image_idol.is_some(), reply.image)
    }

    /// Chat callers need to be admins. A missing caller is the local operator,
    /// who also seeds the first admin.
    fn permitted(&self, caller: Option<&str>) -> bool {
        match caller {
            None => true,
            Some(user) => self.admins.contains(user),
        }
    }

    pub fn checkin(&self, user: &str) -> BotReply {
        self.checkin_on(user, &checkin::today())
    }

    pub fn checkin_on(&self, user: &str, today: &str) -> BotReply {
        match self.scheduler.checkin(user, today) {
            Ok(CheckinOutcome::Repeat(idol)) => {
                let text = format!(
                    "{}\n你的宝宝是：{idol}",
                    self.config.default_messages.already_checkin
                );
                self.with_image(text, Some(&idol))
            }
            Ok(CheckinOutcome::RepeatUnknown) => {
                BotReply::text(self.config.default_messages.already_checkin.clone())
            }
            Ok(CheckinOutcome::Fresh(idol)) => {
                self.with_image(format!("签到成功！\n今天你的宝宝是：{idol}"), Some(&idol))
            }
            Err(BotError::EmptyRegistry) => {
                BotReply::text(self.config.default_messages.no_idol.clone())
            }
            Err(e) => BotReply::text(e.to_string()),
        }
    }

    pub fn profile(&self, target: &str) -> BotReply {
        let target = target.trim();
        if target.is_empty() {
            return BotReply::text("请输入要查询的姓名或昵称。");
        }
        let Some(name) = self.registry.resolve(target) else {
            return BotReply::text(format!("未找到关于 '{target}' 的信息。"));
        };
        let record = self.registry.get(&name).unwrap_or_default();
        let nicknames = if record.nicknames.is_empty() {
            "无".to_string()
        } else {
            record.nicknames.join(", ")
        };

        BotReply::text(format!(
            "🌟 {name} 档案 🌟\n\
             -------------------------\n\
             昵称：{nicknames}\n\
             简介：{}\n\
             -------------------------",
            record.bio
        ))
    }

    /// Registers `name` when needed, then adds the nickname.
    pub fn add_nickname(&self, name: &str, nickname: &str) -> BotReply {
        let (name, nickname) = (name.trim(), nickname.trim());
        if name.is_empty() || nickname.is_empty() {
            return BotReply::text("姓名和昵称不能为空。");
        }

        self.registry.register(name);
        match self.registry.add_nickname(name, nickname) {
            Ok(true) => BotReply::text(format!("已为 {name} 添加昵称：{nickname}")),
            Ok(false) => BotReply::text(format!("{nickname} 已经是 {name} 的昵称了。")),
            Err(e) => BotReply::text(e.to_string()),
        }
    }

    pub fn add_catchphrase(&self, idol: &str, trigger: &str, response: &str) -> BotReply {
        let (idol, trigger, response) = (idol.trim(), trigger.trim(), response.trim());
        if idol.is_empty() || trigger.is_empty() || response.is_empty() {
            return BotReply::text(CATCHPHRASE_USAGE);
        }

        match self.registry.add_catchphrase(idol, trigger, response) {
            Ok(real) => BotReply::text(format!(
                "添加成功！\n触发：{trigger}\n回复：{response}\n关联偶像：{real}"
            )),
            Err(BotError::IdolNotFound(_)) => {
                BotReply::text(format!("找不到偶像 {idol}，请先使用 /add 注册。"))
            }
            Err(e) => BotReply::text(e.to_string()),
        }
    }

    /// `-i <idol> -t <trigger> -r <response>`; each value may span several words.
    pub fn add_catchphrase_command(&self, args: &[&str]) -> BotReply {
        let mut params: IndexMap<&str, Vec<&str>> =
            [("-i", Vec::new()), ("-t", Vec::new()), ("-r", Vec::new())].into_iter().collect();
        let mut current: Option<&str> = None;

        for word in args {
            if params.contains_key(*word) {
                current = Some(*word);
            } else if let Some(values) = current.and_then(|flag| params.get_mut(flag)) {
                values.push(*word);
            }
        }

        let value = |flag: &str| params.get(flag).map(|words| words.join(" ")).unwrap_or_default();
        self.add_catchphrase(&value("-i"), &value("-t"), &value("-r"))
    }

    pub fn list_nicknames(&self, target: &str) -> BotReply {
        let target = target.trim();
        if target.is_empty() {
            return BotReply::text("请输入要查询的姓名。");
        }
        match self.registry.resolve(target) {
            Some(name) => {
                let nicknames = self.registry.nicknames(&name).join(", ");
                BotReply::text(format!("{name} 的昵称：{nicknames}"))
            }
            None => BotReply::text("未找到该偶像。"),
        }
    }

    pub fn list_catchphrases(&self) -> BotReply {
        // a trigger shared by several idols is listed once, under the last one
        let mut triggers: IndexMap<String, String> = IndexMap::new();
        for entry in self.registry.catchphrases() {
            triggers.insert(entry.trigger, entry.idol);
        }
        if triggers.is_empty() {
            return BotReply::text("暂时没有应援口号。");
        }

        let mut msg = String::from("📜 应援口号列表：\n");
        for (trigger, idol) in &triggers {
            msg.push_str(&format!("• '{trigger}' -> {idol}\n"));
        }
        BotReply::text(msg)
    }

    pub fn auth(&self, caller: Option<&str>, target: &str) -> BotReply {
        if !self.permitted(caller) {
            return BotReply::text(NO_PERMISSION);
        }
        let target = target.trim();
        if target.is_empty() {
            return BotReply::text("QQ ID 不能为空。");
        }
        if self.admins.add(target) {
            BotReply::text(format!("已授权用户：{target}"))
        } else {
            BotReply::text(format!("用户 {target} 已经是管理员了。"))
        }
    }

    pub fn rauth(&self, caller: Option<&str>, target: &str) -> BotReply {
        if !self.permitted(caller) {
            return BotReply::text(NO_PERMISSION);
        }
        let target = target.trim();
        if target.is_empty() {
            return BotReply::text("QQ ID 不能为空。");
        }
        if self.admins.remove(target) {
            BotReply::text(format!("已移除授权用户：{target}"))
        } else {
            BotReply::text(format!("用户 {target} 不是管理员。"))
        }
    }

    pub fn reset_today(&self, caller: Option<&str>) -> BotReply {
        self.reset_on(caller, &checkin::today())
    }

    pub fn reset_on(&self, caller: Option<&str>, today: &str) -> BotReply {
        if !self.permitted(caller) {
            return BotReply::text(NO_PERMISSION);
        }
        match self.scheduler.reset_today(today) {
            0 => BotReply::text("ℹ️ 今天还没有用户签到，无需重置。"),
            count => BotReply::text(format!(
                "✅ 已重置今天所有签到记录！\n共清除了 {count} 位用户的签到记录。"
            )),
        }
    }

    pub fn group(&self, caller: Option<&str>) -> BotReply {
        if !self.permitted(caller) {
            return BotReply::text(NO_PERMISSION);
        }
        BotReply::text("群组管理功能已识别。请根据具体需求实现子命令逻辑（add/update/info/list）。")
    }

    /// Passive matching of a plain group message. Commands are ignored here.
    pub fn on_message(&self, user: &str, text: &str) -> Option<BotReply> {
        self.on_message_on(user, text, &checkin::today())
    }

    pub fn on_message_on(&self, user: &str, text: &str, today: &str) -> Option<BotReply> {
        if !self.config.enable_catchphrase {
            return None;
        }
        let text = text.trim();
        if text.is_empty() || text.starts_with('/') {
            return None;
        }

        let assignments = self.scheduler.assignments_on(today);
        let own = assignments.get(user).map(String::as_str);
        let reply = self.matcher.match_message(text, user, own, &assignments)?;
        Some(self.from_match(reply))
    }

    /// Route one raw chat line: `/command ...` or a plain message.
    pub fn handle(&self, user: &str, text: &str) -> Option<BotReply> {
        let text = text.trim();
        let Some(command) = text.strip_prefix('/') else {
            return self.on_message(user, text);
        };

        let words: Vec<&str> = command.split_whitespace().collect();
        let arg = |i: usize| words.get(i).copied().unwrap_or("");
        let caller = Some(user);

        let reply = match arg(0) {
            "qd" => self.checkin(user),
            "xox" => self.profile(arg(1)),
            "add" if arg(1).eq_ignore_ascii_case("catchphrase") => {
                self.add_catchphrase_command(&words[2..])
            }
            "add" if words.len() < 3 => BotReply::text("格式：/add <姓名> <昵称>"),
            "add" => self.add_nickname(arg(1), arg(2)),
            "list" if arg(1).eq_ignore_ascii_case("catchphrase") => self.list_catchphrases(),
            "list" if words.len() < 2 => {
                BotReply::text("格式：/list <姓名> (列出昵称) 或 /list catchphrase (列出口号)")
            }
            "list" => self.list_nicknames(arg(1)),
            "auth" => self.auth(caller, arg(1)),
            "rauth" => self.rauth(caller, arg(1)),
            "reset_today" => self.reset_today(caller),
            "group" => self.group(caller),
            other => {
                info!(command = other, "ignoring unknown command");
                return None;
            }
        };
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::assets::{LocatorSettings, MemoryTree};

    const DAY: &str = "2024-05-01";

    fn bot() -> SixSixBot {
        let config = Config::default_config(PathBuf::from("/bot"));
        let locator = FsAssetLocator::new(
            MemoryTree::new()
                .with_dir("/img")
                .with_file("/img/莉/1.png"),
            LocatorSettings {
                roots: vec![PathBuf::from("/img")],
                ..LocatorSettings::default()
            },
        );
        SixSixBot::with_parts(config, Store::in_memory(), Arc::new(locator))
    }

    #[test]
    fn test_checkin_messages() {
        let bot = bot();
        let reply = bot.checkin_on("u1", DAY);
        assert_eq!(reply.text, bot.config().default_messages.no_idol);

        bot.add_nickname("莉", "莉莉");
        let first = bot.checkin_on("u1", DAY);
        assert!(first.text.starts_with("签到成功！"));
        assert_eq!(first.image, Some(PathBuf::from("/img/莉/1.png")));

        let again = bot.checkin_on("u1", DAY);
        assert!(again.text.contains("你的宝宝是：莉"));
        assert!(again.text.starts_with(&bot.config().default_messages.already_checkin));
    }

    #[test]
    fn test_missing_image_appends_notice() {
        let bot = bot();
        bot.registry().register("雨");

        let reply = bot.checkin_on("u1", DAY);
        assert!(reply.image.is_none());
        assert!(reply.text.ends_with(&bot.config().default_messages.no_image));
    }

    #[test]
    fn test_profile_card() {
        let bot = bot();
        bot.add_nickname("莉", "莉莉");
        bot.add_nickname("莉", "小莉");

        let card = bot.profile("小莉").text;
        assert!(card.contains("🌟 莉 档案 🌟"));
        assert!(card.contains("昵称：莉莉, 小莉"));
        assert!(card.contains(crate::core::idol::DEFAULT_BIO));

        assert_eq!(bot.profile("谁").text, "未找到关于 '谁' 的信息。");
    }

    #[test]
    fn test_add_nickname_replies() {
        let bot = bot();
        assert_eq!(bot.add_nickname("莉", "莉莉").text, "已为 莉 添加昵称：莉莉");
        assert_eq!(bot.add_nickname("莉", "莉莉").text, "莉莉 已经是 莉 的昵称了。");
        assert_eq!(bot.add_nickname(" ", "莉莉").text, "姓名和昵称不能为空。");
    }

    #[test]
    fn test_catchphrase_command_parsing() {
        let bot = bot();
        let args = ["-i", "莉莉", "-t", "莉莉", "冲鸭", "-r", "一起", "冲！"];

        let reply = bot.add_catchphrase_command(&args);
        assert_eq!(reply.text, "找不到偶像 莉莉，请先使用 /add 注册。");

        bot.add_nickname("莉", "莉莉");
        let reply = bot.add_catchphrase_command(&args);
        assert_eq!(reply.text, "添加成功！\n触发：莉莉 冲鸭\n回复：一起 冲！\n关联偶像：莉");

        assert_eq!(bot.add_catchphrase_command(&["-i", "莉"]).text, CATCHPHRASE_USAGE);
        assert!(bot.list_catchphrases().text.contains("• '莉莉 冲鸭' -> 莉"));
    }

    #[test]
    fn test_admin_commands() {
        let bot = bot();
        // chat users cannot grant themselves the first admin seat
        assert_eq!(bot.auth(Some("1"), "1").text, NO_PERMISSION);
        assert!(bot.handle("1", "/auth 1").is_some_and(|r| r.text == NO_PERMISSION));
        assert!(bot.admins().is_empty());

        assert_eq!(bot.auth(None, "1").text, "已授权用户：1");
        assert_eq!(bot.auth(Some("2"), "3").text, NO_PERMISSION);
        assert_eq!(bot.auth(Some("1"), "1").text, "用户 1 已经是管理员了。");
        assert_eq!(bot.rauth(None, "9").text, "用户 9 不是管理员。");
        assert_eq!(bot.reset_on(Some("2"), DAY).text, NO_PERMISSION);
        assert!(bot.reset_on(Some("1"), DAY).text.starts_with("ℹ️"));
    }

    #[test]
    fn test_same_day_record_without_idol_replies_already_checked_in() {
        let bot = bot();
        bot.registry().register("莉");
        bot.store().users.update(|users| {
            let record = serde_json::from_value(serde_json::json!({ "last_checkin": DAY })).unwrap();
            users.insert("u".to_string(), record);
            crate::core::store::Change::Save(())
        });

        let reply = bot.checkin_on("u", DAY);
        assert_eq!(reply.text, bot.config().default_messages.already_checkin);
        assert!(reply.image.is_none());
    }

    #[test]
    fn test_reset_reports_count() {
        let bot = bot();
        bot.registry().register("莉");
        bot.checkin_on("a", DAY);
        bot.checkin_on("b", DAY);

        let reply = bot.reset_on(None, DAY);
        assert!(reply.text.contains("共清除了 2 位用户"));
        assert!(bot.scheduler().assignments_on(DAY).is_empty());
    }

    #[test]
    fn test_on_message_uses_assignments() {
        let bot = bot();
        bot.add_nickname("莉", "莉莉");
        bot.checkin_on("me", DAY);

        let reply = bot.on_message_on("me", "好想宝宝", DAY).unwrap();
        assert!(reply.text.contains("莉"));
        assert_eq!(reply.image, Some(PathBuf::from("/img/莉/1.png")));

        assert!(bot.on_message_on("me", "/qd", DAY).is_none());
        assert!(bot.on_message_on("me", "随便说说", DAY).is_none());
    }

    #[test]
    fn test_on_message_respects_switch() {
        let mut config = Config::default_config(PathBuf::from("/bot"));
        config.enable_catchphrase = false;
        let locator = FsAssetLocator::new(MemoryTree::new(), LocatorSettings::default());
        let bot = SixSixBot::with_parts(config, Store::in_memory(), Arc::new(locator));

        assert!(bot.on_message_on("me", "好想宝宝", DAY).is_none());
    }

    #[test]
    fn test_handle_routes_commands() {
        let bot = bot();
        assert_eq!(
            bot.handle("u", "/add 莉 莉莉").unwrap().text,
            "已为 莉 添加昵称：莉莉"
        );
        assert_eq!(bot.handle("u", "/list 莉莉").unwrap().text, "莉 的昵称：莉莉");
        assert!(bot.handle("u", "/xox 莉").unwrap().text.contains("档案"));
        assert!(bot
            .handle("u", "/add catchphrase -i 莉 -t 冲 -r 冲冲冲")
            .unwrap()
            .text
            .starts_with("添加成功"));
        assert!(bot.handle("u", "/unknown").is_none());
        assert!(bot.handle("u", "/qd").unwrap().text.contains("莉"));
    }
}
