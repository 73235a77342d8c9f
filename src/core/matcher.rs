use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tracing::debug;

use super::checkin::DayAssignments;
use super::idol::{resolve_in, IdolRegistry};
use super::store::IdolMap;

/// Phrases meaning "I miss my own idol", matched on the normalized text.
const MISS_OWN_PHRASES: [&str; 2] = ["好想宝宝", "想宝宝"];
/// Prefixes of "I miss <someone>", longest first.
const MISS_PREFIXES: [&str; 2] = ["好想", "想"];
const BABY: &str = "宝宝";
const SEPARATORS: [char; 3] = [',', '，', '、'];

const CHECKIN_FIRST: &str = "你还没有签到呢~先使用 /qd 签到领取今天的宝宝吧！";
const NOT_YOURS: &str = "这不是你的宝宝哦，这是别人的宝宝。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    MissOwnIdol,
    ClaimedByOther,
    Catchphrase,
    MissBack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub rule: RuleKind,
    pub text: String,
    /// Idol whose picture should accompany the text.
    pub image_idol: Option<String>,
    /// Filled in by the dispatcher after the rule fired.
    pub image: Option<PathBuf>,
}

impl Reply {
    fn new(rule: RuleKind, text: impl Into<String>, image_idol: Option<&str>) -> Self {
        Reply {
            rule,
            text: text.into(),
            image_idol: image_idol.map(str::to_string),
            image: None,
        }
    }
}

/// Everything a rule may look at. Rules never touch the disk.
pub struct MatchInput<'a> {
    /// The message with surrounding whitespace removed.
    pub text: &'a str,
    pub sender: &'a str,
    /// The sender's idol for today, if checked in.
    pub assignment: Option<&'a str>,
    /// Every user's idol for today, the sender included.
    pub today: &'a DayAssignments,
    pub idols: &'a IdolMap,
}

impl MatchInput<'_> {
    fn claimed_by_other(&self, idol: &str) -> bool {
        self.today
            .iter()
            .any(|(user, assigned)| user != self.sender && assigned == idol)
    }

    fn claimed_by_anyone(&self, idol: &str) -> bool {
        self.today.values().any(|assigned| assigned == idol)
    }
}

pub type Rule = fn(&MatchInput<'_>) -> Option<Reply>;

/// Evaluated in order; the first rule that answers wins.
pub const RULES: [Rule; 4] = [miss_own_idol, claimed_by_other, literal_catchphrase, miss_back];

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !SEPARATORS.contains(c))
        .collect()
}

/// The `<someone>` of "好想<someone>", unless the message mentions 宝宝.
pub fn miss_target(text: &str) -> Option<&str> {
    if text.contains(BABY) {
        return None;
    }
    let rest = MISS_PREFIXES.iter().find_map(|prefix| text.strip_prefix(*prefix))?;
    let target = rest.trim();
    (!target.is_empty()).then_some(target)
}

fn pick(templates: Vec<String>) -> String {
    templates
        .choose(&mut rand::rng())
        .cloned()
        .unwrap_or_default()
}

fn miss_own_templates(idol: &str) -> Vec<String> {
    vec![
        format!("{idol}正在数着星星，每一颗都是对你的思念~！"),
        format!("{idol}在月光下许愿，希望你能感受到她的想念~"),
        format!("{idol}对着夜空轻声说：好想你呀，每一秒都在想你~"),
        format!("{idol}在梦里遇见了你，醒来后更加思念~"),
        format!("{idol}把对你的思念写成了诗，每一句都是爱意~"),
    ]
}

fn miss_back_templates(idol: &str) -> Vec<String> {
    vec![
        format!("{idol}也很想你~"),
        format!("{idol}感受到了你的思念，也在想你哦~"),
        format!("{idol}听到你的呼唤，心里暖暖的~"),
        format!("{idol}也想和你见面呢~"),
    ]
}

/// Rule 1: "好想宝宝" and friends, about the sender's own idol.
pub fn miss_own_idol(input: &MatchInput<'_>) -> Option<Reply> {
    let normalized = normalize(input.text);
    if !MISS_OWN_PHRASES.iter().any(|phrase| normalized.contains(*phrase)) {
        return None;
    }
    Some(match input.assignment {
        Some(idol) => Reply::new(RuleKind::MissOwnIdol, pick(miss_own_templates(idol)), Some(idol)),
        None => Reply::new(RuleKind::MissOwnIdol, CHECKIN_FIRST, None),
    })
}

/// Rule 2: "好想<X>" where X is somebody else's idol today.
pub fn claimed_by_other(input: &MatchInput<'_>) -> Option<Reply> {
    let target = miss_target(input.text)?;
    let idol = resolve_in(input.idols, target)?;
    if !input.claimed_by_other(&idol) {
        return None;
    }
    Some(match input.assignment {
        Some(own) => Reply::new(
            RuleKind::ClaimedByOther,
            format!("{NOT_YOURS}请多多关心{own}吧！"),
            Some(own),
        ),
        None => Reply::new(
            RuleKind::ClaimedByOther,
            format!("{NOT_YOURS}先使用 /qd 签到领取今天的宝宝吧！"),
            None,
        ),
    })
}

/// Rule 3: the first trigger contained in the message, idols in registry order.
pub fn literal_catchphrase(input: &MatchInput<'_>) -> Option<Reply> {
    input.idols.iter().find_map(|(idol, record)| {
        record
            .triggers
            .iter()
            .find(|(trigger, _)| !trigger.is_empty() && input.text.contains(trigger.as_str()))
            .map(|(_, response)| Reply::new(RuleKind::Catchphrase, response.clone(), Some(idol.as_str())))
    })
}

/// Rule 4: "好想<X>" for a known idol nobody holds today.
pub fn miss_back(input: &MatchInput<'_>) -> Option<Reply> {
    let target = miss_target(input.text)?;
    let idol = resolve_in(input.idols, target)?;
    if input.claimed_by_anyone(&idol) {
        return None;
    }
    Some(Reply::new(RuleKind::MissBack, pick(miss_back_templates(&idol)), Some(idol.as_str())))
}

pub fn dispatch(input: &MatchInput<'_>) -> Option<Reply> {
    RULES.iter().find_map(|rule| rule(input))
}

pub struct CatchphraseMatcher {
    registry: Arc<IdolRegistry>,
}

impl CatchphraseMatcher {
    pub fn new(registry: Arc<IdolRegistry>) -> Self {
        CatchphraseMatcher { registry }
    }

    /// Match one inbound message. At most one reply; its image is looked up
    /// only after a rule has fired.
    pub fn match_message(
        &self,
        text: &str,
        sender: &str,
        assignment: Option<&str>,
        today: &DayAssignments,
    ) -> Option<Reply> {
        let idols = self.registry.snapshot();
        let input = MatchInput {
            text: text.trim(),
            sender,
            assignment,
            today,
            idols: &idols,
        };

        let mut reply = dispatch(&input)?;
        debug!(rule = ?reply.rule, sender, "message matched");

        if let Some(idol) = &reply.image_idol {
            let nicknames = idols
                .get(idol)
                .map(|record| record.nicknames.clone())
                .unwrap_or_default();
            reply.image = self.registry.assets().locate(idol, &nicknames);
        }
        Some(reply)
    }
}
