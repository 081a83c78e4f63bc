use crate::models::{ChannelId, RoleId, UserId};
use regex::Regex;

lazy_static! {
    static ref USER_MENTION_REGEX: Regex = Regex::new(r"<@!?([0-9]+)>").unwrap();
    static ref ROLE_MENTION_REGEX: Regex = Regex::new(r"<@&([0-9]+)>").unwrap();
    static ref CHANNEL_MENTION_REGEX: Regex = Regex::new(r"<#([0-9]+)>").unwrap();
    static ref MENTION_ESCAPE_REGEX: Regex =
        Regex::new(r"@(everyone|here|[!&]?[0-9]{17,20})").unwrap();
}

pub fn user_mention_ids(text: &str) -> Vec<UserId> {
    USER_MENTION_REGEX
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .map(UserId)
        .collect()
}

pub fn role_mention_ids(text: &str) -> Vec<RoleId> {
    ROLE_MENTION_REGEX
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .map(RoleId)
        .collect()
}

pub fn channel_mention_ids(text: &str) -> Vec<ChannelId> {
    CHANNEL_MENTION_REGEX
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .map(ChannelId)
        .collect()
}

/// Neutralizes anything in the text that could still ping: `@everyone`,
/// `@here` and raw mention ids get a zero-width space after the `@`.
pub fn escape_mentions(text: &str) -> String {
    MENTION_ESCAPE_REGEX
        .replace_all(text, "@\u{200b}$1")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_mentions() {
        let text = "hello <@123> and <@!456>, not <@&789>";
        assert_eq!(user_mention_ids(text), vec![UserId(123), UserId(456)]);
    }

    #[test]
    fn test_role_mentions() {
        assert_eq!(role_mention_ids("ping <@&789>"), vec![RoleId(789)]);
        assert!(role_mention_ids("ping <@789>").is_empty());
    }

    #[test]
    fn test_channel_mentions() {
        let text = "see <#42> and <#42> again";
        assert_eq!(
            channel_mention_ids(text),
            vec![ChannelId(42), ChannelId(42)]
        );
    }

    #[test]
    fn test_escape_mentions() {
        assert_eq!(
            escape_mentions("hey @everyone and @here"),
            "hey @\u{200b}everyone and @\u{200b}here"
        );
        // Ordinary names keep their @ intact.
        assert_eq!(escape_mentions("thanks @alice"), "thanks @alice");
    }
}
