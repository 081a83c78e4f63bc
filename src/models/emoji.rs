use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Wire type code marking a custom (id-bearing) emoji. Any other code
/// is treated as a unicode emoji. Copied from the platform's wire
/// contract.
pub const CUSTOM_EMOJI_TYPE: u32 = 1;

/// Digit-count bounds the string form accepts for a custom emoji id.
/// Copied from the platform's wire contract.
pub const CUSTOM_EMOJI_ID_DIGITS: (usize, usize) = (13, 20);

lazy_static! {
    static ref CUSTOM_EMOJI_REGEX: Regex = Regex::new(&format!(
        r"<?(?P<animated>a)?:?(?P<name>[A-Za-z0-9_]+):(?P<id>[0-9]{{{},{}}})>?",
        CUSTOM_EMOJI_ID_DIGITS.0, CUSTOM_EMOJI_ID_DIGITS.1
    ))
    .unwrap();
}

#[derive(Clone, Debug, Deserialize)]
pub struct EmojiPayload {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<u32>,
}

/// A "partial" emoji: either a platform-custom emoji identified by id
/// or a unicode emoji identified by name. The two are never
/// cross-comparable.
#[derive(Clone, Debug)]
pub enum PartialEmoji {
    Custom {
        id: u64,
        name: String,
        animated: bool,
    },
    Unicode {
        name: String,
    },
}

impl PartialEmoji {
    pub fn from_payload(payload: &EmojiPayload) -> PartialEmoji {
        if payload.kind == Some(CUSTOM_EMOJI_TYPE) {
            if let Ok(id) = payload.id.parse() {
                return PartialEmoji::Custom {
                    id,
                    name: "emoji".to_owned(),
                    animated: false,
                };
            }
        }
        PartialEmoji::Unicode {
            name: payload.id.clone(),
        }
    }

    /// Parses the string forms `a:name:id`, `<a:name:id>`, `name:id`
    /// and `<:name:id>`. Anything that does not match is assumed to be
    /// a unicode emoji.
    pub fn from_str(value: &str) -> PartialEmoji {
        if let Some(caps) = CUSTOM_EMOJI_REGEX.captures(value) {
            if let Ok(id) = caps["id"].parse() {
                return PartialEmoji::Custom {
                    id,
                    name: caps["name"].to_owned(),
                    animated: caps.name("animated").is_some(),
                };
            }
        }
        PartialEmoji::Unicode {
            name: value.to_owned(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, PartialEmoji::Custom { .. })
    }

    pub fn is_unicode(&self) -> bool {
        !self.is_custom()
    }
}

impl fmt::Display for PartialEmoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartialEmoji::Custom {
                id,
                name,
                animated: true,
            } => write!(f, "<a:{}:{}>", name, id),
            PartialEmoji::Custom {
                id,
                name,
                animated: false,
            } => write!(f, "<{}:{}>", name, id),
            PartialEmoji::Unicode { name } => f.write_str(name),
        }
    }
}

impl PartialEq for PartialEmoji {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PartialEmoji::Custom { id: a, .. }, PartialEmoji::Custom { id: b, .. }) => a == b,
            (PartialEmoji::Unicode { name: a }, PartialEmoji::Unicode { name: b }) => a == b,
            _ => false,
        }
    }
}

impl Eq for PartialEmoji {}

impl Hash for PartialEmoji {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PartialEmoji::Custom { id, .. } => id.hash(state),
            PartialEmoji::Unicode { name } => name.hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_custom() {
        let emoji = PartialEmoji::from_str("<a:blob:1234567890123>");
        assert_eq!(
            emoji,
            PartialEmoji::Custom {
                id: 1234567890123,
                name: "blob".to_owned(),
                animated: true,
            }
        );
        assert!(emoji.is_custom());
    }

    #[test]
    fn test_from_str_rejects_short_ids() {
        // Twelve digits is below the accepted range.
        let emoji = PartialEmoji::from_str("blob:123456789012");
        assert!(emoji.is_unicode());
    }

    #[test]
    fn test_from_str_unicode_fallback() {
        let emoji = PartialEmoji::from_str("🦀");
        assert_eq!(
            emoji,
            PartialEmoji::Unicode {
                name: "🦀".to_owned()
            }
        );
    }

    #[test]
    fn test_equality_never_crosses_kinds() {
        let custom = PartialEmoji::Custom {
            id: 1,
            name: "x".to_owned(),
            animated: false,
        };
        let unicode = PartialEmoji::Unicode { name: "x".to_owned() };
        assert_ne!(custom, unicode);

        let custom_renamed = PartialEmoji::Custom {
            id: 1,
            name: "y".to_owned(),
            animated: true,
        };
        assert_eq!(custom, custom_renamed);
    }

    #[test]
    fn test_from_payload_type_code() {
        let custom = PartialEmoji::from_payload(&EmojiPayload {
            id: "1234567890123".to_owned(),
            kind: Some(CUSTOM_EMOJI_TYPE),
        });
        assert!(custom.is_custom());

        let unicode = PartialEmoji::from_payload(&EmojiPayload {
            id: "128077".to_owned(),
            kind: Some(2),
        });
        assert!(unicode.is_unicode());
    }
}
