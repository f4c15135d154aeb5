//! Built-in tool signatures.
//!
//! These are the only functions whose signatures may be written into a prompt
//! verbatim, and the only ones a pythonic tool call can resolve to.

use serde_json::{Map, Value};

/// Argument type of a built-in parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Non-negative integer.
    Index,
    /// `YYYY-MM-DD` calendar date, carried as a string.
    Date,
}

#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub ty: ParamType,
}

/// A whitelisted function: name, ordered parameters, and the Python stub used
/// to describe it to pythonic-call models.
#[derive(Debug)]
pub struct Signature {
    pub name: &'static str,
    pub params: &'static [Param],
    pub python_stub: &'static str,
}

const GET_RECENT_CHANNEL_MESSAGES: Signature = Signature {
    name: "getRecentChannelMessages",
    params: &[
        Param { name: "channelIndex", ty: ParamType::Index },
        Param { name: "limit", ty: ParamType::Index },
    ],
    python_stub: r#"
def getRecentChannelMessages(channelIndex: int, limit: int) -> List:
    """Get recent messages from a channel, starting from the most recent.

    Args:
      channelIndex: The list index of the channel to get messages from.
      limit: The maximum number of messages to return.

    Returns:
      A list of dicts, each with the following keys:
      - userName: The name of the user who sent the message.
      - isoDate: The ISO 8601 date and time of the message.
      - message: The content of the message.
    """
"#,
};

const GET_CHANNEL_MESSAGES_RANGE: Signature = Signature {
    name: "getChannelMessagesRange",
    params: &[
        Param { name: "channelIndex", ty: ParamType::Index },
        Param { name: "startDate", ty: ParamType::Date },
        Param { name: "endDate", ty: ParamType::Date },
    ],
    python_stub: r#"
def getChannelMessagesRange(channelIndex: int, startDate: str, endDate: str) -> List:
    """Get messages from a channel, within a specific time range.

    Args:
      channelIndex: The list index of the channel to get messages from.
      startDate: The start date of the time range to get messages from. Must be in the format YYYY-MM-DD.
      endDate: The end date of the time range to get messages from. Must be in the format YYYY-MM-DD.

    Returns:
      A list of dicts, each with the following keys:
      - userName: The name of the user who sent the message.
      - isoDate: The ISO 8601 date and time of the message.
      - message: The content of the message.
    """
"#,
};

/// All whitelisted signatures.
pub const CATALOG: &[&Signature] = &[&GET_RECENT_CHANNEL_MESSAGES, &GET_CHANNEL_MESSAGES_RANGE];

pub fn lookup(name: &str) -> Option<&'static Signature> {
    CATALOG.iter().copied().find(|sig| sig.name == name)
}

/// `YYYY-MM-DD` with a real calendar date behind it.
pub fn is_iso_date(s: &str) -> bool {
    let shape_ok = s.len() == 10
        && s.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    shape_ok && chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}

impl ParamType {
    pub fn check(self, value: &Value) -> Result<(), String> {
        match self {
            ParamType::Index => match value.as_u64() {
                Some(_) => Ok(()),
                None => Err(format!("expected a non-negative integer, got {value}")),
            },
            ParamType::Date => match value.as_str() {
                Some(s) if is_iso_date(s) => Ok(()),
                _ => Err(format!("expected a YYYY-MM-DD date, got {value}")),
            },
        }
    }

    /// Whether values of this type are written as quoted strings.
    pub fn is_string(self) -> bool {
        matches!(self, ParamType::Date)
    }
}

impl Signature {
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Exact-arity, exact-type check of a structured argument map.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), String> {
        for key in args.keys() {
            if self.param(key).is_none() {
                return Err(format!("{} has no parameter {key}", self.name));
            }
        }
        for param in self.params {
            let value = args
                .get(param.name)
                .ok_or_else(|| format!("{} is missing {}", self.name, param.name))?;
            param
                .ty
                .check(value)
                .map_err(|e| format!("{}.{}: {e}", self.name, param.name))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_known_and_unknown() {
        assert!(lookup("getRecentChannelMessages").is_some());
        assert!(lookup("getChannelMessagesRange").is_some());
        assert!(lookup("unknownFn").is_none());
    }

    #[test]
    fn test_stub_matches_signature_name() {
        for sig in CATALOG {
            assert!(sig.python_stub.contains(&format!("def {}(", sig.name)));
        }
    }

    #[test]
    fn test_iso_date() {
        assert!(is_iso_date("2024-01-31"));
        assert!(!is_iso_date("2024-02-30"));
        assert!(!is_iso_date("2024-1-31"));
        assert!(!is_iso_date("20240131"));
        assert!(!is_iso_date("2024/01/31"));
    }

    #[test]
    fn test_validate_rejects_negative_and_extra() {
        let sig = lookup("getRecentChannelMessages").unwrap();
        let ok = json!({"channelIndex": 2, "limit": 5});
        assert!(sig.validate(ok.as_object().unwrap()).is_ok());

        let negative = json!({"channelIndex": -1, "limit": 5});
        assert!(sig.validate(negative.as_object().unwrap()).is_err());

        let extra = json!({"channelIndex": 1, "limit": 5, "cursor": 3});
        assert!(sig.validate(extra.as_object().unwrap()).is_err());

        let missing = json!({"channelIndex": 1});
        assert!(sig.validate(missing.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_validate_dates() {
        let sig = lookup("getChannelMessagesRange").unwrap();
        let ok = json!({"channelIndex": 0, "startDate": "2024-01-01", "endDate": "2024-01-31"});
        assert!(sig.validate(ok.as_object().unwrap()).is_ok());

        let bad = json!({"channelIndex": 0, "startDate": 20240101, "endDate": "2024-01-31"});
        assert!(sig.validate(bad.as_object().unwrap()).is_err());
    }
}
