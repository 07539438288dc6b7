//! Domain message and capture-group types.
//!
//! A [`Message`] is built once from a transport event and never changes
//! afterwards. [`Groups`] carries the submatches of the command pattern that
//! selected the handler.

/// An inbound chat message as seen by the router.
///
/// # Examples
///
/// ```
/// use flarebot_core::Message;
///
/// let msg = Message::new("U123", "C456", "<@UBOT> help", "1700000000.000100");
/// assert_eq!(msg.channel_id(), "C456");
/// assert!(!msg.from_self());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    author_id: String,
    channel_id: String,
    text: String,
    ts: String,
    from_self: bool,
}

impl Message {
    /// Creates a message authored by someone other than the bot.
    pub fn new(
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
        ts: impl Into<String>,
    ) -> Self {
        Self {
            author_id: author_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
            ts: ts.into(),
            from_self: false,
        }
    }

    /// Marks whether the transport reported this message as the bot's own.
    pub fn with_self_origin(mut self, from_self: bool) -> Self {
        self.from_self = from_self;
        self
    }

    /// User ID of the author.
    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    /// Channel the message was posted in.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Raw message text, mentions still encoded as `<@U…>`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Transport timestamp, which doubles as the message ID.
    pub fn ts(&self) -> &str {
        &self.ts
    }

    /// Whether the transport flagged this message as sent by the bot.
    pub fn from_self(&self) -> bool {
        self.from_self
    }
}

/// Capture groups of the pattern that matched a message.
///
/// Index 0 is the whole match. Groups that did not participate in the match
/// are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Groups(Vec<Option<String>>);

impl Groups {
    /// Copies the submatches out of a regex match.
    pub fn from_captures(caps: &regex::Captures<'_>) -> Self {
        Self(
            caps.iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        )
    }

    /// Returns group `index`, or `None` if it did not participate.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).and_then(|g| g.as_deref())
    }

    /// Number of groups, including the whole match.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no groups at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Option<String>>> for Groups {
    fn from(groups: Vec<Option<String>>) -> Self {
        Self(groups)
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;

    #[test]
    fn test_should_build_message_with_self_origin() {
        let msg = Message::new("UBOT", "C1", "hi", "1.0").with_self_origin(true);
        assert!(msg.from_self());
        assert_eq!(msg.author_id(), "UBOT");
        assert_eq!(msg.ts(), "1.0");
    }

    #[test]
    fn test_should_copy_capture_groups() {
        let re = Regex::new(r"fire (?:a )?flare p([012])(?: (\w+))?").expect("regex");
        let caps = re.captures("fire a flare p1").expect("captures");
        let groups = Groups::from_captures(&caps);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups.get(0), Some("fire a flare p1"));
        assert_eq!(groups.get(1), Some("1"));
        assert_eq!(groups.get(2), None);
        assert_eq!(groups.get(9), None);
    }
}
