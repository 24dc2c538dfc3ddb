use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// User-authored.
    Outgoing,
    /// Assistant-authored.
    Incoming,
}

/// One turn in the conversation.
///
/// A message carries either markdown `content` or a structured
/// `outputs`/`data` payload produced by the operator runtime.
/// `response_to` identifies the originating query and keys votes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_to: Option<String>,
}

impl Message {
    pub fn outgoing(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Outgoing,
            content: Some(content.into()),
            outputs: None,
            data: None,
            response_to: None,
        }
    }

    pub fn incoming(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Incoming,
            content: Some(content.into()),
            outputs: None,
            data: None,
            response_to: None,
        }
    }
}

/// A maximal run of consecutive messages sharing the same kind.
///
/// Derived at render time, never persisted. The trailing group may be
/// synthetic (empty, incoming, `receiving` set) so the loading indicator
/// has somewhere to render while the user's message is still unanswered.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageGroup {
    pub kind: MessageKind,
    pub messages: Vec<Message>,
    pub last: bool,
    pub receiving: bool,
    pub waiting: bool,
}

impl MessageGroup {
    fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            messages: Vec::new(),
            last: false,
            receiving: false,
            waiting: false,
        }
    }
}

/// Partition `messages` into contiguous same-kind groups for rendering.
///
/// Concatenating the groups reproduces the input exactly; no two adjacent
/// groups share a kind. The last group is marked `last`. If the final group
/// is incoming it carries the session flags; otherwise a synthetic empty
/// incoming group with `receiving` set is appended. Empty input produces no
/// groups at all.
pub fn group_messages(messages: &[Message], receiving: bool, waiting: bool) -> Vec<MessageGroup> {
    let mut groups: Vec<MessageGroup> = Vec::new();

    for message in messages {
        match groups.last_mut() {
            Some(group) if group.kind == message.kind => {
                group.messages.push(message.clone());
            }
            _ => {
                let mut group = MessageGroup::new(message.kind);
                group.messages.push(message.clone());
                groups.push(group);
            }
        }
    }

    if let Some(tail) = groups.last_mut() {
        if tail.kind == MessageKind::Incoming {
            tail.receiving = receiving;
            tail.waiting = waiting;
        } else {
            let mut synthetic = MessageGroup::new(MessageKind::Incoming);
            synthetic.receiving = true;
            groups.push(synthetic);
        }
    }

    if let Some(tail) = groups.last_mut() {
        tail.last = true;
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_empty() {
        assert!(group_messages(&[], false, false).is_empty());
    }

    #[test]
    fn test_group_single_outgoing_appends_synthetic() {
        let messages = vec![Message::outgoing("hi")];
        let groups = group_messages(&messages, false, false);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, MessageKind::Outgoing);
        assert_eq!(groups[0].messages, messages);
        assert!(!groups[0].last);

        assert_eq!(groups[1].kind, MessageKind::Incoming);
        assert!(groups[1].messages.is_empty());
        assert!(groups[1].receiving);
        assert!(groups[1].last);
    }

    #[test]
    fn test_group_runs_by_kind() {
        let messages = vec![
            Message::incoming("a"),
            Message::incoming("b"),
            Message::outgoing("c"),
        ];
        let groups = group_messages(&messages, false, false);

        // [incoming x2], [outgoing x1], synthetic incoming
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].messages.len(), 2);
        assert_eq!(groups[1].messages.len(), 1);
        assert!(groups[2].messages.is_empty());
        assert!(groups[2].last);
    }

    #[test]
    fn test_last_incoming_group_carries_flags() {
        let messages = vec![
            Message::incoming("a"),
            Message::outgoing("b"),
            Message::incoming("c"),
        ];
        let groups = group_messages(&messages, true, false);

        assert_eq!(groups.len(), 3);
        let tail = groups.last().unwrap();
        assert_eq!(tail.kind, MessageKind::Incoming);
        assert!(tail.receiving);
        assert!(!tail.waiting);
        assert!(tail.last);
        // No synthetic group when the last real group is incoming.
        assert_eq!(tail.messages.len(), 1);
    }

    #[test]
    fn test_concatenation_reproduces_input() {
        let messages = vec![
            Message::outgoing("1"),
            Message::incoming("2"),
            Message::incoming("3"),
            Message::outgoing("4"),
            Message::outgoing("5"),
            Message::incoming("6"),
        ];
        let groups = group_messages(&messages, false, true);

        let flattened: Vec<Message> = groups
            .iter()
            .flat_map(|g| g.messages.iter().cloned())
            .collect();
        assert_eq!(flattened, messages);

        for pair in groups.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
        }

        let last_count = groups.iter().filter(|g| g.last).count();
        assert_eq!(last_count, 1);
        assert!(groups.last().unwrap().last);
    }

    #[test]
    fn test_message_json_round_trip() {
        let message = Message {
            kind: MessageKind::Incoming,
            content: Some("found 12 samples".to_string()),
            outputs: None,
            data: Some(serde_json::json!({"overwrite_last": true})),
            response_to: Some("q1".to_string()),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"type\":\"incoming\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }
}
