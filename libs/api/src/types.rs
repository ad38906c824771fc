use serde::{Deserialize, Serialize};

/// Имя события, под которым публикуются все envelope'ы прогона.
pub const DEFAULT_EVENT_NAME: &str = "generate.event";

/// Ключ channel'а для прогона: `generate:{channel_id}`.
pub fn channel_key(channel_id: &str) -> String {
    format!("generate:{channel_id}")
}

// ════════════════════════════════════════════════════════════════
//  Overflow Policy
// ════════════════════════════════════════════════════════════════

/// Стратегия поведения при переполнении bounded канала подписчика.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// try_send(): если канал полон, дропнуть сообщение, залогировать.
    Drop,
    /// .send().await: ждать пока появится место (back-pressure).
    #[serde(alias = "backpressure")]
    BackPressure,
}

// ════════════════════════════════════════════════════════════════
//  Backpressure Policy
// ════════════════════════════════════════════════════════════════

/// Как Emission Controller подаёт publish'и в channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackpressurePolicy {
    /// Publish N+1 подаётся только после завершения publish N.
    #[default]
    AwaitEach,
    /// Publish'и подаются не дожидаясь завершения предыдущих.
    FireAndForget,
}

impl std::fmt::Display for BackpressurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackpressurePolicy::AwaitEach => f.write_str("await-each"),
            BackpressurePolicy::FireAndForget => f.write_str("fire-and-forget"),
        }
    }
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "await-each" => Ok(BackpressurePolicy::AwaitEach),
            "fire-and-forget" => Ok(BackpressurePolicy::FireAndForget),
            other => Err(format!(
                "unknown backpressure mode '{other}' (expected await-each or fire-and-forget)"
            )),
        }
    }
}

// ════════════════════════════════════════════════════════════════
//  Envelope
// ════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Content,
    Complete,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::Content => f.write_str("content"),
            EventType::Complete => f.write_str("complete"),
        }
    }
}

/// Wire-формат события прогона:
/// `{"type":"content","data":{"messageId":..,"sequenceId":..,"content":..,"serverSentAt":..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub data: EnvelopeData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    pub message_id: String,
    pub sequence_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Unix ms на стороне отправителя.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_sent_at: Option<i64>,
}

impl Envelope {
    pub fn content(message_id: &str, sequence_id: i64, content: String, sent_at_ms: i64) -> Self {
        Self {
            event_type: EventType::Content,
            data: EnvelopeData {
                message_id: message_id.to_string(),
                sequence_id,
                content: Some(content),
                server_sent_at: Some(sent_at_ms),
            },
        }
    }

    pub fn complete(message_id: &str, sequence_id: i64, sent_at_ms: i64) -> Self {
        Self {
            event_type: EventType::Complete,
            data: EnvelopeData {
                message_id: message_id.to_string(),
                sequence_id,
                content: None,
                server_sent_at: Some(sent_at_ms),
            },
        }
    }

    /// Длина content в символах (0 для complete или отсутствующего content).
    pub fn content_len(&self) -> u64 {
        self.data
            .content
            .as_ref()
            .map(|c| c.chars().count() as u64)
            .unwrap_or(0)
    }

    pub fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Envelope::deserialize(value)
    }
}
