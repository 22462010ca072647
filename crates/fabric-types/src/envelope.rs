//! Wire-visible event envelope and the canonical event-type grammar
//! (§3, §4.3): `<service>:<action>:v<major>:<state>`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::metadata::Metadata;
use crate::EntityId;

/// (De)serializes a `DateTime<Utc>` as the wire format's int64 Unix-seconds
/// `timestamp` field (§3, §6), rather than chrono's default RFC 3339 string.
mod unix_seconds {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.timestamp())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Utc.timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("{seconds} is not a representable Unix timestamp")))
    }
}

/// Lifecycle state component of an event type. Every action's events march
/// through a subset of these in order; `Cancelled` is terminal and mutually
/// exclusive with `Completed`/`Failed` for a given event_id (§8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    /// Caller asked for the action to run; nothing has happened yet.
    Requested,
    /// The dispatcher handed the action to its handler.
    Started,
    /// The handler ran to completion successfully.
    Completed,
    /// The handler ran and failed.
    Failed,
    /// The action was withdrawn before it finished.
    Cancelled,
}

impl EventState {
    fn as_str(&self) -> &'static str {
        match self {
            EventState::Requested => "requested",
            EventState::Started => "started",
            EventState::Completed => "completed",
            EventState::Failed => "failed",
            EventState::Cancelled => "cancelled",
        }
    }

    /// Whether reaching this state closes out the action (§8 invariant:
    /// exactly one terminal state per event_id).
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventState::Completed | EventState::Failed | EventState::Cancelled)
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventState {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requested" => Ok(EventState::Requested),
            "started" => Ok(EventState::Started),
            "completed" => Ok(EventState::Completed),
            "failed" => Ok(EventState::Failed),
            "cancelled" => Ok(EventState::Cancelled),
            other => Err(EventTypeParseError::UnknownState(other.to_string())),
        }
    }
}

/// Failure modes when parsing an `EventType` from its wire string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventTypeParseError {
    /// The string did not split into exactly four `:`-delimited segments.
    #[error("event type {0:?} must have exactly 4 colon-delimited segments")]
    WrongSegmentCount(String),
    /// The version segment was not `v<digits>`.
    #[error("event type version segment {0:?} must look like v<major>")]
    InvalidVersionSegment(String),
    /// The state segment was not one of the five recognized states.
    #[error("unknown event state {0:?}")]
    UnknownState(String),
    /// The service or action segment was empty.
    #[error("event type segment must not be empty")]
    EmptySegment,
}

/// Parsed `<service>:<action>:v<major>:<state>` event type (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventType {
    /// Owning service, e.g. `"product"`.
    pub service: String,
    /// Action name, e.g. `"update"`.
    pub action: String,
    /// Major version of the action's contract.
    pub major: u32,
    /// Lifecycle state.
    pub state: EventState,
}

impl EventType {
    /// Construct directly from parts, skipping string parsing.
    pub fn new(service: impl Into<String>, action: impl Into<String>, major: u32, state: EventState) -> Self {
        Self {
            service: service.into(),
            action: action.into(),
            major,
            state,
        }
    }

    /// Same service/action/major, with the state swapped — used by the
    /// dispatcher to mint the `started`/`completed`/`failed` follow-up
    /// events for a `requested` one (§4.3).
    pub fn with_state(&self, state: EventState) -> Self {
        Self {
            service: self.service.clone(),
            action: self.action.clone(),
            major: self.major,
            state,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:v{}:{}", self.service, self.action, self.major, self.state)
    }
}

impl FromStr for EventType {
    type Err = EventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [service, action, version, state] = parts.as_slice() else {
            return Err(EventTypeParseError::WrongSegmentCount(s.to_string()));
        };
        if service.is_empty() || action.is_empty() {
            return Err(EventTypeParseError::EmptySegment);
        }
        let major = version
            .strip_prefix('v')
            .and_then(|digits| digits.parse::<u32>().ok())
            .ok_or_else(|| EventTypeParseError::InvalidVersionSegment(version.to_string()))?;
        let state = state.parse()?;
        Ok(EventType {
            service: service.to_string(),
            action: action.to_string(),
            major,
            state,
        })
    }
}

impl TryFrom<String> for EventType {
    type Error = EventTypeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EventType> for String {
    fn from(value: EventType) -> Self {
        value.to_string()
    }
}

/// Opaque event body. Kept as a JSON value rather than a generic type
/// parameter so the envelope stays object-safe across crate boundaries
/// (dispatcher, storage, transport all handle one concrete type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// The event-specific body, wire-named `data` per §6.
    pub data: Value,
}

impl EventPayload {
    /// Wrap an empty JSON object, the payload shape used for lifecycle
    /// events that carry no additional data beyond the envelope itself.
    pub fn empty() -> Self {
        Self { data: Value::Object(serde_json::Map::new()) }
    }

    /// Serialize any `Serialize` value into a payload's `data` field.
    pub fn from_value(value: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self { data: serde_json::to_value(value)? })
    }

    /// Decode `data` into a typed request/response shape (§4.3 step 5).
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone())
    }
}

/// The envelope every event travels in from dispatch through the post-op
/// pipeline to storage and downstream subscribers (§3, §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this specific event occurrence.
    #[serde(rename = "id")]
    pub event_id: Uuid,
    /// `<service>:<action>:v<major>:<state>`.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Entity the event is about.
    pub entity_id: EntityId,
    /// When the event occurred, assigned by the dispatcher. Wire-encoded as
    /// `timestamp`, an int64 Unix-seconds value rather than an RFC 3339
    /// string (§3, §6).
    #[serde(rename = "timestamp", with = "unix_seconds")]
    pub occurred_at: DateTime<Utc>,
    /// Canonical metadata snapshot at the time of the event.
    pub metadata: Metadata,
    /// Event-specific body.
    pub payload: EventPayload,
    /// ID shared by every event in one orchestration call's lifecycle
    /// (requested → started → completed/failed/cancelled).
    pub correlation_id: Uuid,
    /// Event that directly caused this one, if any (§4.3 causal chaining).
    pub causation_id: Option<Uuid>,
}

impl EventEnvelope {
    /// Mint the initial `requested` envelope for a new orchestration call.
    /// `correlation_id` doubles as this event's own ID as it is first in
    /// the chain.
    pub fn requested(
        event_type: EventType,
        entity_id: EntityId,
        occurred_at: DateTime<Utc>,
        metadata: Metadata,
        payload: EventPayload,
        correlation_id: Uuid,
    ) -> Self {
        Self {
            event_id: correlation_id,
            event_type,
            entity_id,
            occurred_at,
            metadata,
            payload,
            correlation_id,
            causation_id: None,
        }
    }

    /// Derive a follow-up envelope in the same causal chain with a new
    /// state, new event_id, and `causation_id` pointing back at `self`.
    pub fn derive(&self, state: EventState, occurred_at: DateTime<Utc>, event_id: Uuid, payload: EventPayload) -> Self {
        Self {
            event_id,
            event_type: self.event_type.with_state(state),
            entity_id: self.entity_id.clone(),
            occurred_at,
            metadata: self.metadata.clone(),
            payload,
            correlation_id: self.correlation_id,
            causation_id: Some(self.event_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_type_roundtrips_through_display_and_parse() {
        let et = EventType::new("product", "update", 1, EventState::Completed);
        let s = et.to_string();
        assert_eq!(s, "product:update:v1:completed");
        let parsed: EventType = s.parse().unwrap();
        assert_eq!(parsed, et);
    }

    #[test]
    fn event_type_rejects_malformed_strings() {
        assert!(matches!(
            "product:update:completed".parse::<EventType>(),
            Err(EventTypeParseError::WrongSegmentCount(_))
        ));
        assert!(matches!(
            "product:update:1:completed".parse::<EventType>(),
            Err(EventTypeParseError::InvalidVersionSegment(_))
        ));
        assert!(matches!(
            "product:update:v1:done".parse::<EventType>(),
            Err(EventTypeParseError::UnknownState(_))
        ));
        assert!(matches!(
            ":update:v1:completed".parse::<EventType>(),
            Err(EventTypeParseError::EmptySegment)
        ));
    }

    #[test]
    fn terminal_states_are_exactly_three() {
        assert!(!EventState::Requested.is_terminal());
        assert!(!EventState::Started.is_terminal());
        assert!(EventState::Completed.is_terminal());
        assert!(EventState::Failed.is_terminal());
        assert!(EventState::Cancelled.is_terminal());
    }

    #[test]
    fn envelope_serializes_to_the_documented_wire_field_names() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let metadata = Metadata::new("u1", now);
        let envelope = EventEnvelope::requested(
            EventType::new("product", "update", 1, EventState::Requested),
            EntityId::from("prod-1"),
            now,
            metadata,
            EventPayload::empty(),
            Uuid::now_v7(),
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["id"], serde_json::json!(envelope.event_id));
        assert_eq!(value["type"], serde_json::json!(envelope.event_type.to_string()));
        assert_eq!(value["timestamp"], serde_json::json!(1_700_000_000_i64));
        assert!(value.get("event_id").is_none());
        assert!(value.get("event_type").is_none());
        assert!(value.get("occurred_at").is_none());

        let round_tripped: EventEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(round_tripped, envelope);
    }

    #[test]
    fn derived_envelope_shares_correlation_and_chains_causation() {
        let now = Utc::now();
        let metadata = Metadata::new("u1", now);
        let requested = EventEnvelope::requested(
            EventType::new("product", "update", 1, EventState::Requested),
            EntityId::from("prod-1"),
            now,
            metadata,
            EventPayload::empty(),
            Uuid::now_v7(),
        );
        let started = requested.derive(EventState::Started, now, Uuid::now_v7(), EventPayload::empty());
        assert_eq!(started.correlation_id, requested.correlation_id);
        assert_eq!(started.causation_id, Some(requested.event_id));
        assert_ne!(started.event_id, requested.event_id);
    }
}
