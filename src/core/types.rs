use super::{CommitError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier issued by the backend when an entity (process) is spawned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CommitError::validation("entity id must not be empty"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(CommitError::Validation(format!(
                "entity id '{}' must not contain whitespace",
                trimmed
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name/value pair attached to every remote message. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn action(value: impl Into<String>) -> Self {
        Self::new("Action", value)
    }
}

/// Returns the value of the first tag called `name`.
pub fn find_tag<'a>(tags: &'a [Tag], name: &str) -> Option<&'a str> {
    tags.iter()
        .find(|tag| tag.name == name)
        .map(|tag| tag.value.as_str())
}

/// Kind of remote call a commit step issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CommitAction {
    Spawn,
    Execute,
    RegisterWithParent,
}

impl fmt::Display for CommitAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Spawn => "Spawn",
            Self::Execute => "Execute",
            Self::RegisterWithParent => "RegisterWithParent",
        };
        f.write_str(name)
    }
}

/// Acknowledgement of an accepted remote call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Entity the call was addressed to (or created, for spawns).
    pub entity: EntityId,
    /// Message id assigned by the backend. Equal to the entity id for spawns.
    pub message_id: String,
    /// Set when the call was skipped because its effect was already present.
    #[serde(default)]
    pub replayed: bool,
}

impl Receipt {
    pub fn new(entity: EntityId, message_id: impl Into<String>) -> Self {
        Self {
            entity,
            message_id: message_id.into(),
            replayed: false,
        }
    }

    pub fn replayed(entity: EntityId, message_id: impl Into<String>) -> Self {
        Self {
            replayed: true,
            ..Self::new(entity, message_id)
        }
    }
}

/// Result of a side-effect-free read, validated at the client boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    /// First reply message carried a JSON `Data` payload.
    Json(JsonValue),
    /// First reply message carried only tags.
    Tags(BTreeMap<String, String>),
    /// No reply message.
    Empty,
}

impl QueryResponse {
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        match self {
            Self::Tags(tags) => tags.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}
