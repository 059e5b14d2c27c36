//! Change records and their key-value interpretation.
//!
//! A [`ChangeEntry`] carries an opaque JSON payload. Every store interprets it the
//! same way through [`ChangeEntry::mutation`], so a change exercised inside a
//! shadow behaves exactly like the change later merged into the live store:
//!
//! | Payload shape | Mutation |
//! |---------------|----------|
//! | `{"key": K, "op": "delete"}` | remove `K` |
//! | `{"key": K, "value": V}` | put `V` at `K` |
//! | `{"key": K, ...}` (no `value`) | put the whole payload at `K` |
//! | anything else | put the payload at `"{type}/{id}"` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StateError;

/// One logged change. `id` is monotonic per shadow and insertion order is causal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub id: u64,
    /// Free-form type tag (e.g. `memory_organization`, `set_policy`).
    pub change_type: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEntry {
    pub fn new(id: u64, change_type: impl Into<String>, data: Value) -> Self {
        Self {
            id,
            change_type: change_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// The key-value mutation this change performs on a store.
    pub fn mutation(&self) -> Mutation {
        match self.data.get("key").and_then(Value::as_str) {
            Some(key) if self.data.get("op").and_then(Value::as_str) == Some("delete") => {
                Mutation::Remove {
                    key: key.to_string(),
                }
            }
            Some(key) => Mutation::Put {
                key: key.to_string(),
                value: self
                    .data
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| self.data.clone()),
            },
            None => Mutation::Put {
                key: format!("{}/{}", self.change_type, self.id),
                value: self.data.clone(),
            },
        }
    }
}

/// Key-value effect of a [`ChangeEntry`].
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Put { key: String, value: Value },
    Remove { key: String },
}

impl Mutation {
    pub fn key(&self) -> &str {
        match self {
            Mutation::Put { key, .. } | Mutation::Remove { key } => key,
        }
    }

    /// Short human-readable form, used in audit trails and insights.
    pub fn describe(&self) -> String {
        match self {
            Mutation::Put { key, value } => {
                let mut rendered = value.to_string();
                if rendered.chars().count() > 80 {
                    rendered = rendered.chars().take(77).collect();
                    rendered.push_str("...");
                }
                format!("set '{}' to {}", key, rendered)
            }
            Mutation::Remove { key } => format!("remove '{}'", key),
        }
    }

    /// Apply to a sled tree. The returned record restores the previous value.
    pub fn apply_to(&self, tree: &sled::Tree) -> Result<UndoRecord, StateError> {
        let previous = match self {
            Mutation::Put { key, value } => {
                tree.insert(key.as_bytes(), serde_json::to_vec(value)?)?
            }
            Mutation::Remove { key } => tree.remove(key.as_bytes())?,
        };
        Ok(UndoRecord {
            key: self.key().to_string(),
            previous: previous.map(|iv| iv.to_vec()),
        })
    }
}

/// Previous value of a key before a mutation was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoRecord {
    pub key: String,
    pub previous: Option<Vec<u8>>,
}

impl UndoRecord {
    pub fn revert(&self, tree: &sled::Tree) -> Result<(), StateError> {
        match &self.previous {
            Some(bytes) => {
                tree.insert(self.key.as_bytes(), bytes.as_slice())?;
            }
            None => {
                tree.remove(self.key.as_bytes())?;
            }
        }
        Ok(())
    }
}
