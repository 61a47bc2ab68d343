use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::{ObjectMeta, Resource};

pub const CONDITION_VALID: &str = "Valid";
pub const CONDITION_SYNCED: &str = "Synced";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceExportStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Declares that the Service with the same name and namespace should be
/// published to the remote registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceExport {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub status: ServiceExportStatus,
}

impl ServiceExport {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            meta: ObjectMeta::new(namespace, name),
            status: ServiceExportStatus::default(),
        }
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition. The transition time only moves when status flips.
    /// Returns `true` if anything changed.
    pub fn set_condition(
        &mut self,
        type_: &str,
        status: bool,
        reason: Option<&str>,
        message: Option<String>,
    ) -> bool {
        let reason = reason.map(str::to_string);
        match self.status.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(c) => {
                if c.status == status && c.reason == reason && c.message == message {
                    return false;
                }
                if c.status != status {
                    c.last_transition_time = Utc::now();
                }
                c.status = status;
                c.reason = reason;
                c.message = message;
                true
            }
            None => {
                self.status.conditions.push(Condition {
                    type_: type_.to_string(),
                    status,
                    reason,
                    message,
                    last_transition_time: Utc::now(),
                });
                true
            }
        }
    }
}

impl Resource for ServiceExport {
    const KIND: &'static str = "serviceexports";

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.meta
    }
}
