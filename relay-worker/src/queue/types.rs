//! Queue message types for the two registration downstreams.
//!
//! This module defines the message formats for:
//! - `ai-hackathon-registrations` queue: team registrations for the AI hackathon
//! - `woc-registrations` queue: individual account registrations

use std::fmt;

use lapin::options::QueueDeclareOptions;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};

/// Default queue name for AI hackathon team registrations.
pub const HACKATHON_QUEUE: &str = "ai-hackathon-registrations";

/// Default queue name for WoC account registrations.
pub const WOC_QUEUE: &str = "woc-registrations";

/// A durable queue this relay drains.
///
/// Every queue is declared the same way: durable, not auto-deleted,
/// not exclusive. Redeclaring is a no-op on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub name: String,
}

impl QueueBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Options used for `queue.declare`.
    pub fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            durable: true,
            auto_delete: false,
            exclusive: false,
            nowait: false,
            passive: false,
        }
    }
}

/// A typed message body decoded from a delivery.
///
/// Decoding must stay pure: a body that fails to decode once will always fail.
/// Payloads decode leniently: absent or `null` fields take their zero value,
/// and only a body that is not a JSON object of the right field types fails.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Bodies carry secrets; decode error messages are not logged.
    const SENSITIVE: bool = false;

    /// Short human-readable identifier used in logs.
    fn label(&self) -> &str;
}

/// Deserialize `null` as the type's default.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// AI Hackathon (ai-hackathon-registrations queue)
// =============================================================================

/// Team registration for the AI hackathon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HackathonPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub team_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub leader_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub leader_email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub leader_phone_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub leader_college_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub problem_statement: String,
    #[serde(deserialize_with = "null_as_default")]
    pub team_members: Vec<HackathonTeamMember>,
}

/// One member of a hackathon team (excluding the leader).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HackathonTeamMember {
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub phone_number: String,
    #[serde(deserialize_with = "null_as_default")]
    pub college_name: String,
}

impl Payload for HackathonPayload {
    fn label(&self) -> &str {
        &self.team_name
    }
}

// =============================================================================
// WoC (woc-registrations queue)
// =============================================================================

/// Account registration for WoC. Field names are camelCase on the wire.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WocPayload {
    #[serde(deserialize_with = "null_as_default")]
    pub first_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub last_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub email: String,
    #[serde(deserialize_with = "null_as_default")]
    pub password: String,
}

impl fmt::Debug for WocPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WocPayload")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Payload for WocPayload {
    const SENSITIVE: bool = true;

    fn label(&self) -> &str {
        &self.email
    }
}
