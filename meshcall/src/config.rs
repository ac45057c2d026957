//! Configuration types and defaults

use meshcall_core::{MeshCallError, MeshCallResult};
use meshcall_media::BlankVideoConfig;
use meshcall_signaling::ParticipantProfile;
use serde::{Deserialize, Serialize};

/// How colliding offers on one peer link are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GlarePolicy {
    /// Only the per-link "making offer" lock; an incoming offer always wins
    LockOnly,
    /// Perfect negotiation: the side with the smaller participant id is
    /// polite and rolls back its own offer, the other side ignores the
    /// colliding offer
    #[default]
    PoliteByParticipantId,
}

/// Per-call configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallConfig {
    /// Offer collision handling
    pub glare_policy: GlarePolicy,
    /// Placeholder video sent while nothing is shared
    pub blank_video: BlankVideoConfig,
    /// Remote audio that arrives while deafened starts disabled
    pub mute_new_audio_while_deafened: bool,
    /// Publish [`CallEvent`](crate::CallEvent)s to subscribers
    pub emit_events: bool,
    /// Display name and avatar announced with `join-call`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<ParticipantProfile>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            glare_policy: GlarePolicy::default(),
            blank_video: BlankVideoConfig::default(),
            mute_new_audio_while_deafened: true,
            emit_events: true,
            profile: None,
        }
    }
}

impl CallConfig {
    /// Parse and validate a JSON configuration; absent fields take defaults
    pub fn from_json_str(json: &str) -> MeshCallResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| MeshCallError::InvalidConfiguration {
                field: "call config".to_string(),
                reason: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> MeshCallResult<()> {
        self.blank_video
            .validate()
            .map_err(|e| MeshCallError::InvalidConfiguration {
                field: "blankVideo".to_string(),
                reason: e.to_string(),
            })
    }
}
