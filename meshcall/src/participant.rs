//! Remote participant metadata
//!
//! Soft, last-write-wins profile data (`remoteInfo` in the UI read model),
//! keyed by participant id and owned by the orchestrator.

use meshcall_core::ParticipantId;
use meshcall_signaling::ParticipantSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What the UI shows for a remote participant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantInfo {
    /// Display name
    pub username: Option<String>,
    /// Avatar image URL
    pub avatar_url: Option<String>,
    /// Whether the participant is sharing its screen
    pub sharing: bool,
}

/// Result of merging an announcement into the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoUpdate {
    /// First time this participant was seen
    Inserted,
    /// Known participant, metadata changed
    Changed,
    /// Known participant, nothing changed
    Unchanged,
}

/// `remoteInfo`: participant id to [`ParticipantInfo`]
#[derive(Debug, Clone, Default)]
pub struct ParticipantDirectory {
    entries: BTreeMap<ParticipantId, ParticipantInfo>,
}

impl ParticipantDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an announcement; fields absent from it keep their current value
    pub fn upsert(&mut self, snapshot: &ParticipantSnapshot) -> InfoUpdate {
        let inserted = !self.entries.contains_key(&snapshot.participant_id);
        let entry = self
            .entries
            .entry(snapshot.participant_id.clone())
            .or_default();
        let before = entry.clone();

        if let Some(profile) = &snapshot.info {
            if profile.username.is_some() {
                entry.username = profile.username.clone();
            }
            if profile.avatar_url.is_some() {
                entry.avatar_url = profile.avatar_url.clone();
            }
        }
        if let Some(sharing) = snapshot.sharing {
            entry.sharing = sharing;
        }

        if inserted {
            InfoUpdate::Inserted
        } else if *entry != before {
            InfoUpdate::Changed
        } else {
            InfoUpdate::Unchanged
        }
    }

    /// Set the sharing flag, creating the entry if needed; returns whether it changed
    pub fn set_sharing(&mut self, participant_id: &ParticipantId, sharing: bool) -> bool {
        let entry = self.entries.entry(participant_id.clone()).or_default();
        let changed = entry.sharing != sharing;
        entry.sharing = sharing;
        changed
    }

    /// Metadata for one participant
    pub fn get(&self, participant_id: &ParticipantId) -> Option<&ParticipantInfo> {
        self.entries.get(participant_id)
    }

    /// Forget a participant
    pub fn remove(&mut self, participant_id: &ParticipantId) -> Option<ParticipantInfo> {
        self.entries.remove(participant_id)
    }

    /// Whether the participant is known
    pub fn contains(&self, participant_id: &ParticipantId) -> bool {
        self.entries.contains_key(participant_id)
    }

    /// Copy of the whole map
    pub fn snapshot(&self) -> BTreeMap<ParticipantId, ParticipantInfo> {
        self.entries.clone()
    }

    /// Number of known participants
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no participant is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget everyone
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_signaling::ParticipantProfile;

    #[test]
    fn test_upsert_is_last_write_wins_per_field() {
        let mut directory = ParticipantDirectory::new();
        let a = ParticipantId::from("a");

        let first = ParticipantSnapshot::new("a").with_info(ParticipantProfile {
            username: Some("ann".to_string()),
            avatar_url: Some("https://x/1.png".to_string()),
        });
        assert_eq!(directory.upsert(&first), InfoUpdate::Inserted);

        // missing avatar does not erase the known one
        let rename = ParticipantSnapshot::new("a").with_info(ParticipantProfile::named("annie"));
        assert_eq!(directory.upsert(&rename), InfoUpdate::Changed);
        let info = directory.get(&a).unwrap();
        assert_eq!(info.username.as_deref(), Some("annie"));
        assert_eq!(info.avatar_url.as_deref(), Some("https://x/1.png"));

        assert_eq!(directory.upsert(&rename), InfoUpdate::Unchanged);
    }

    #[test]
    fn test_sharing_flag() {
        let mut directory = ParticipantDirectory::new();
        let b = ParticipantId::from("b");

        assert!(directory.set_sharing(&b, true));
        assert!(!directory.set_sharing(&b, true));
        assert!(directory.get(&b).unwrap().sharing);

        directory.upsert(&ParticipantSnapshot::new("b").with_sharing(false));
        assert!(!directory.get(&b).unwrap().sharing);

        assert!(directory.remove(&b).is_some());
        assert!(directory.is_empty());
    }
}
