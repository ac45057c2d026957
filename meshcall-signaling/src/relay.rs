//! Room routing shared by the in-memory hub and the WebSocket relay
//!
//! [`RoomRouter`] is a pure state machine: it takes what one participant
//! sent and returns what each recipient should receive. Directed messages
//! are only forwarded between members of the same room, and the target id
//! is rewritten into the origin id.

use crate::protocol::{InboundSignal, OutboundSignal, ParticipantProfile, ParticipantSnapshot};
use meshcall_core::{ParticipantId, RoomId};
use std::collections::HashMap;
use tracing::{debug, info};

/// One message for one recipient
pub type Delivery = (ParticipantId, InboundSignal);

#[derive(Debug, Clone)]
struct Member {
    id: ParticipantId,
    sharing: bool,
}

/// Room membership and routing state
#[derive(Debug, Default)]
pub struct RoomRouter {
    rooms: HashMap<RoomId, Vec<Member>>,
    membership: HashMap<ParticipantId, RoomId>,
    profiles: HashMap<ParticipantId, ParticipantProfile>,
}

impl RoomRouter {
    /// Empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the profile announced for `participant_id` when it joins a room
    pub fn set_profile(&mut self, participant_id: ParticipantId, profile: ParticipantProfile) {
        self.profiles.insert(participant_id, profile);
    }

    /// Room `participant_id` is currently in
    pub fn room_of(&self, participant_id: &ParticipantId) -> Option<&RoomId> {
        self.membership.get(participant_id)
    }

    /// Members of `room_id`, in join order
    pub fn members(&self, room_id: &RoomId) -> Vec<ParticipantId> {
        self.rooms
            .get(room_id)
            .map(|members| members.iter().map(|m| m.id.clone()).collect())
            .unwrap_or_default()
    }

    fn snapshot(&self, member: &Member) -> ParticipantSnapshot {
        ParticipantSnapshot {
            participant_id: member.id.clone(),
            info: self.profiles.get(&member.id).cloned(),
            sharing: Some(member.sharing),
        }
    }

    fn others(&self, room_id: &RoomId, exclude: &ParticipantId) -> Vec<ParticipantId> {
        self.rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| &m.id != exclude)
                    .map(|m| m.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn same_room(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        match (self.membership.get(a), self.membership.get(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Route one message sent by `from`
    pub fn route(&mut self, from: &ParticipantId, signal: OutboundSignal) -> Vec<Delivery> {
        match signal {
            OutboundSignal::JoinCall { room_id, info } => {
                if let Some(info) = info {
                    self.set_profile(from.clone(), info);
                }
                self.join(from, room_id)
            }
            OutboundSignal::LeaveCall { room_id } => {
                if self.membership.get(from) != Some(&room_id) {
                    debug!("{} left {} without being a member", from, room_id);
                    return Vec::new();
                }
                self.remove(from)
            }
            OutboundSignal::Offer {
                target_participant_id,
                sdp,
            } => self.direct(
                from,
                target_participant_id,
                InboundSignal::Offer {
                    from_participant_id: from.clone(),
                    sdp,
                },
            ),
            OutboundSignal::Answer {
                target_participant_id,
                sdp,
            } => self.direct(
                from,
                target_participant_id,
                InboundSignal::Answer {
                    from_participant_id: from.clone(),
                    sdp,
                },
            ),
            OutboundSignal::IceCandidate {
                target_participant_id,
                candidate,
            } => self.direct(
                from,
                target_participant_id,
                InboundSignal::IceCandidate {
                    from_participant_id: from.clone(),
                    candidate,
                },
            ),
            OutboundSignal::ScreenShare { room_id, on } => {
                if self.membership.get(from) != Some(&room_id) {
                    debug!("Dropping screen-share from {} outside {}", from, room_id);
                    return Vec::new();
                }
                if let Some(member) = self
                    .rooms
                    .get_mut(&room_id)
                    .and_then(|members| members.iter_mut().find(|m| &m.id == from))
                {
                    member.sharing = on;
                }
                self.others(&room_id, from)
                    .into_iter()
                    .map(|to| {
                        (
                            to,
                            InboundSignal::ScreenShare {
                                participant_id: from.clone(),
                                on,
                            },
                        )
                    })
                    .collect()
            }
        }
    }

    /// Forget `participant_id` after its connection dropped
    pub fn disconnect(&mut self, participant_id: &ParticipantId) -> Vec<Delivery> {
        let deliveries = self.remove(participant_id);
        self.profiles.remove(participant_id);
        deliveries
    }

    fn join(&mut self, from: &ParticipantId, room_id: RoomId) -> Vec<Delivery> {
        if self.membership.get(from) == Some(&room_id) {
            debug!("{} re-joined {}; resending membership", from, room_id);
            let snapshot = self.existing_for(&room_id, from);
            return vec![(from.clone(), snapshot)];
        }

        // switching rooms counts as leaving the old one
        let mut deliveries = self.remove(from);

        let joiner = Member {
            id: from.clone(),
            sharing: false,
        };
        let announcement = InboundSignal::UserJoined(self.snapshot(&joiner));
        for to in self.others(&room_id, from) {
            deliveries.push((to, announcement.clone()));
        }
        let existing = self.existing_for(&room_id, from);
        deliveries.push((from.clone(), existing));

        self.rooms.entry(room_id.clone()).or_default().push(joiner);
        self.membership.insert(from.clone(), room_id.clone());
        info!("Participant {} joined room {}", from, room_id);
        deliveries
    }

    fn existing_for(&self, room_id: &RoomId, exclude: &ParticipantId) -> InboundSignal {
        let snapshots = self
            .rooms
            .get(room_id)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| &m.id != exclude)
                    .map(|m| self.snapshot(m))
                    .collect()
            })
            .unwrap_or_default();
        InboundSignal::ExistingParticipants(snapshots)
    }

    fn remove(&mut self, participant_id: &ParticipantId) -> Vec<Delivery> {
        let Some(room_id) = self.membership.remove(participant_id) else {
            return Vec::new();
        };
        if let Some(members) = self.rooms.get_mut(&room_id) {
            members.retain(|m| &m.id != participant_id);
            if members.is_empty() {
                self.rooms.remove(&room_id);
            }
        }
        info!("Participant {} left room {}", participant_id, room_id);
        self.others(&room_id, participant_id)
            .into_iter()
            .map(|to| {
                (
                    to,
                    InboundSignal::UserLeft {
                        participant_id: participant_id.clone(),
                    },
                )
            })
            .collect()
    }

    fn direct(
        &self,
        from: &ParticipantId,
        target: ParticipantId,
        signal: InboundSignal,
    ) -> Vec<Delivery> {
        if !self.same_room(from, &target) {
            debug!(
                "Dropping {} from {} to {}: not in the same room",
                signal.event_name(),
                from,
                target
            );
            return Vec::new();
        }
        vec![(target, signal)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshcall_core::SessionDescription;

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::from(s)
    }

    fn join(router: &mut RoomRouter, who: &str) -> Vec<Delivery> {
        router.route(
            &pid(who),
            OutboundSignal::JoinCall {
                room_id: RoomId::from("room"),
                info: None,
            },
        )
    }

    #[test]
    fn test_join_announces_both_ways() {
        let mut router = RoomRouter::new();
        router.set_profile(pid("b"), ParticipantProfile::named("bob"));

        let first = join(&mut router, "a");
        assert_eq!(
            first,
            vec![(pid("a"), InboundSignal::ExistingParticipants(vec![]))]
        );

        let second = join(&mut router, "b");
        assert_eq!(second.len(), 2);
        match &second[0] {
            (to, InboundSignal::UserJoined(snapshot)) => {
                assert_eq!(to, &pid("a"));
                assert_eq!(snapshot.participant_id, pid("b"));
                assert_eq!(
                    snapshot.info.as_ref().and_then(|i| i.username.as_deref()),
                    Some("bob")
                );
            }
            other => panic!("unexpected delivery {:?}", other),
        }
        match &second[1] {
            (to, InboundSignal::ExistingParticipants(list)) => {
                assert_eq!(to, &pid("b"));
                assert_eq!(list.len(), 1);
                assert_eq!(list[0].participant_id, pid("a"));
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }

    #[test]
    fn test_directed_messages_rewrite_origin() {
        let mut router = RoomRouter::new();
        join(&mut router, "a");
        join(&mut router, "b");

        let out = router.route(
            &pid("a"),
            OutboundSignal::Offer {
                target_participant_id: pid("b"),
                sdp: SessionDescription::offer("x"),
            },
        );
        assert_eq!(
            out,
            vec![(
                pid("b"),
                InboundSignal::Offer {
                    from_participant_id: pid("a"),
                    sdp: SessionDescription::offer("x"),
                }
            )]
        );

        // strangers are not reachable
        let dropped = router.route(
            &pid("a"),
            OutboundSignal::Answer {
                target_participant_id: pid("zed"),
                sdp: SessionDescription::answer("x"),
            },
        );
        assert!(dropped.is_empty());
    }

    #[test]
    fn test_screen_share_flag_is_remembered_for_late_joiners() {
        let mut router = RoomRouter::new();
        join(&mut router, "a");
        let out = router.route(
            &pid("a"),
            OutboundSignal::ScreenShare {
                room_id: RoomId::from("room"),
                on: true,
            },
        );
        assert!(out.is_empty());

        let late = join(&mut router, "b");
        match late.last() {
            Some((_, InboundSignal::ExistingParticipants(list))) => {
                assert_eq!(list[0].sharing, Some(true));
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }

    #[test]
    fn test_profile_sent_with_join_reaches_late_joiners() {
        let mut router = RoomRouter::new();
        router.route(
            &pid("a"),
            OutboundSignal::JoinCall {
                room_id: RoomId::from("room"),
                info: Some(ParticipantProfile::named("ana")),
            },
        );

        let late = join(&mut router, "b");
        match late.last() {
            Some((_, InboundSignal::ExistingParticipants(list))) => {
                let name = list[0].info.as_ref().and_then(|i| i.username.as_deref());
                assert_eq!(name, Some("ana"));
            }
            other => panic!("unexpected delivery {:?}", other),
        }
    }

    #[test]
    fn test_disconnect_notifies_remaining_members() {
        let mut router = RoomRouter::new();
        join(&mut router, "a");
        join(&mut router, "b");

        let out = router.disconnect(&pid("a"));
        assert_eq!(
            out,
            vec![(
                pid("b"),
                InboundSignal::UserLeft {
                    participant_id: pid("a")
                }
            )]
        );
        assert!(router.room_of(&pid("a")).is_none());
        assert_eq!(router.members(&RoomId::from("room")), vec![pid("b")]);
    }
}
