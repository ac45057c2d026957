//! Offer/answer/ICE exchange per peer link
//!
//! [`NegotiationCoordinator`] is stateless apart from its glare policy; the
//! per-link state it needs (making-offer flag, generation, negotiated flag)
//! lives in the [`PeerRegistry`]. Everything else it touches goes through a
//! [`NegotiationHost`], which the orchestrator implements.
//!
//! The registry lock is only taken for short, synchronous sections; it is
//! released before every await on the transport.

use crate::config::GlarePolicy;
use crate::peer::PeerRegistry;
use meshcall_core::{
    IceCandidate, MeshCallResult, ParticipantId, SessionDescription, SignalingState,
};
use meshcall_signaling::OutboundSignal;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// What the coordinator needs from its owner
pub trait NegotiationHost: Send + Sync {
    /// The peer registry
    fn peers(&self) -> &Mutex<PeerRegistry>;

    /// Send a signal to the room; `false` if signaling is unavailable
    fn send_signal(&self, signal: OutboundSignal) -> bool;

    /// This client's participant id, if the relay assigned one
    fn local_participant_id(&self) -> Option<ParticipantId>;

    /// Copy tracks already sitting on the link's receivers into the remote stream
    fn sync_receivers(&self, participant_id: &ParticipantId);

    /// Create the link to `participant_id` if it does not exist
    fn ensure_peer(&self, participant_id: &ParticipantId) -> MeshCallResult<bool>;
}

/// Releases the making-offer flag however the offer attempt ends
struct MakingOfferGuard<'a> {
    peers: &'a Mutex<PeerRegistry>,
    participant_id: &'a ParticipantId,
    generation: u64,
}

impl Drop for MakingOfferGuard<'_> {
    fn drop(&mut self) {
        self.peers
            .lock()
            .finish_offer(self.participant_id, self.generation);
    }
}

/// Glare-free offer/answer driver
#[derive(Debug, Clone, Copy)]
pub struct NegotiationCoordinator {
    policy: GlarePolicy,
}

impl NegotiationCoordinator {
    /// Coordinator resolving collisions with `policy`
    pub fn new(policy: GlarePolicy) -> Self {
        Self { policy }
    }

    /// Active glare policy
    pub fn policy(&self) -> GlarePolicy {
        self.policy
    }

    /// Whether the local side yields on an offer collision with `remote`
    pub fn is_polite(&self, local: Option<&ParticipantId>, remote: &ParticipantId) -> bool {
        match (self.policy, local) {
            (GlarePolicy::PoliteByParticipantId, Some(local)) => local < remote,
            _ => true,
        }
    }

    /// Create, apply and send an offer unless one is already in flight.
    ///
    /// Returns whether an offer was sent. An attempt that finds the link
    /// replaced, or a remote offer applied meanwhile, is dropped quietly.
    pub async fn safe_make_offer<H>(
        &self,
        host: &H,
        participant_id: &ParticipantId,
    ) -> MeshCallResult<bool>
    where
        H: NegotiationHost + ?Sized,
    {
        let begun = host.peers().lock().try_begin_offer(participant_id);
        let Some((connection, generation)) = begun else {
            debug!("Offer to {} skipped: none possible or one in flight", participant_id);
            return Ok(false);
        };
        let _guard = MakingOfferGuard {
            peers: host.peers(),
            participant_id,
            generation,
        };

        let offer = connection.create_offer().await?;
        if !host.peers().lock().is_current(participant_id, generation) {
            debug!("Peer link {} replaced while creating offer", participant_id);
            return Ok(false);
        }
        if connection.signaling_state() != SignalingState::Stable {
            debug!(
                "Offer to {} abandoned in {:?}",
                participant_id,
                connection.signaling_state()
            );
            return Ok(false);
        }

        connection.set_local_description(offer.clone()).await?;
        if !host.peers().lock().is_current(participant_id, generation) {
            return Ok(false);
        }

        let sent = host.send_signal(OutboundSignal::Offer {
            target_participant_id: participant_id.clone(),
            sdp: offer,
        });
        if sent {
            debug!("📤 Offer sent to {}", participant_id);
        }
        Ok(sent)
    }

    /// Answer an offer from `from`, creating the link on first contact.
    ///
    /// Returns whether an answer was sent; an offer ignored by the impolite
    /// side returns `Ok(false)`.
    pub async fn handle_offer<H>(
        &self,
        host: &H,
        from: &ParticipantId,
        offer: SessionDescription,
    ) -> MeshCallResult<bool>
    where
        H: NegotiationHost + ?Sized,
    {
        host.ensure_peer(from)?;
        let (connection, generation, making_offer) = {
            let peers = host.peers().lock();
            match (peers.connection(from), peers.get(from)) {
                (Some((connection, generation)), Some(link)) => {
                    (connection, generation, link.is_making_offer())
                }
                _ => return Ok(false),
            }
        };

        let collision = making_offer || connection.signaling_state() != SignalingState::Stable;
        if collision {
            let local = host.local_participant_id();
            if !self.is_polite(local.as_ref(), from) {
                debug!("Ignoring colliding offer from {}", from);
                return Ok(false);
            }
            if connection.signaling_state() == SignalingState::HaveLocalOffer {
                debug!("Rolling back local offer to {} for its offer", from);
                connection
                    .set_local_description(SessionDescription::rollback())
                    .await?;
            }
        }

        connection.set_remote_description(offer).await?;
        host.sync_receivers(from);

        let answer = connection.create_answer().await?;
        connection.set_local_description(answer.clone()).await?;
        if !host.peers().lock().is_current(from, generation) {
            debug!("Peer link {} replaced while answering", from);
            return Ok(false);
        }

        let sent = host.send_signal(OutboundSignal::Answer {
            target_participant_id: from.clone(),
            sdp: answer,
        });
        host.peers().lock().mark_negotiated(from);
        debug!("📤 Answer sent to {}", from);
        Ok(sent)
    }

    /// Apply an answer to the pending local offer
    pub async fn handle_answer<H>(
        &self,
        host: &H,
        from: &ParticipantId,
        answer: SessionDescription,
    ) -> MeshCallResult<bool>
    where
        H: NegotiationHost + ?Sized,
    {
        let Some((connection, _)) = host.peers().lock().connection(from) else {
            debug!("Answer from unknown participant {} dropped", from);
            return Ok(false);
        };
        if connection.signaling_state() != SignalingState::HaveLocalOffer {
            debug!(
                "Answer from {} dropped in {:?}",
                from,
                connection.signaling_state()
            );
            return Ok(false);
        }

        connection.set_remote_description(answer).await?;
        host.sync_receivers(from);
        host.peers().lock().mark_negotiated(from);
        Ok(true)
    }

    /// Add a remote ICE candidate; candidates for unknown or unready links are dropped
    pub async fn handle_ice<H>(&self, host: &H, from: &ParticipantId, candidate: IceCandidate) -> bool
    where
        H: NegotiationHost + ?Sized,
    {
        let Some((connection, _)) = host.peers().lock().connection(from) else {
            debug!("ICE candidate from unknown participant {} dropped", from);
            return false;
        };
        match connection.add_ice_candidate(candidate).await {
            Ok(()) => true,
            Err(e) => {
                warn!("ICE candidate from {} rejected: {}", from, e);
                false
            }
        }
    }

    /// Renegotiate on the transport's request, once the first exchange is done
    pub async fn handle_negotiation_needed<H>(
        &self,
        host: &H,
        participant_id: &ParticipantId,
    ) -> MeshCallResult<bool>
    where
        H: NegotiationHost + ?Sized,
    {
        let negotiated = host
            .peers()
            .lock()
            .get(participant_id)
            .is_some_and(|link| link.is_negotiated());
        if !negotiated {
            debug!("Negotiation-needed from {} before first exchange ignored", participant_id);
            return Ok(false);
        }
        self.safe_make_offer(host, participant_id).await
    }
}
