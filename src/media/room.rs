//! In-memory room and peer structures.
//!
//! Rooms key peers by user id; peers never hold a pointer back to their
//! room. Back-references from media objects to their owner travel in
//! producer `app_data`.

use std::collections::HashMap;

use mediasoup::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Media origin tag carried on every producer.
///
/// Mute and deafen flags gate mic producers only; pausing screen or camera
/// producers would freeze remote video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerSource {
    Mic,
    Screen,
    Camera,
}

impl ProducerSource {
    /// Default source when the client omits one.
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => ProducerSource::Mic,
            MediaKind::Video => ProducerSource::Camera,
        }
    }
}

/// Owner back-reference stored in producer `app_data`.
#[derive(Debug, Clone)]
pub struct ProducerAppData {
    pub user_id: Uuid,
    pub source: ProducerSource,
}

/// One user's participation in a voice room.
pub struct Peer {
    pub user_id: Uuid,
    pub transports: HashMap<TransportId, WebRtcTransport>,
    pub producers: HashMap<ProducerId, Producer>,
    pub consumers: HashMap<ConsumerId, Consumer>,
    pub muted: bool,
    pub deafened: bool,
}

impl Peer {
    pub fn new(user_id: Uuid) -> Self {
        Peer {
            user_id,
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
            muted: false,
            deafened: false,
        }
    }

    /// Whether mic producers should currently be paused.
    pub fn mic_paused(&self) -> bool {
        self.muted || self.deafened
    }

    pub fn source_of(&self, producer_id: &ProducerId) -> Option<ProducerSource> {
        self.producers
            .get(producer_id)
            .and_then(|p| p.app_data().downcast_ref::<ProducerAppData>())
            .map(|data| data.source)
    }
}

/// Per-voice-channel room: a router plus the peers connected to it.
/// Exists iff at least one peer is present; dropping it closes the router
/// and everything routed through it.
pub struct Room {
    pub router: Router,
    pub peers: HashMap<Uuid, Peer>,
}

impl Room {
    pub fn new(router: Router) -> Self {
        Room {
            router,
            peers: HashMap::new(),
        }
    }
}
