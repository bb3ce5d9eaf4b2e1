//! Voice room coordinator.
//!
//! Owns the `channel id → room` map. Rooms are materialized on first join
//! and destroyed when the last peer leaves or the channel is deleted. All
//! mutations go through one `RwLock`; callers receive plain data snapshots
//! so no lock is held across fan-out IO.

pub mod engine;
pub mod room;

pub use engine::MediaEngine;
pub use room::{Peer, ProducerAppData, ProducerSource, Room};

use std::collections::HashMap;

use mediasoup::prelude::*;
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Producer summary handed to clients for `new_producer` and
/// `get_producers`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub producer_id: ProducerId,
    pub user_id: Uuid,
    pub kind: MediaKind,
    pub source: ProducerSource,
}

/// Reply data for `create_webrtc_transport`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportInfo {
    pub id: TransportId,
    pub ice_parameters: IceParameters,
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

/// Reply data for `consume`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub producer_user_id: Option<Uuid>,
    pub source: Option<ProducerSource>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceParticipant {
    pub user_id: Uuid,
    pub muted: bool,
    pub deafened: bool,
}

/// Reply data for `join_voice_channel`.
pub struct JoinInfo {
    pub router_rtp_capabilities: RtpCapabilitiesFinalized,
    pub producers: Vec<ProducerInfo>,
    pub participants: Vec<VoiceParticipant>,
}

pub struct VoiceRooms {
    engine: MediaEngine,
    rooms: RwLock<HashMap<Uuid, Room>>,
}

impl VoiceRooms {
    pub fn new(engine: MediaEngine) -> Self {
        VoiceRooms {
            engine,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Add a peer to a channel's room, creating the room on first join.
    /// The caller must have removed the user from any other room first.
    pub async fn join(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<JoinInfo> {
        let mut rooms = self.rooms.write().await;

        if !rooms.contains_key(&channel_id) {
            let router = self.engine.create_router().await?;
            rooms.insert(channel_id, Room::new(router));
        }
        let room = rooms.get_mut(&channel_id).expect("room just ensured");

        if room.peers.contains_key(&user_id) {
            return Err(AppError::Conflict("Already in this voice channel".into()));
        }
        room.peers.insert(user_id, Peer::new(user_id));

        Ok(JoinInfo {
            router_rtp_capabilities: room.router.rtp_capabilities().clone(),
            producers: producers_in_room(room, Some(user_id)),
            participants: participants_in_room(room),
        })
    }

    /// Remove a peer, destroying the room when it empties. Returns the
    /// peer's producers so the caller can fan out `producer_closed`.
    pub async fn leave(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<Vec<ProducerInfo>> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&channel_id)
            .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?;

        let peer = room
            .peers
            .remove(&user_id)
            .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))?;

        let closed = peer_producer_infos(&peer);
        // Dropping the peer closes its transports, producers, and
        // consumers; the SFU propagates producer closes to consumers on
        // other peers.
        drop(peer);

        if room.peers.is_empty() {
            rooms.remove(&channel_id);
        }
        Ok(closed)
    }

    /// Disconnect cleanup: remove the user from whichever room holds it.
    pub async fn leave_everywhere(&self, user_id: Uuid) -> Option<(Uuid, Vec<ProducerInfo>)> {
        let channel_id = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .find(|(_, room)| room.peers.contains_key(&user_id))
                .map(|(id, _)| *id)
        }?;

        match self.leave(channel_id, user_id).await {
            Ok(closed) => Some((channel_id, closed)),
            Err(_) => None,
        }
    }

    /// Tear down a channel's room regardless of peers (channel delete).
    /// Returns the user ids that were inside.
    pub async fn destroy_channel(&self, channel_id: Uuid) -> Vec<Uuid> {
        let mut rooms = self.rooms.write().await;
        match rooms.remove(&channel_id) {
            Some(room) => room.peers.keys().copied().collect(),
            None => Vec::new(),
        }
    }

    /// Channel the user is currently in, if any.
    pub async fn channel_of(&self, user_id: Uuid) -> Option<Uuid> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .find(|(_, room)| room.peers.contains_key(&user_id))
            .map(|(id, _)| *id)
    }

    pub async fn create_transport(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<TransportInfo> {
        let mut rooms = self.rooms.write().await;
        let room = rooms
            .get_mut(&channel_id)
            .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?;

        let transport = self.engine.create_webrtc_transport(&room.router).await?;
        let info = TransportInfo {
            id: transport.id(),
            ice_parameters: transport.ice_parameters().clone(),
            ice_candidates: transport.ice_candidates().clone(),
            dtls_parameters: transport.dtls_parameters(),
        };

        let peer = room
            .peers
            .get_mut(&user_id)
            .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))?;
        peer.transports.insert(transport.id(), transport);
        Ok(info)
    }

    pub async fn connect_transport(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    ) -> AppResult<()> {
        let transport = {
            let rooms = self.rooms.read().await;
            let peer = peer_in(&rooms, channel_id, user_id)?;
            peer.transports
                .get(&transport_id)
                .ok_or_else(|| AppError::NotFound("Transport not found".into()))?
                .clone()
        };

        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| {
                tracing::error!(transport_id = %transport_id, error = ?e, "Failed to connect transport");
                AppError::Internal
            })
    }

    /// Create a producer on one of the peer's transports.
    ///
    /// Mic producers start paused when the peer is muted or deafened;
    /// screen and camera producers are never paused by voice flags.
    pub async fn produce(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        source: ProducerSource,
    ) -> AppResult<ProducerInfo> {
        let (transport, mic_paused) = {
            let rooms = self.rooms.read().await;
            let peer = peer_in(&rooms, channel_id, user_id)?;
            let transport = peer
                .transports
                .get(&transport_id)
                .ok_or_else(|| AppError::NotFound("Transport not found".into()))?
                .clone();
            (transport, peer.mic_paused())
        };

        let mut options = ProducerOptions::new(kind, rtp_parameters);
        options.app_data = AppData::new(ProducerAppData { user_id, source });

        let producer = transport.produce(options).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = ?e, "Failed to create producer");
            AppError::Internal
        })?;

        if source == ProducerSource::Mic && mic_paused {
            if let Err(e) = producer.pause().await {
                tracing::warn!(producer_id = %producer.id(), error = ?e, "Failed to pause new mic producer");
            }
        }

        let info = ProducerInfo {
            producer_id: producer.id(),
            user_id,
            kind,
            source,
        };

        let mut rooms = self.rooms.write().await;
        let peer = peer_in_mut(&mut rooms, channel_id, user_id)?;
        peer.producers.insert(producer.id(), producer);
        Ok(info)
    }

    /// Drop a producer; the SFU closes it and its remote consumers.
    pub async fn close_producer(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        producer_id: ProducerId,
    ) -> AppResult<ProducerInfo> {
        let mut rooms = self.rooms.write().await;
        let peer = peer_in_mut(&mut rooms, channel_id, user_id)?;

        let source = peer
            .source_of(&producer_id)
            .unwrap_or(ProducerSource::Camera);
        let producer = peer
            .producers
            .remove(&producer_id)
            .ok_or_else(|| AppError::NotFound("Producer not found".into()))?;

        let info = ProducerInfo {
            producer_id,
            user_id,
            kind: producer.kind(),
            source,
        };
        drop(producer);
        Ok(info)
    }

    /// Create a paused consumer, gated by the router capability check.
    pub async fn consume(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        transport_id: TransportId,
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    ) -> AppResult<ConsumerInfo> {
        let (transport, router, owner) = {
            let rooms = self.rooms.read().await;
            let room = rooms
                .get(&channel_id)
                .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?;
            let peer = room
                .peers
                .get(&user_id)
                .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))?;
            let transport = peer
                .transports
                .get(&transport_id)
                .ok_or_else(|| AppError::NotFound("Transport not found".into()))?
                .clone();

            let owner = room.peers.values().find_map(|p| {
                p.producers
                    .contains_key(&producer_id)
                    .then(|| (p.user_id, p.source_of(&producer_id)))
            });

            (transport, room.router.clone(), owner)
        };

        if !router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(AppError::Validation(
                "Client cannot consume this producer".into(),
            ));
        }

        let mut options = ConsumerOptions::new(producer_id, rtp_capabilities);
        options.paused = true;

        let consumer = transport.consume(options).await.map_err(|e| {
            tracing::error!(user_id = %user_id, error = ?e, "Failed to create consumer");
            AppError::Internal
        })?;

        let info = ConsumerInfo {
            id: consumer.id(),
            producer_id,
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters().clone(),
            producer_user_id: owner.as_ref().map(|(id, _)| *id),
            source: owner.and_then(|(_, source)| source),
        };

        let mut rooms = self.rooms.write().await;
        let peer = peer_in_mut(&mut rooms, channel_id, user_id)?;
        peer.consumers.insert(consumer.id(), consumer);
        Ok(info)
    }

    /// Resume a consumer that was created paused.
    pub async fn resume_consumer(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        consumer_id: ConsumerId,
    ) -> AppResult<()> {
        let consumer = {
            let rooms = self.rooms.read().await;
            let peer = peer_in(&rooms, channel_id, user_id)?;
            peer.consumers
                .get(&consumer_id)
                .ok_or_else(|| AppError::NotFound("Consumer not found".into()))?
                .clone()
        };

        consumer.resume().await.map_err(|e| {
            tracing::error!(consumer_id = %consumer_id, error = ?e, "Failed to resume consumer");
            AppError::Internal
        })
    }

    /// Update a peer's voice flags and apply the mic pause policy.
    pub async fn set_voice_state(
        &self,
        channel_id: Uuid,
        user_id: Uuid,
        muted: bool,
        deafened: bool,
    ) -> AppResult<()> {
        let mic_producers = {
            let mut rooms = self.rooms.write().await;
            let peer = peer_in_mut(&mut rooms, channel_id, user_id)?;
            peer.muted = muted;
            peer.deafened = deafened;

            peer.producers
                .iter()
                .filter(|(id, _)| peer.source_of(id) == Some(ProducerSource::Mic))
                .map(|(_, p)| p.clone())
                .collect::<Vec<_>>()
        };

        let pause = muted || deafened;
        for producer in mic_producers {
            let result = if pause {
                producer.pause().await
            } else {
                producer.resume().await
            };
            if let Err(e) = result {
                tracing::warn!(
                    producer_id = %producer.id(),
                    error = ?e,
                    "Failed to apply mic pause state"
                );
            }
        }
        Ok(())
    }

    /// Producers visible to a joining or refreshing peer.
    pub async fn producers_for(
        &self,
        channel_id: Uuid,
        except_user: Option<Uuid>,
    ) -> AppResult<Vec<ProducerInfo>> {
        let rooms = self.rooms.read().await;
        let room = rooms
            .get(&channel_id)
            .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?;
        Ok(producers_in_room(room, except_user))
    }

    /// Participant lists for every live room, keyed by channel id.
    pub async fn participants_snapshot(&self) -> HashMap<Uuid, Vec<VoiceParticipant>> {
        let rooms = self.rooms.read().await;
        rooms
            .iter()
            .map(|(channel_id, room)| (*channel_id, participants_in_room(room)))
            .collect()
    }

    pub async fn participants_in(&self, channel_id: Uuid) -> Vec<VoiceParticipant> {
        let rooms = self.rooms.read().await;
        rooms
            .get(&channel_id)
            .map(participants_in_room)
            .unwrap_or_default()
    }
}

fn peer_in<'a>(
    rooms: &'a HashMap<Uuid, Room>,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<&'a Peer> {
    rooms
        .get(&channel_id)
        .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?
        .peers
        .get(&user_id)
        .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))
}

fn peer_in_mut<'a>(
    rooms: &'a mut HashMap<Uuid, Room>,
    channel_id: Uuid,
    user_id: Uuid,
) -> AppResult<&'a mut Peer> {
    rooms
        .get_mut(&channel_id)
        .ok_or_else(|| AppError::NotFound("Voice room not found".into()))?
        .peers
        .get_mut(&user_id)
        .ok_or_else(|| AppError::NotFound("Not in this voice channel".into()))
}

fn peer_producer_infos(peer: &Peer) -> Vec<ProducerInfo> {
    peer.producers
        .iter()
        .map(|(id, producer)| ProducerInfo {
            producer_id: *id,
            user_id: peer.user_id,
            kind: producer.kind(),
            source: peer.source_of(id).unwrap_or(ProducerSource::Camera),
        })
        .collect()
}

fn producers_in_room(room: &Room, except_user: Option<Uuid>) -> Vec<ProducerInfo> {
    room.peers
        .values()
        .filter(|peer| Some(peer.user_id) != except_user)
        .flat_map(peer_producer_infos)
        .collect()
}

fn participants_in_room(room: &Room) -> Vec<VoiceParticipant> {
    room.peers
        .values()
        .map(|peer| VoiceParticipant {
            user_id: peer.user_id,
            muted: peer.muted,
            deafened: peer.deafened,
        })
        .collect()
}
