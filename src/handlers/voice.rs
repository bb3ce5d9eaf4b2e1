//! Voice signaling handlers.
//!
//! These wrap the room coordinator: membership checks and channel lookups
//! happen here, the SFU objects live in [`crate::media`]. Fan-out happens
//! only after the SFU confirms the corresponding object exists.

use std::sync::Arc;

use mediasoup::prelude::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters, TransportId,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::parse_payload;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::media::{ProducerInfo, ProducerSource};
use crate::models::{ChannelType, User};
use crate::state::AppState;
use crate::ws::events::{
    EVENT_CONSUMED, EVENT_NEW_PRODUCER, EVENT_PRODUCED, EVENT_PRODUCER_CLOSED,
    EVENT_USER_JOINED_VOICE, EVENT_USER_LEFT_VOICE, EVENT_VOICE_CHANNEL_JOINED,
    EVENT_VOICE_PARTICIPANTS_LIST, EVENT_VOICE_STATE_UPDATED, EVENT_WEBRTC_TRANSPORT_CONNECTED,
    EVENT_WEBRTC_TRANSPORT_CREATED,
};
use crate::ws::{broadcast_event, reply, send_event_to_user, SessionHandle};

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinVoiceRequest {
    pub channel_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveVoiceRequest {
    pub channel_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub direction: TransportDirection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: DtlsParameters,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub source: Option<ProducerSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerRequest {
    pub producer_id: ProducerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeRequest {
    pub transport_id: TransportId,
    pub producer_id: ProducerId,
    pub rtp_capabilities: RtpCapabilities,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerRequest {
    pub consumer_id: ConsumerId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateRequest {
    pub muted: bool,
    pub deafened: bool,
}

// ============================================================================
// Handlers
// ============================================================================

/// `join_voice_channel` — materializes the room on first join. A user
/// already in another voice channel is moved, with a departure announced
/// to the old room.
pub async fn join(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: JoinVoiceRequest = parse_payload(payload)?;
    let channel = db::channels::get(&state.pool, req.channel_id).await?;
    if channel.channel_type != ChannelType::Voice {
        return Err(AppError::Validation("Not a voice channel".into()));
    }

    if let Some((old_channel, closed)) = state.rooms.leave_everywhere(caller.id).await {
        announce_departure(state, old_channel, caller.id, closed).await;
    }

    let info = state.rooms.join(channel.id, caller.id).await?;

    reply(
        session,
        EVENT_VOICE_CHANNEL_JOINED,
        json!({
            "channelId": channel.id,
            "routerRtpCapabilities": info.router_rtp_capabilities,
            "producers": info.producers,
            "participants": info.participants,
        }),
    );

    broadcast_event(
        state,
        EVENT_USER_JOINED_VOICE,
        json!({ "channelId": channel.id, "userId": caller.id, "muted": false, "deafened": false }),
    )
    .await;
    broadcast_participants(state, channel.id).await;
    Ok(())
}

/// `leave_voice_channel` — the channel id is optional; without it the
/// user's current room is used.
pub async fn leave(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: LeaveVoiceRequest = parse_payload(payload)?;
    let channel_id = match req.channel_id {
        Some(id) => id,
        None => state
            .rooms
            .channel_of(caller.id)
            .await
            .ok_or_else(|| AppError::NotFound("Not in a voice channel".into()))?,
    };

    let closed = state.rooms.leave(channel_id, caller.id).await?;
    announce_departure(state, channel_id, caller.id, closed).await;
    Ok(())
}

/// `create_webrtc_transport{direction}` — direction only matters to the
/// client; both directions get identical transport options.
pub async fn create_transport(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: CreateTransportRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    let info = state.rooms.create_transport(channel_id, caller.id).await?;
    reply(
        session,
        EVENT_WEBRTC_TRANSPORT_CREATED,
        json!({
            "direction": match req.direction {
                TransportDirection::Send => "send",
                TransportDirection::Recv => "recv",
            },
            "id": info.id,
            "iceParameters": info.ice_parameters,
            "iceCandidates": info.ice_candidates,
            "dtlsParameters": info.dtls_parameters,
        }),
    );
    Ok(())
}

pub async fn connect_transport(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ConnectTransportRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    state
        .rooms
        .connect_transport(channel_id, caller.id, req.transport_id, req.dtls_parameters)
        .await?;

    reply(
        session,
        EVENT_WEBRTC_TRANSPORT_CONNECTED,
        json!({ "transportId": req.transport_id }),
    );
    Ok(())
}

/// `produce` — source defaults by kind (audio→mic, video→camera). The
/// `new_producer` fan-out reaches every peer in the room except the
/// origin, and only after the SFU confirms the producer.
pub async fn produce(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ProduceRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;
    let source = req
        .source
        .unwrap_or_else(|| ProducerSource::default_for(req.kind));

    let info = state
        .rooms
        .produce(
            channel_id,
            caller.id,
            req.transport_id,
            req.kind,
            req.rtp_parameters,
            source,
        )
        .await?;

    reply(
        session,
        EVENT_PRODUCED,
        json!({ "producerId": info.producer_id, "kind": info.kind, "source": info.source }),
    );

    fan_out_to_room_peers(
        state,
        channel_id,
        Some(caller.id),
        EVENT_NEW_PRODUCER,
        json!({
            "channelId": channel_id,
            "producerId": info.producer_id,
            "userId": info.user_id,
            "kind": info.kind,
            "source": info.source,
        }),
    )
    .await;
    Ok(())
}

pub async fn close_producer(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: CloseProducerRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    let info = state
        .rooms
        .close_producer(channel_id, caller.id, req.producer_id)
        .await?;

    broadcast_event(
        state,
        EVENT_PRODUCER_CLOSED,
        json!({
            "channelId": channel_id,
            "producerId": info.producer_id,
            "userId": info.user_id,
            "source": info.source,
        }),
    )
    .await;
    Ok(())
}

/// `consume` — gated by the router capability check; the consumer starts
/// paused and stays paused until `resume_consumer`.
pub async fn consume(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ConsumeRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    let info = state
        .rooms
        .consume(
            channel_id,
            caller.id,
            req.transport_id,
            req.producer_id,
            req.rtp_capabilities,
        )
        .await?;

    reply(session, EVENT_CONSUMED, info);
    Ok(())
}

pub async fn resume_consumer(
    state: &AppState,
    _session: &Arc<SessionHandle>,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: ResumeConsumerRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    state
        .rooms
        .resume_consumer(channel_id, caller.id, req.consumer_id)
        .await?;
    Ok(())
}

/// `get_producers` — replays the room's current producers to the caller
/// as individual `new_producer` events.
pub async fn get_producers(
    state: &AppState,
    session: &Arc<SessionHandle>,
    caller: &User,
    _payload: serde_json::Value,
) -> AppResult<()> {
    let channel_id = current_channel(state, caller.id).await?;
    let producers = state
        .rooms
        .producers_for(channel_id, Some(caller.id))
        .await?;

    for info in producers {
        reply(
            session,
            EVENT_NEW_PRODUCER,
            json!({
                "channelId": channel_id,
                "producerId": info.producer_id,
                "userId": info.user_id,
                "kind": info.kind,
                "source": info.source,
            }),
        );
    }
    Ok(())
}

/// `voice_state_update` — adjusts the peer flags, pauses or resumes mic
/// producers accordingly, and announces the new state to everyone.
pub async fn voice_state_update(
    state: &AppState,
    caller: &User,
    payload: serde_json::Value,
) -> AppResult<()> {
    let req: VoiceStateRequest = parse_payload(payload)?;
    let channel_id = current_channel(state, caller.id).await?;

    state
        .rooms
        .set_voice_state(channel_id, caller.id, req.muted, req.deafened)
        .await?;

    broadcast_event(
        state,
        EVENT_VOICE_STATE_UPDATED,
        json!({
            "channelId": channel_id,
            "userId": caller.id,
            "muted": req.muted,
            "deafened": req.deafened,
        }),
    )
    .await;
    Ok(())
}

// ============================================================================
// Shared fan-out
// ============================================================================

/// Announce a peer's departure: `producer_closed` for each of its
/// producers, then `user_left_voice` and a participants refresh. Also used
/// by session cleanup and channel deletion paths.
pub async fn announce_departure(
    state: &AppState,
    channel_id: Uuid,
    user_id: Uuid,
    closed: Vec<ProducerInfo>,
) {
    for info in closed {
        broadcast_event(
            state,
            EVENT_PRODUCER_CLOSED,
            json!({
                "channelId": channel_id,
                "producerId": info.producer_id,
                "userId": info.user_id,
                "source": info.source,
            }),
        )
        .await;
    }

    broadcast_event(
        state,
        EVENT_USER_LEFT_VOICE,
        json!({ "channelId": channel_id, "userId": user_id }),
    )
    .await;
    broadcast_participants(state, channel_id).await;
}

async fn broadcast_participants(state: &AppState, channel_id: Uuid) {
    let participants = state.rooms.participants_in(channel_id).await;
    broadcast_event(
        state,
        EVENT_VOICE_PARTICIPANTS_LIST,
        json!({ "channelId": channel_id, "participants": participants }),
    )
    .await;
}

/// Targeted fan-out to the sessions of every peer in a room, optionally
/// excluding one user.
async fn fan_out_to_room_peers(
    state: &AppState,
    channel_id: Uuid,
    except: Option<Uuid>,
    event_type: &str,
    payload: serde_json::Value,
) {
    let participants = state.rooms.participants_in(channel_id).await;
    for participant in participants {
        if Some(participant.user_id) == except {
            continue;
        }
        send_event_to_user(state, participant.user_id, event_type, payload.clone()).await;
    }
}

async fn current_channel(state: &AppState, user_id: Uuid) -> AppResult<Uuid> {
    state
        .rooms
        .channel_of(user_id)
        .await
        .ok_or_else(|| AppError::NotFound("Not in a voice channel".into()))
}
