//! SFU worker and router factory.
//!
//! One mediasoup worker is created at startup and shared by every room.
//! The hub never touches media packets; it only creates routers,
//! transports, producers, and consumers and wires their lifecycles.

use std::net::IpAddr;
use std::num::{NonZeroU32, NonZeroU8};

use mediasoup::prelude::*;

use crate::config::Config;
use crate::error::{AppError, AppResult};

pub struct MediaEngine {
    /// Keeps worker subprocess management alive for the process lifetime.
    _worker_manager: WorkerManager,
    worker: Worker,
    listen_ip: IpAddr,
    announced_address: Option<String>,
    initial_outgoing_bitrate: u32,
}

impl MediaEngine {
    pub async fn new(config: &Config) -> AppResult<MediaEngine> {
        let worker_manager = WorkerManager::new();

        let mut settings = WorkerSettings::default();
        settings.rtc_ports_range = config.rtc_min_port..=config.rtc_max_port;

        let worker = worker_manager
            .create_worker(settings)
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to create SFU worker");
                AppError::Internal
            })?;

        // A dead worker cannot be recovered in-process; exit so the
        // supervisor restarts the hub with a fresh one.
        worker
            .on_dead(|reason| {
                tracing::error!(reason = ?reason, "SFU worker died; exiting");
                std::process::exit(1);
            })
            .detach();

        Ok(MediaEngine {
            _worker_manager: worker_manager,
            worker,
            listen_ip: config.rtc_listen_ip,
            announced_address: config.announced_address.clone(),
            initial_outgoing_bitrate: config.initial_outgoing_bitrate,
        })
    }

    /// Router for a new voice room, with the hub's fixed codec set.
    pub async fn create_router(&self) -> AppResult<Router> {
        self.worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, "Failed to create router");
                AppError::Internal
            })
    }

    /// WebRTC transport on the given router. Direction does not change the
    /// transport options; it only drives client-side bookkeeping.
    pub async fn create_webrtc_transport(&self, router: &Router) -> AppResult<WebRtcTransport> {
        let listen_info = ListenInfo {
            protocol: Protocol::Udp,
            ip: self.listen_ip,
            announced_address: self.announced_address.clone(),
            expose_internal_ip: false,
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
        };

        let mut options = WebRtcTransportOptions::new(WebRtcTransportListenInfos::new(listen_info));
        options.enable_udp = true;
        options.enable_tcp = true;
        options.prefer_udp = true;
        options.initial_available_outgoing_bitrate = self.initial_outgoing_bitrate;

        router.create_webrtc_transport(options).await.map_err(|e| {
            tracing::error!(error = ?e, "Failed to create WebRTC transport");
            AppError::Internal
        })
    }
}

/// Opus audio plus VP8 video, the baseline every browser speaks.
fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48_000).unwrap(),
            channels: NonZeroU8::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::from([("useinbandfec", 1_u32.into())]),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(90_000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}
