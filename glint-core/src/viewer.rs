//! Viewer-side session: connects and authenticates to a host, receives
//! and decodes the media stream, paces playback, forwards local input,
//! and reports measured network conditions.
//!
//! The receive path never blocks on the display: decoded frames go
//! through a bounded oldest-drop queue into a pacing task that owns the
//! playback synchronizer. When the transport drops, the viewer retries
//! the handshake with exponential backoff — presenting its session id
//! and last profile as a resume hint — up to the configured attempt
//! bound, then closes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use crate::capture::SourceId;
use crate::channel::ChannelId;
use crate::config::{EngineConfig, PlaybackConfig};
use crate::crypto::{CredentialProver, KeyExchange, Role};
use crate::encode::decoder::FrameDecoder;
use crate::error::GlintError;
use crate::packet::WirePacket;
use crate::pipeline::HandoffQueue;
use crate::playback::{PlaybackFrame, PlaybackSynchronizer};
use crate::protocol::control::{ControlMessage, DisconnectReason};
use crate::protocol::handshake::{
    Capabilities, Connect, HandshakeMessage, Response, ResumeHint,
};
use crate::protocol::input::{InputAction, InputEvent};
use crate::session::quality::ProfileHandle;
use crate::session::{CloseReason, SessionClock, SessionId, SessionMetrics, SessionPhase};
use crate::transport::link::Link;
use crate::transport::mux::{ChannelMux, InboundFrame, next_handshake};

// ── Dialer ───────────────────────────────────────────────────────

/// Opens transport links to the host. The viewer calls this once at
/// connect and again for every reconnection attempt.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Link, GlintError>;
}

/// TCP dialer for production use.
pub struct TcpDialer {
    addr: String,
}

impl TcpDialer {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self) -> Result<Link, GlintError> {
        Link::connect(&self.addr).await
    }
}

// ── ViewerSession ────────────────────────────────────────────────

/// One connected viewer session.
pub struct ViewerSession {
    dialer: Arc<dyn Dialer>,
    link: Link,
    mux: ChannelMux,
    session_id: SessionId,
    profile: ProfileHandle,
    phase: SessionPhase,
    clock: SessionClock,
    cfg: EngineConfig,
    prover: Arc<dyn CredentialProver>,
    source: SourceId,
    metrics: Arc<SessionMetrics>,
    shutdown: Arc<Notify>,
    frames_tx: mpsc::Sender<PlaybackFrame>,
    frames_rx: Option<mpsc::Receiver<PlaybackFrame>>,
    input_tx: mpsc::Sender<InputAction>,
    input_rx: mpsc::Receiver<InputAction>,
    switch_tx: mpsc::Sender<SourceId>,
    switch_rx: mpsc::Receiver<SourceId>,
}

impl ViewerSession {
    /// Dial the host and perform the handshake.
    pub async fn connect(
        dialer: Arc<dyn Dialer>,
        source: SourceId,
        prover: Arc<dyn CredentialProver>,
        cfg: EngineConfig,
    ) -> Result<Self, GlintError> {
        let mut link = dialer.dial().await?;
        let mut mux = ChannelMux::new(link.sender(), &cfg);

        let accept = handshake(&mut link, &mut mux, source, prover.as_ref(), &cfg, None).await?;
        let mut phase = SessionPhase::Handshaking;
        phase.activate()?;
        info!(session_id = accept.session_id, source = %accept.source, "connected");

        let (frames_tx, frames_rx) = mpsc::channel(8);
        let (input_tx, input_rx) = mpsc::channel(64);
        let (switch_tx, switch_rx) = mpsc::channel(4);

        Ok(Self {
            dialer,
            link,
            mux,
            session_id: accept.session_id,
            profile: ProfileHandle::new(accept.profile),
            phase,
            clock: SessionClock::start(),
            cfg,
            prover,
            source: accept.source,
            metrics: SessionMetrics::shared(),
            shutdown: Arc::new(Notify::new()),
            frames_tx,
            frames_rx: Some(frames_rx),
            input_tx,
            input_rx,
            switch_tx,
            switch_rx,
        })
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn metrics(&self) -> Arc<SessionMetrics> {
        self.metrics.clone()
    }

    pub fn profile(&self) -> ProfileHandle {
        self.profile.clone()
    }

    /// The decoded, display-paced frame stream. Takable once.
    pub fn frames(&mut self) -> Option<mpsc::Receiver<PlaybackFrame>> {
        self.frames_rx.take()
    }

    /// Feed locally captured input here; the session stamps and
    /// forwards it on the reliable Input channel.
    pub fn input_sender(&self) -> mpsc::Sender<InputAction> {
        self.input_tx.clone()
    }

    /// Request a switch of the host's active capture source
    /// (multi-monitor navigation, device hot-swap).
    pub fn switch_sender(&self) -> mpsc::Sender<SourceId> {
        self.switch_tx.clone()
    }

    /// Handle for an explicit disconnect request.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Drive the session to its terminal phase.
    pub async fn run(mut self) -> Result<SessionPhase, GlintError> {
        let _input_keepalive = self.input_tx.clone();
        let _switch_keepalive = self.switch_tx.clone();

        // ── Playback stage ───────────────────────────────────────
        let decoded: HandoffQueue<PlaybackFrame> = HandoffQueue::new(self.cfg.queue_depth);
        let pacing_handle = tokio::spawn(pacing_loop(
            decoded.clone(),
            self.profile.clone(),
            self.cfg.playback.clone(),
            self.frames_tx.clone(),
            self.metrics.clone(),
        ));

        // ── Session loop ─────────────────────────────────────────
        // Decoders per media channel: [Video, Device].
        let mut decoders = [FrameDecoder::new(), FrameDecoder::new()];
        let mut heartbeat = tokio::time::interval(self.cfg.heartbeat.interval());
        let mut housekeeping = tokio::time::interval(Duration::from_millis(50));
        let mut report = tokio::time::interval(Duration::from_secs(1));
        let mut last_inbound = Instant::now();
        let mut last_stats = (0u64, 0u64); // (delivered, lost)
        let mut delay_us = 0u64;

        enum Ev {
            Packet(Option<WirePacket>),
            Input(Option<InputAction>),
            Switch(Option<SourceId>),
            Heartbeat,
            Housekeeping,
            Report,
            Shutdown,
        }

        let terminal = loop {
            let shutdown = self.shutdown.clone();
            let ev = tokio::select! {
                p = self.link.recv() => Ev::Packet(p),
                i = self.input_rx.recv() => Ev::Input(i),
                s = self.switch_rx.recv() => Ev::Switch(s),
                _ = heartbeat.tick() => Ev::Heartbeat,
                _ = housekeeping.tick() => Ev::Housekeeping,
                _ = report.tick() => Ev::Report,
                _ = shutdown.notified() => Ev::Shutdown,
            };

            // A `Some` here means the transport died and we should try
            // to resume; `None` falls through to the next event.
            let mut lost: Option<GlintError> = None;

            match ev {
                Ev::Packet(Some(packet)) => {
                    last_inbound = Instant::now();
                    match self.mux.accept(packet, last_inbound).await {
                        Ok(frames) => {
                            for frame in frames {
                                match self
                                    .handle_inbound(frame, &mut decoders, &decoded, &mut delay_us)
                                    .await?
                                {
                                    InboundDisposition::Continue => {}
                                    InboundDisposition::Closed(reason) => {
                                        self.phase.close(reason)?;
                                        break;
                                    }
                                }
                            }
                            if self.phase.is_terminal() {
                                break self.phase.clone();
                            }
                        }
                        Err(GlintError::AuthenticationFailure) => {
                            let _ = self
                                .mux
                                .send_control(&ControlMessage::Disconnect {
                                    reason: DisconnectReason::TamperDetected,
                                })
                                .await;
                            self.phase.close(CloseReason::TamperThreshold)?;
                            break self.phase.clone();
                        }
                        Err(GlintError::Encoding(e)) => {
                            warn!(error = %e, "undecodable payload, skipping");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ev::Packet(None) => lost = Some(GlintError::TransportDisconnect),
                Ev::Input(Some(action)) => {
                    let event = InputEvent::new(action, self.clock.now_us(), self.session_id);
                    if let Err(e) = self.mux.send_input(&event).await {
                        lost = Some(e);
                    }
                }
                Ev::Input(None) => {}
                Ev::Switch(Some(source)) => {
                    let msg = ControlMessage::SwitchSource { source };
                    if let Err(e) = self.mux.send_control(&msg).await {
                        lost = Some(e);
                    }
                }
                Ev::Switch(None) => {}
                Ev::Heartbeat => {
                    let msg = ControlMessage::Heartbeat {
                        timestamp_us: self.clock.now_us(),
                    };
                    if let Err(e) = self.mux.send_control(&msg).await {
                        lost = Some(e);
                    }
                }
                Ev::Housekeeping => {
                    let now = Instant::now();
                    if let Err(e) = self.mux.poll_retransmit(now).await {
                        lost = Some(e);
                    } else if now.duration_since(last_inbound) > self.cfg.heartbeat.deadline() {
                        debug!("heartbeat deadline missed");
                        lost = Some(GlintError::TransportDisconnect);
                    }
                }
                Ev::Report => {
                    let (delivered, dropped_seqs, _) = self.mux.video_stats();
                    let d_delivered = delivered - last_stats.0;
                    let d_lost = dropped_seqs - last_stats.1;
                    last_stats = (delivered, dropped_seqs);

                    let total = d_delivered + d_lost;
                    let loss_permille = if total == 0 {
                        0
                    } else {
                        (d_lost * 1000 / total) as u32
                    };
                    SessionMetrics::set(&self.metrics.loss_permille, loss_permille as u64);
                    if let Some(rtt) = self.mux.input_rtt() {
                        SessionMetrics::set(&self.metrics.input_rtt_us, rtt.as_micros() as u64);
                    }

                    let msg = ControlMessage::CongestionReport {
                        loss_permille,
                        delay_us,
                    };
                    if let Err(e) = self.mux.send_control(&msg).await {
                        lost = Some(e);
                    }
                }
                Ev::Shutdown => {
                    let _ = self
                        .mux
                        .send_control(&ControlMessage::Disconnect {
                            reason: DisconnectReason::Normal,
                        })
                        .await;
                    self.phase.close(CloseReason::Local)?;
                    break self.phase.clone();
                }
            }

            if let Some(cause) = lost {
                debug!(error = %cause, "transport lost, reconnecting");
                match self.reconnect().await? {
                    Some((new_link, new_mux)) => {
                        self.link = new_link;
                        self.mux = new_mux;
                        decoders = [FrameDecoder::new(), FrameDecoder::new()];
                        last_inbound = Instant::now();
                        last_stats = (0, 0);
                    }
                    None => break self.phase.clone(),
                }
            }
        };

        decoded.close();
        pacing_handle.abort();
        info!(session_id = self.session_id, phase = %terminal, "viewer session ended");
        Ok(terminal)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn handle_inbound(
        &mut self,
        frame: InboundFrame,
        decoders: &mut [FrameDecoder; 2],
        decoded: &HandoffQueue<PlaybackFrame>,
        delay_us: &mut u64,
    ) -> Result<InboundDisposition, GlintError> {
        match frame {
            InboundFrame::Video {
                sequence,
                keyframe,
                payload,
            } => {
                self.decode_media(
                    ChannelId::Video,
                    sequence,
                    keyframe,
                    payload,
                    &mut decoders[0],
                    decoded,
                );
            }
            InboundFrame::Device {
                sequence,
                keyframe,
                payload,
            } => {
                self.decode_media(
                    ChannelId::Device,
                    sequence,
                    keyframe,
                    payload,
                    &mut decoders[1],
                    decoded,
                );
            }
            InboundFrame::Control { message, .. } => match message {
                ControlMessage::Heartbeat { timestamp_us } => {
                    self.mux
                        .send_control(&ControlMessage::HeartbeatEcho {
                            origin_timestamp_us: timestamp_us,
                            receiver_timestamp_us: self.clock.now_us(),
                        })
                        .await?;
                }
                ControlMessage::HeartbeatEcho {
                    origin_timestamp_us,
                    ..
                } => {
                    let rtt = self.clock.now_us().saturating_sub(origin_timestamp_us);
                    *delay_us = rtt / 2;
                    SessionMetrics::set(&self.metrics.delay_us, *delay_us);
                }
                ControlMessage::ProfileUpdate { profile } => {
                    debug!(bitrate = profile.bitrate_bps, "profile updated by host");
                    self.profile.store(profile);
                }
                ControlMessage::Disconnect { reason } => {
                    debug!(?reason, "host disconnected");
                    return Ok(InboundDisposition::Closed(CloseReason::Remote));
                }
                ControlMessage::SwitchSource { .. } => {
                    warn!("ignoring SwitchSource sent to viewer");
                }
                ControlMessage::CongestionReport { .. } => {
                    warn!("ignoring CongestionReport sent to viewer");
                }
            },
            InboundFrame::Input { .. } => {
                warn!("ignoring input event sent to viewer");
            }
            InboundFrame::Handshake { .. } => {
                warn!("ignoring handshake frame after establishment");
            }
        }
        Ok(InboundDisposition::Continue)
    }

    fn decode_media(
        &self,
        channel: ChannelId,
        sequence: u32,
        keyframe: bool,
        payload: crate::protocol::video::VideoPayload,
        decoder: &mut FrameDecoder,
        decoded: &HandoffQueue<PlaybackFrame>,
    ) {
        match decoder.decode(&payload, keyframe) {
            Ok(Some(image)) => {
                decoded.push(PlaybackFrame {
                    channel,
                    sequence,
                    frame_number: payload.frame_number,
                    width: payload.width,
                    height: payload.height,
                    keyframe,
                    data: image.to_vec(),
                    received_at: Instant::now(),
                });
            }
            Ok(None) => {
                debug!(sequence, "delta without reference, awaiting keyframe");
            }
            Err(e) => {
                warn!(error = %e, sequence, "frame decode failed");
            }
        }
    }

    /// Redial and re-handshake with backoff, presenting the session id
    /// and current profile as a resume hint. Returns the new transport,
    /// or `None` when the phase went terminal.
    async fn reconnect(&mut self) -> Result<Option<(Link, ChannelMux)>, GlintError> {
        loop {
            let attempt = self.phase.begin_reconnect_attempt()?;
            if attempt > self.cfg.reconnect.max_attempts {
                info!(attempt, "reconnect attempts exhausted");
                self.phase.close(CloseReason::RetriesExhausted)?;
                return Ok(None);
            }
            tokio::time::sleep(self.cfg.reconnect.backoff(attempt)).await;
            debug!(attempt, "reconnecting");

            let mut link = match self.dialer.dial().await {
                Ok(l) => l,
                Err(e) => {
                    debug!(error = %e, attempt, "dial failed");
                    continue;
                }
            };
            let mut mux = ChannelMux::new(link.sender(), &self.cfg);
            let hint = ResumeHint {
                session_id: self.session_id,
                profile: self.profile.load(),
            };

            match handshake(
                &mut link,
                &mut mux,
                self.source,
                self.prover.as_ref(),
                &self.cfg,
                Some(hint),
            )
            .await
            {
                Ok(accept) => {
                    self.profile.store(accept.profile);
                    self.phase.activate()?;
                    info!(session_id = accept.session_id, "session resumed");
                    return Ok(Some((link, mux)));
                }
                Err(GlintError::HandshakeRejected(reason)) => {
                    // A rejection is never auto-retried.
                    self.phase.reject(reason)?;
                    return Ok(None);
                }
                Err(e) => {
                    debug!(error = %e, attempt, "handshake attempt failed");
                    continue;
                }
            }
        }
    }
}

enum InboundDisposition {
    Continue,
    Closed(CloseReason),
}

// ── Handshake (viewer side) ──────────────────────────────────────

async fn handshake(
    link: &mut Link,
    mux: &mut ChannelMux,
    source: SourceId,
    prover: &dyn CredentialProver,
    cfg: &EngineConfig,
    resume: Option<ResumeHint>,
) -> Result<crate::protocol::handshake::Accept, GlintError> {
    let step = cfg.handshake.step_timeout();
    let kx = KeyExchange::generate();

    mux.send_handshake(&HandshakeMessage::Connect(Connect {
        capabilities: Capabilities::default(),
        requested_source: source,
        public_key: kx.public_bytes(),
        resume,
    }))
    .await?;

    let challenge = match next_handshake(link, mux, step).await? {
        HandshakeMessage::Challenge(c) => c,
        HandshakeMessage::Reject { reason } => return Err(GlintError::HandshakeRejected(reason)),
        _ => return Err(GlintError::ProtocolViolation("expected Challenge")),
    };

    mux.install_crypto(kx.derive(&challenge.public_key, &challenge.nonce, Role::Viewer));
    mux.send_handshake(&HandshakeMessage::Response(Response {
        auth_proof: prover.prove(&challenge.nonce),
    }))
    .await?;

    match next_handshake(link, mux, step).await? {
        HandshakeMessage::Accept(a) => Ok(a),
        HandshakeMessage::Reject { reason } => Err(GlintError::HandshakeRejected(reason)),
        _ => Err(GlintError::ProtocolViolation("expected Accept")),
    }
}

// ── Playback pacing task ─────────────────────────────────────────

/// Owns the synchronizer: drains decoded frames, releases them at the
/// profile's frame interval, and pushes them to the embedder. Runs
/// independently of packet reception.
async fn pacing_loop(
    decoded: HandoffQueue<PlaybackFrame>,
    profile: ProfileHandle,
    cfg: PlaybackConfig,
    out: mpsc::Sender<PlaybackFrame>,
    metrics: Arc<SessionMetrics>,
) {
    let mut sync = PlaybackSynchronizer::new(cfg.max_depth, cfg.jitter_delay());
    let mut display_drops = 0u64;

    loop {
        while let Some(frame) = decoded.try_pop() {
            sync.push(frame);
        }

        let interval = profile.load().frame_interval();
        if let Some(frame) = sync.next_frame(Instant::now(), interval) {
            SessionMetrics::bump(&metrics.frames_delivered);
            if out.try_send(frame).is_err() {
                // Display consumer lagging; freshness wins.
                display_drops += 1;
            }
        } else if decoded.is_closed() && decoded.is_empty() && sync.backlog() == 0 {
            break;
        }

        SessionMetrics::set(&metrics.frames_dropped, sync.dropped() + display_drops);
        tokio::time::sleep(Duration::from_millis(4)).await;
    }
}
