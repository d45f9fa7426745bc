//! Host-side session: accepts a viewer, then drives the
//! capture → encode → send pipeline while handling inbound control and
//! input traffic.
//!
//! Capture runs in its own task, paced by the active quality profile,
//! and hands frames to the session loop through a bounded oldest-drop
//! queue. Encoding and sending stay in the session loop: the encoder
//! state has exactly one owner. The host never redials — when the
//! transport drops, `run` returns with a resume token the embedder can
//! pass to the next `accept` call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, mpsc, watch};
use tracing::{debug, info, warn};

use crate::capture::{CaptureDevice, RawFrame, SourceId, SourceSelector};
use crate::config::EngineConfig;
use crate::crypto::{CredentialVerifier, KeyExchange, challenge_nonce};
use crate::encode::encoder::PipelineEncoder;
use crate::error::GlintError;
use crate::input::{InputInjector, OSInputBackend};
use crate::packet::WirePacket;
use crate::pipeline::HandoffQueue;
use crate::protocol::control::{ControlMessage, DisconnectReason};
use crate::protocol::handshake::{
    Accept, Capabilities, HandshakeMessage, PROTOCOL_VERSION, RejectReason,
};
use crate::protocol::video::VideoPayload;
use crate::session::quality::{ProfileHandle, QualityProfile};
use crate::session::{
    AdaptationAction, CloseReason, CongestionController, CongestionSample, SessionClock,
    SessionId, SessionMetrics, SessionPhase,
};
use crate::transport::link::Link;
use crate::transport::mux::{ChannelMux, InboundFrame};

// ── ResumeToken / HostOutcome ────────────────────────────────────

/// State the embedder keeps to resume a dropped session: the next
/// `accept` call with this token lets the same viewer pick up its
/// session id and quality profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResumeToken {
    pub session_id: SessionId,
    pub profile: QualityProfile,
}

/// How a host session ended.
#[derive(Debug)]
pub struct HostOutcome {
    /// Terminal phase (always `Closed { .. }` for a host).
    pub phase: SessionPhase,
    /// Present when the transport dropped and the session is resumable.
    pub resume: Option<ResumeToken>,
}

// ── HostSession ──────────────────────────────────────────────────

/// One accepted viewer session on the host.
pub struct HostSession {
    link: Link,
    mux: ChannelMux,
    session_id: SessionId,
    profile: ProfileHandle,
    phase: SessionPhase,
    clock: SessionClock,
    cfg: EngineConfig,
    devices: Arc<dyn CaptureDevice>,
    injector: InputInjector,
    metrics: Arc<SessionMetrics>,
    congestion: CongestionController,
    source: SourceId,
    shutdown: Arc<Notify>,
}

impl HostSession {
    /// Perform the host side of the handshake on an established stream.
    ///
    /// `resume` carries the token of a previously dropped session; a
    /// viewer presenting a matching hint keeps its session id and
    /// profile.
    pub async fn accept<S>(
        stream: S,
        devices: Arc<dyn CaptureDevice>,
        input_backend: Arc<dyn OSInputBackend>,
        verifier: Arc<dyn CredentialVerifier>,
        cfg: EngineConfig,
        resume: Option<ResumeToken>,
    ) -> Result<HostSession, GlintError>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let mut link = Link::new(stream);
        let mut mux = ChannelMux::new(link.sender(), &cfg);
        let step = cfg.handshake.step_timeout();

        // 1. Connect.
        let connect = match crate::transport::mux::next_handshake(&mut link, &mut mux, step).await? {
            HandshakeMessage::Connect(c) => c,
            _ => return Err(GlintError::ProtocolViolation("expected Connect")),
        };

        if connect.capabilities.version != PROTOCOL_VERSION {
            return reject(&mut mux, RejectReason::UnsupportedVersion).await;
        }
        let negotiated = Capabilities::default().negotiate(&connect.capabilities);
        if negotiated.codecs.is_empty() {
            return reject(&mut mux, RejectReason::UnsupportedVersion).await;
        }
        if !devices.enumerate().contains(&connect.requested_source) {
            return reject(&mut mux, RejectReason::UnknownSource).await;
        }
        let resumed = match (&connect.resume, &resume) {
            (None, _) => None,
            (Some(hint), Some(token)) if hint.session_id == token.session_id => Some(*token),
            (Some(_), _) => {
                return reject(&mut mux, RejectReason::ResumeUnknown).await;
            }
        };

        // 2. Challenge, then derive and install keys.
        let kx = KeyExchange::generate();
        let nonce = challenge_nonce();
        mux.send_handshake(&HandshakeMessage::Challenge(
            crate::protocol::handshake::Challenge {
                public_key: kx.public_bytes(),
                nonce,
            },
        ))
        .await?;
        mux.install_crypto(kx.derive(&connect.public_key, &nonce, crate::crypto::Role::Host));

        // 3. Response: verify the credential proof.
        let response = match crate::transport::mux::next_handshake(&mut link, &mut mux, step).await? {
            HandshakeMessage::Response(r) => r,
            _ => return Err(GlintError::ProtocolViolation("expected Response")),
        };
        if !verifier.verify(&nonce, &response.auth_proof) {
            return reject(&mut mux, RejectReason::AuthFailed).await;
        }

        // 4. Accept.
        let (session_id, profile) = match resumed {
            Some(token) => (token.session_id, token.profile),
            None => (rand::random::<SessionId>(), cfg.initial_profile),
        };
        let source = connect.requested_source;
        mux.send_handshake(&HandshakeMessage::Accept(Accept {
            session_id,
            profile,
            source,
        }))
        .await?;

        let mut phase = SessionPhase::Handshaking;
        phase.activate()?;
        info!(session_id, %source, resumed = resumed.is_some(), "viewer session accepted");

        let metrics = SessionMetrics::shared();
        Ok(HostSession {
            link,
            mux,
            session_id,
            profile: ProfileHandle::new(profile),
            phase,
            clock: SessionClock::start(),
            congestion: CongestionController::new(cfg.adaptation.clone()),
            injector: InputInjector::new(input_backend, metrics.clone()),
            metrics,
            cfg,
            devices,
            source,
            shutdown: Arc::new(Notify::new()),
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

    /// Handle for an explicit disconnect request.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Drive the session until it ends. Every new session starts with a
    /// keyframe, so a joining (or resuming) viewer can decode
    /// immediately.
    pub async fn run(self) -> Result<HostOutcome, GlintError> {
        let HostSession {
            mut link,
            mut mux,
            session_id,
            profile,
            mut phase,
            clock,
            cfg,
            devices,
            injector,
            metrics,
            mut congestion,
            source,
            shutdown,
        } = self;

        // ── Capture stage ────────────────────────────────────────
        let frames: HandoffQueue<RawFrame> = HandoffQueue::new(cfg.queue_depth);
        let (switch_tx, switch_rx) = mpsc::channel::<SourceId>(4);
        let (active_tx, active_rx) = watch::channel(source);

        let capture_handle = tokio::spawn(capture_loop(
            devices.clone(),
            source,
            profile.clone(),
            cfg.capture.frame_deadline(),
            frames.clone(),
            switch_rx,
            active_tx,
            metrics.clone(),
        ));

        // ── Session loop ─────────────────────────────────────────
        let mut encoder = PipelineEncoder::new(profile.clone(), cfg.capture.tile_size);
        let mut last_encoded_source = source;
        let mut heartbeat = tokio::time::interval(cfg.heartbeat.interval());
        let mut housekeeping = tokio::time::interval(Duration::from_millis(50));
        let mut last_inbound = Instant::now();
        let mut rate_window = (Instant::now(), 0u64);

        enum Ev {
            Frame(Option<RawFrame>),
            Packet(Option<WirePacket>),
            Heartbeat,
            Housekeeping,
            Shutdown,
        }

        let outcome = loop {
            let ev = tokio::select! {
                f = frames.pop() => Ev::Frame(f),
                p = link.recv() => Ev::Packet(p),
                _ = heartbeat.tick() => Ev::Heartbeat,
                _ = housekeeping.tick() => Ev::Housekeeping,
                _ = shutdown.notified() => Ev::Shutdown,
            };

            match ev {
                Ev::Frame(Some(frame)) => {
                    // Drain frames a source switch left behind.
                    if frame.source != *active_rx.borrow() {
                        continue;
                    }
                    if frame.source != last_encoded_source {
                        // First frame from the new source: resynchronize.
                        encoder.force_keyframe();
                        last_encoded_source = frame.source;
                    }
                    match encoder.encode(&frame) {
                        Ok(Some(pkt)) => {
                            let payload = VideoPayload {
                                frame_number: pkt.frame_number,
                                timestamp_us: clock.now_us(),
                                width: pkt.width,
                                height: pkt.height,
                                data: pkt.payload,
                            };
                            let bytes = payload.data.len() as u64;
                            if let Err(e) =
                                mux.send_media(pkt.channel, pkt.keyframe, &payload).await
                            {
                                break transport_lost(&mut phase, e, session_id, &profile)?;
                            }
                            SessionMetrics::bump(&metrics.frames_encoded);
                            SessionMetrics::bump(&metrics.packets_sent);
                            SessionMetrics::add(&metrics.bytes_sent, bytes);
                            rate_window.1 += bytes;
                        }
                        Ok(None) => {} // nothing changed
                        Err(e) if e.is_stage_recoverable() => {
                            warn!(error = %e, "encoder fault, resetting");
                            encoder.reset();
                        }
                        Err(e) => return Err(e),
                    }

                    // Steer compression towards the bitrate budget once
                    // per second.
                    let elapsed = rate_window.0.elapsed();
                    if elapsed >= Duration::from_secs(1) {
                        let bps = (rate_window.1 * 8) as f64 / elapsed.as_secs_f64();
                        encoder.adjust(bps as u64);
                        rate_window = (Instant::now(), 0);
                    }
                }
                Ev::Frame(None) => {
                    // Capture stage gone: nothing left to stream.
                    phase.close(CloseReason::Local)?;
                    let _ = mux
                        .send_control(&ControlMessage::Disconnect {
                            reason: DisconnectReason::Shutdown,
                        })
                        .await;
                    break HostOutcome {
                        phase: phase.clone(),
                        resume: None,
                    };
                }
                Ev::Packet(Some(packet)) => {
                    last_inbound = Instant::now();
                    let inbound = match mux.accept(packet, last_inbound).await {
                        Ok(frames) => frames,
                        Err(GlintError::AuthenticationFailure) => {
                            let _ = mux
                                .send_control(&ControlMessage::Disconnect {
                                    reason: DisconnectReason::TamperDetected,
                                })
                                .await;
                            phase.close(CloseReason::TamperThreshold)?;
                            break HostOutcome {
                                phase: phase.clone(),
                                resume: None,
                            };
                        }
                        Err(GlintError::Encoding(e)) => {
                            warn!(error = %e, "undecodable payload, skipping");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    let mut closed = None;
                    for frame in inbound {
                        if let Some(reason) = handle_host_inbound(
                            frame,
                            &mut mux,
                            &mut phase,
                            &mut congestion,
                            &mut encoder,
                            &profile,
                            &clock,
                            &injector,
                            &switch_tx,
                            &metrics,
                        )
                        .await?
                        {
                            closed = Some(reason);
                            break;
                        }
                    }
                    if let Some(reason) = closed {
                        phase.close(reason)?;
                        break HostOutcome {
                            phase: phase.clone(),
                            resume: None,
                        };
                    }
                }
                Ev::Packet(None) => {
                    break transport_lost(
                        &mut phase,
                        GlintError::TransportDisconnect,
                        session_id,
                        &profile,
                    )?;
                }
                Ev::Shutdown => {
                    let _ = mux
                        .send_control(&ControlMessage::Disconnect {
                            reason: DisconnectReason::Normal,
                        })
                        .await;
                    phase.close(CloseReason::Local)?;
                    break HostOutcome {
                        phase: phase.clone(),
                        resume: None,
                    };
                }
                Ev::Heartbeat => {
                    let msg = ControlMessage::Heartbeat {
                        timestamp_us: clock.now_us(),
                    };
                    if let Err(e) = mux.send_control(&msg).await {
                        break transport_lost(&mut phase, e, session_id, &profile)?;
                    }
                }
                Ev::Housekeeping => {
                    let now = Instant::now();
                    if let Err(e) = mux.poll_retransmit(now).await {
                        break transport_lost(&mut phase, e, session_id, &profile)?;
                    }
                    if now.duration_since(last_inbound) > cfg.heartbeat.deadline() {
                        debug!("heartbeat deadline missed");
                        break transport_lost(
                            &mut phase,
                            GlintError::TransportDisconnect,
                            session_id,
                            &profile,
                        )?;
                    }
                }
            }
        };

        // Deterministic teardown: stop capture, drop the hand-off queue.
        capture_handle.abort();
        frames.close();
        info!(session_id, phase = %outcome.phase, "host session ended");
        Ok(outcome)
    }
}

/// Refuse the handshake: best-effort Reject to the peer, typed error to
/// the caller. Never auto-retried.
async fn reject(mux: &mut ChannelMux, reason: RejectReason) -> Result<HostSession, GlintError> {
    let _ = mux.send_handshake(&HandshakeMessage::Reject { reason }).await;
    Err(GlintError::HandshakeRejected(reason))
}

/// The transport died: close the phase and offer a resume token.
fn transport_lost(
    phase: &mut SessionPhase,
    cause: GlintError,
    session_id: SessionId,
    profile: &ProfileHandle,
) -> Result<HostOutcome, GlintError> {
    debug!(error = %cause, "transport lost");
    phase.close(CloseReason::HeartbeatLoss)?;
    Ok(HostOutcome {
        phase: phase.clone(),
        resume: Some(ResumeToken {
            session_id,
            profile: profile.load(),
        }),
    })
}

/// Dispatch one inbound frame on the host. Returns `Some(reason)` when
/// the session must close.
#[allow(clippy::too_many_arguments)]
async fn handle_host_inbound(
    frame: InboundFrame,
    mux: &mut ChannelMux,
    phase: &mut SessionPhase,
    congestion: &mut CongestionController,
    encoder: &mut PipelineEncoder,
    profile: &ProfileHandle,
    clock: &SessionClock,
    injector: &InputInjector,
    switch_tx: &mpsc::Sender<SourceId>,
    metrics: &Arc<SessionMetrics>,
) -> Result<Option<CloseReason>, GlintError> {
    match frame {
        InboundFrame::Input { event, .. } => {
            injector.apply(&event);
        }
        InboundFrame::Control { message, .. } => match message {
            ControlMessage::SwitchSource { source } => {
                debug!(%source, "source switch requested");
                let _ = switch_tx.send(source).await;
            }
            ControlMessage::Heartbeat { timestamp_us } => {
                mux.send_control(&ControlMessage::HeartbeatEcho {
                    origin_timestamp_us: timestamp_us,
                    receiver_timestamp_us: clock.now_us(),
                })
                .await?;
            }
            ControlMessage::HeartbeatEcho {
                origin_timestamp_us,
                ..
            } => {
                let rtt_us = clock.now_us().saturating_sub(origin_timestamp_us);
                SessionMetrics::set(&metrics.delay_us, rtt_us / 2);
            }
            ControlMessage::CongestionReport {
                loss_permille,
                delay_us,
            } => {
                SessionMetrics::set(&metrics.loss_permille, loss_permille as u64);
                let sample = CongestionSample {
                    loss_permille,
                    delay: Duration::from_micros(delay_us),
                };
                let degraded = matches!(phase, SessionPhase::Degraded { .. });
                let current = profile.load();
                match congestion.observe(sample, &current, degraded, Instant::now()) {
                    AdaptationAction::Degrade(next) => {
                        info!(
                            from_bps = current.bitrate_bps,
                            to_bps = next.bitrate_bps,
                            "degrading quality"
                        );
                        phase.degrade()?;
                        profile.store(next);
                        mux.send_control(&ControlMessage::ProfileUpdate { profile: next })
                            .await?;
                    }
                    AdaptationAction::Recover(restored) => {
                        info!(to_bps = restored.bitrate_bps, "recovering quality");
                        phase.recover()?;
                        profile.store(restored);
                        encoder.force_keyframe();
                        mux.send_control(&ControlMessage::ProfileUpdate { profile: restored })
                            .await?;
                    }
                    AdaptationAction::None => {}
                }
            }
            ControlMessage::Disconnect { reason } => {
                debug!(?reason, "viewer disconnected");
                return Ok(Some(CloseReason::Remote));
            }
            ControlMessage::ProfileUpdate { .. } => {
                warn!("ignoring ProfileUpdate from viewer: profile is host-owned");
            }
        },
        InboundFrame::Video { .. } | InboundFrame::Device { .. } => {
            warn!("ignoring media frame sent to host");
        }
        InboundFrame::Handshake { .. } => {
            warn!("ignoring handshake frame after session establishment");
        }
    }
    Ok(None)
}

/// Capture task: pulls frames at the profile cadence and hands them to
/// the session loop. On a capture timeout the previous frame is
/// repeated rather than stalling the pipeline.
#[allow(clippy::too_many_arguments)]
async fn capture_loop(
    devices: Arc<dyn CaptureDevice>,
    initial: SourceId,
    profile: ProfileHandle,
    frame_deadline: Duration,
    frames: HandoffQueue<RawFrame>,
    mut switch_rx: mpsc::Receiver<SourceId>,
    active_tx: watch::Sender<SourceId>,
    metrics: Arc<SessionMetrics>,
) {
    let mut selector = match SourceSelector::open(devices, initial) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to open capture source");
            frames.close();
            return;
        }
    };
    let mut last_frame: Option<RawFrame> = None;

    loop {
        let interval = profile.load().frame_interval();
        tokio::select! {
            cmd = switch_rx.recv() => match cmd {
                Some(id) => match selector.switch_to(id) {
                    Ok(()) => {
                        let _ = active_tx.send(id);
                        last_frame = None;
                    }
                    Err(e) => warn!(error = %e, %id, "source switch failed"),
                },
                None => break, // session loop gone
            },
            _ = tokio::time::sleep(interval) => {
                match selector.next_frame(frame_deadline).await {
                    Ok(frame) => {
                        SessionMetrics::bump(&metrics.frames_captured);
                        last_frame = Some(frame.clone());
                        frames.push(frame);
                    }
                    Err(GlintError::CaptureTimeout(_)) => {
                        // Device stalled: repeat the previous frame.
                        if let Some(prev) = &last_frame {
                            frames.push(prev.clone());
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "capture failed, stopping");
                        break;
                    }
                }
            }
        }
        if frames.is_closed() {
            break;
        }
    }
    frames.close();
}
