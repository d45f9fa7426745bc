//! Integration tests — full host/viewer session lifecycle, stream
//! properties, congestion adaptation, tampering, and reconnection over
//! in-memory duplex links.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use glint_core::channel::ChannelId;
use glint_core::capture::{SourceId, TestCaptureDevice};
use glint_core::config::EngineConfig;
use glint_core::crypto::{KeyExchange, Role, SharedSecretCredential};
use glint_core::error::GlintError;
use glint_core::host::{HostOutcome, HostSession};
use glint_core::input::RecordingBackend;
use glint_core::packet::{TAG_SIZE, WirePacket};
use glint_core::flags::PacketFlags;
use glint_core::playback::PlaybackFrame;
use glint_core::protocol::control::ControlMessage;
use glint_core::protocol::handshake::{
    Capabilities, Connect, HandshakeMessage, RejectReason, Response,
};
use glint_core::protocol::input::InputAction;
use glint_core::session::{CloseReason, SessionPhase};
use glint_core::transport::link::Link;
use glint_core::transport::mux::{ChannelMux, InboundFrame};
use glint_core::viewer::{Dialer, ViewerSession};

// ── Helpers ──────────────────────────────────────────────────────

const SECRET: &[u8] = b"integration secret";

fn credentials() -> Arc<SharedSecretCredential> {
    Arc::new(SharedSecretCredential::new(SECRET))
}

fn devices() -> Arc<TestCaptureDevice> {
    Arc::new(TestCaptureDevice::new(
        vec![SourceId::Monitor(0), SourceId::Monitor(1), SourceId::Device(0)],
        64,
        48,
    ))
}

fn test_config() -> EngineConfig {
    let mut cfg = EngineConfig::default();
    // Small tiles so the 64x48 test pattern produces delta frames.
    cfg.capture.tile_size = 16;
    cfg.playback.jitter_delay_ms = 10;
    cfg
}

/// Dialer over a queue of pre-established duplex streams; dials fail
/// once the queue runs dry.
struct QueueDialer {
    streams: Mutex<VecDeque<DuplexStream>>,
    dials: AtomicU32,
}

impl QueueDialer {
    fn new(streams: Vec<DuplexStream>) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(streams.into()),
            dials: AtomicU32::new(0),
        })
    }

    fn dial_count(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for QueueDialer {
    async fn dial(&self) -> Result<Link, GlintError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .map(Link::new)
            .ok_or(GlintError::TransportDisconnect)
    }
}

/// Spin up a host/viewer pair over one duplex link.
async fn establish(
    cfg: EngineConfig,
    source: SourceId,
    backend: Arc<RecordingBackend>,
) -> (HostSession, ViewerSession, Arc<QueueDialer>) {
    let (host_stream, viewer_stream) = tokio::io::duplex(1024 * 1024);
    let dialer = QueueDialer::new(vec![viewer_stream]);

    let (host, viewer) = tokio::join!(
        HostSession::accept(
            host_stream,
            devices(),
            backend,
            credentials(),
            cfg.clone(),
            None,
        ),
        ViewerSession::connect(dialer.clone(), source, credentials(), cfg),
    );
    (host.unwrap(), viewer.unwrap(), dialer)
}

async fn collect_frames(
    rx: &mut mpsc::Receiver<PlaybackFrame>,
    n: usize,
    deadline: Duration,
) -> Vec<PlaybackFrame> {
    let mut out = Vec::with_capacity(n);
    let end = Instant::now() + deadline;
    while out.len() < n {
        let remaining = end.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(frame)) => out.push(frame),
            _ => break,
        }
    }
    out
}

// ── Session lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn session_streams_ordered_frames_end_to_end() {
    let backend = RecordingBackend::new();
    let (host, mut viewer, _dialer) =
        establish(test_config(), SourceId::Monitor(0), backend).await;

    let mut frames_rx = viewer.frames().unwrap();
    let shutdown = viewer.shutdown_handle();

    let host_task = tokio::spawn(host.run());
    let viewer_task = tokio::spawn(viewer.run());

    let frames = collect_frames(&mut frames_rx, 5, Duration::from_secs(5)).await;
    assert!(frames.len() >= 5, "expected at least 5 frames, got {}", frames.len());

    // First delivered frame decodes without references.
    assert!(frames[0].keyframe);
    // Video-channel sequences are strictly increasing.
    assert!(
        frames.windows(2).all(|w| w[0].sequence < w[1].sequence),
        "sequences must be strictly increasing"
    );
    assert!(frames.iter().all(|f| f.channel == ChannelId::Video));
    assert_eq!((frames[0].width, frames[0].height), (64, 48));

    // Orderly teardown from the viewer end.
    shutdown.notify_one();
    let viewer_phase = viewer_task.await.unwrap().unwrap();
    assert_eq!(
        viewer_phase,
        SessionPhase::Closed {
            reason: CloseReason::Local
        }
    );

    let HostOutcome { phase, resume } = host_task.await.unwrap().unwrap();
    assert_eq!(
        phase,
        SessionPhase::Closed {
            reason: CloseReason::Remote
        }
    );
    assert!(resume.is_none());
}

#[tokio::test]
async fn input_events_inject_in_order_despite_video_traffic() {
    let backend = RecordingBackend::new();
    let (host, viewer, _dialer) =
        establish(test_config(), SourceId::Monitor(0), backend.clone()).await;

    let input = viewer.input_sender();
    let shutdown = viewer.shutdown_handle();
    let host_task = tokio::spawn(host.run());
    let viewer_task = tokio::spawn(viewer.run());

    for keycode in 0..20u32 {
        input
            .send(InputAction::KeyPress { keycode })
            .await
            .unwrap();
    }

    // Let the events cross while video keeps streaming.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let keys: Vec<u32> = backend
        .recorded()
        .iter()
        .filter_map(|e| match e.action {
            InputAction::KeyPress { keycode } => Some(keycode),
            _ => None,
        })
        .collect();
    assert_eq!(keys, (0..20).collect::<Vec<u32>>());

    shutdown.notify_one();
    let _ = viewer_task.await.unwrap().unwrap();
    let _ = host_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn switching_source_forces_a_keyframe_on_the_new_stream() {
    let backend = RecordingBackend::new();
    let (host, mut viewer, _dialer) =
        establish(test_config(), SourceId::Monitor(0), backend).await;

    let mut frames_rx = viewer.frames().unwrap();
    let switch = viewer.switch_sender();
    let shutdown = viewer.shutdown_handle();
    let host_task = tokio::spawn(host.run());
    let viewer_task = tokio::spawn(viewer.run());

    // Stream a little on the monitor source first.
    let before = collect_frames(&mut frames_rx, 3, Duration::from_secs(5)).await;
    assert!(before.iter().all(|f| f.channel == ChannelId::Video));

    switch.send(SourceId::Device(0)).await.unwrap();

    // The very next packet delivered from the new source is a keyframe.
    let end = Instant::now() + Duration::from_secs(5);
    let mut first_device_frame = None;
    while Instant::now() < end {
        let remaining = end.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, frames_rx.recv()).await {
            Ok(Some(frame)) if frame.channel == ChannelId::Device => {
                first_device_frame = Some(frame);
                break;
            }
            Ok(Some(_)) => continue, // trailing monitor frames being drained
            _ => break,
        }
    }
    let frame = first_device_frame.expect("no device frame after switch");
    assert!(frame.keyframe, "first frame from a new source must be a keyframe");

    shutdown.notify_one();
    let _ = viewer_task.await.unwrap().unwrap();
    let _ = host_task.await.unwrap().unwrap();
}

// ── Handshake failures ───────────────────────────────────────────

#[tokio::test]
async fn wrong_credentials_are_rejected_without_retry() {
    let (host_stream, viewer_stream) = tokio::io::duplex(64 * 1024);
    let dialer = QueueDialer::new(vec![viewer_stream]);

    let (host, viewer) = tokio::join!(
        HostSession::accept(
            host_stream,
            devices(),
            RecordingBackend::new(),
            credentials(),
            test_config(),
            None,
        ),
        ViewerSession::connect(
            dialer.clone(),
            SourceId::Monitor(0),
            Arc::new(SharedSecretCredential::new(b"wrong secret")),
            test_config(),
        ),
    );

    assert!(matches!(
        host,
        Err(GlintError::HandshakeRejected(RejectReason::AuthFailed))
    ));
    assert!(matches!(
        viewer,
        Err(GlintError::HandshakeRejected(RejectReason::AuthFailed))
    ));
    // No automatic retry of a rejected handshake.
    assert_eq!(dialer.dial_count(), 1);
}

#[tokio::test]
async fn unknown_source_is_rejected() {
    let (host_stream, viewer_stream) = tokio::io::duplex(64 * 1024);
    let dialer = QueueDialer::new(vec![viewer_stream]);

    let (host, viewer) = tokio::join!(
        HostSession::accept(
            host_stream,
            devices(),
            RecordingBackend::new(),
            credentials(),
            test_config(),
            None,
        ),
        ViewerSession::connect(
            dialer,
            SourceId::Monitor(9),
            credentials(),
            test_config(),
        ),
    );

    assert!(matches!(
        host,
        Err(GlintError::HandshakeRejected(RejectReason::UnknownSource))
    ));
    assert!(matches!(
        viewer,
        Err(GlintError::HandshakeRejected(RejectReason::UnknownSource))
    ));
}

#[tokio::test]
async fn silent_peer_times_out_the_handshake() {
    let mut cfg = test_config();
    cfg.handshake.step_timeout_ms = 100;

    let (host_stream, viewer_stream) = tokio::io::duplex(64 * 1024);
    let result = HostSession::accept(
        host_stream,
        devices(),
        RecordingBackend::new(),
        credentials(),
        cfg,
        None,
    )
    .await;

    assert!(matches!(result, Err(GlintError::HandshakeTimeout(_))));
    drop(viewer_stream);
}

// ── Reconnection ─────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_reconnect_attempts_close_the_session() {
    let mut cfg = test_config();
    cfg.reconnect.initial_backoff_ms = 10;
    cfg.reconnect.max_attempts = 2;
    cfg.heartbeat.interval_ms = 100;
    cfg.heartbeat.miss_budget = 2;

    let backend = RecordingBackend::new();
    let (host, viewer, dialer) = {
        let (host_stream, viewer_stream) = tokio::io::duplex(1024 * 1024);
        let dialer = QueueDialer::new(vec![viewer_stream]);
        let (host, viewer) = tokio::join!(
            HostSession::accept(
                host_stream,
                devices(),
                backend,
                credentials(),
                cfg.clone(),
                None,
            ),
            ViewerSession::connect(dialer.clone(), SourceId::Monitor(0), credentials(), cfg),
        );
        (host.unwrap(), viewer.unwrap(), dialer)
    };

    let host_task = tokio::spawn(host.run());
    let viewer_task = tokio::spawn(viewer.run());

    // Kill the host: its link drops and the duplex closes.
    tokio::time::sleep(Duration::from_millis(200)).await;
    host_task.abort();

    let phase = tokio::time::timeout(Duration::from_secs(10), viewer_task)
        .await
        .expect("viewer did not terminate")
        .unwrap()
        .unwrap();

    assert_eq!(
        phase,
        SessionPhase::Closed {
            reason: CloseReason::RetriesExhausted
        }
    );
    // One initial dial plus exactly max_attempts reconnect dials.
    assert_eq!(dialer.dial_count(), 3);
}

// ── Raw-protocol scenarios (hand-rolled client) ──────────────────

/// Complete the viewer side of the handshake with engine primitives.
async fn raw_client_handshake(
    link: &mut Link,
    mux: &mut ChannelMux,
    source: SourceId,
) -> glint_core::protocol::handshake::Accept {
    let kx = KeyExchange::generate();
    mux.send_handshake(&HandshakeMessage::Connect(Connect {
        capabilities: Capabilities::default(),
        requested_source: source,
        public_key: kx.public_bytes(),
        resume: None,
    }))
    .await
    .unwrap();

    let HandshakeMessage::Challenge(challenge) = raw_recv_handshake(link, mux).await else {
        panic!("expected Challenge");
    };
    mux.install_crypto(kx.derive(&challenge.public_key, &challenge.nonce, Role::Viewer));

    let cred = SharedSecretCredential::new(SECRET);
    use glint_core::crypto::CredentialProver;
    mux.send_handshake(&HandshakeMessage::Response(Response {
        auth_proof: cred.prove(&challenge.nonce),
    }))
    .await
    .unwrap();

    let HandshakeMessage::Accept(accept) = raw_recv_handshake(link, mux).await else {
        panic!("expected Accept");
    };
    accept
}

async fn raw_recv_handshake(link: &mut Link, mux: &mut ChannelMux) -> HandshakeMessage {
    loop {
        let packet = link
            .recv_timeout(Duration::from_secs(2))
            .await
            .expect("handshake recv");
        for frame in mux.accept(packet, Instant::now()).await.unwrap() {
            if let InboundFrame::Handshake { payload } = frame {
                return HandshakeMessage::from_bytes(&payload).unwrap();
            }
        }
    }
}

#[tokio::test]
async fn congestion_report_above_threshold_downgrades_the_profile() {
    let cfg = test_config();
    let (host_stream, client_stream) = tokio::io::duplex(1024 * 1024);

    let host_fut = HostSession::accept(
        host_stream,
        devices(),
        RecordingBackend::new(),
        credentials(),
        cfg.clone(),
        None,
    );

    let client_fut = async {
        let mut link = Link::new(client_stream);
        let mut mux = ChannelMux::new(link.sender(), &cfg);
        let accept = raw_client_handshake(&mut link, &mut mux, SourceId::Monitor(0)).await;
        (link, mux, accept)
    };

    let (host, (mut link, mut mux, accept)) = tokio::join!(host_fut, client_fut);
    let host = host.unwrap();
    let initial_bitrate = accept.profile.bitrate_bps;
    let host_task = tokio::spawn(host.run());

    // Report 20% loss — far above the 5% degrade threshold.
    mux.send_control(&ControlMessage::CongestionReport {
        loss_permille: 200,
        delay_us: 20_000,
    })
    .await
    .unwrap();

    // The host must answer with a lower-bitrate ProfileUpdate within
    // one adaptation cycle.
    let end = Instant::now() + Duration::from_secs(5);
    let mut downgraded = None;
    'outer: while Instant::now() < end {
        let remaining = end.saturating_duration_since(Instant::now());
        let Ok(packet) = link.recv_timeout(remaining).await else {
            break;
        };
        for frame in mux.accept(packet, Instant::now()).await.unwrap() {
            if let InboundFrame::Control {
                message: ControlMessage::ProfileUpdate { profile },
                ..
            } = frame
            {
                downgraded = Some(profile);
                break 'outer;
            }
        }
    }

    let profile = downgraded.expect("no ProfileUpdate received");
    assert!(
        profile.bitrate_bps < initial_bitrate,
        "degraded profile must lower the bitrate"
    );

    host_task.abort();
}

#[tokio::test]
async fn five_consecutive_forged_packets_close_the_session() {
    let cfg = test_config();
    let (host_stream, client_stream) = tokio::io::duplex(1024 * 1024);

    let host_fut = HostSession::accept(
        host_stream,
        devices(),
        RecordingBackend::new(),
        credentials(),
        cfg.clone(),
        None,
    );
    let client_fut = async {
        let mut link = Link::new(client_stream);
        let mut mux = ChannelMux::new(link.sender(), &cfg);
        let accept = raw_client_handshake(&mut link, &mut mux, SourceId::Monitor(0)).await;
        (link, mux, accept)
    };

    let (host, (link, _mux, _accept)) = tokio::join!(host_fut, client_fut);
    let host_task = tokio::spawn(host.unwrap().run());

    // Five forged packets in a row: each fails authentication, is never
    // delivered, and the fifth trips the tamper threshold.
    for seq in 1..=5u32 {
        let forged = WirePacket::new(
            ChannelId::Input,
            seq,
            PacketFlags::empty(),
            vec![0xEE; 24],
            [0xAB; TAG_SIZE],
        )
        .unwrap();
        link.send(forged).await.unwrap();
    }

    let HostOutcome { phase, resume } = tokio::time::timeout(Duration::from_secs(5), host_task)
        .await
        .expect("host did not terminate")
        .unwrap()
        .unwrap();

    assert_eq!(
        phase,
        SessionPhase::Closed {
            reason: CloseReason::TamperThreshold
        }
    );
    assert!(resume.is_none());
}
