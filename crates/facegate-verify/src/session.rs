//! The verification session state machine.
//!
//! One session verifies one subject: it owns the camera, polls for face
//! presence, accumulates a bounded burst of captured photos, and matches
//! them against the subject's reference descriptors. The session runs as
//! a task owning its resources; callers drive it through a [`Session`]
//! handle and observe it through a watch channel, so teardown is
//! exactly-once on every exit path and results that land after teardown
//! are discarded.

use crate::catalog::ReferenceCatalog;
use crate::config::VerifyConfig;
use crate::error::VerifyError;
use crate::reference::ReferenceLoader;
use facegate_camera::{CameraSource, CapturedPhoto, VideoSource};
use facegate_vision::{DescriptorMatcher, FaceAnalyzer, NearestMatcher, UNKNOWN_LABEL};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

const PROGRESS_TICK: std::time::Duration = std::time::Duration::from_millis(200);
const PROGRESS_STEP: u8 = 10;
/// Progress holds here until the match genuinely resolves.
const PROGRESS_CEILING: u8 = 90;

/// Session lifecycle phase. The phase is the complete UI contract:
/// every fatal error maps to a renderable terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initial,
    /// Camera live, waiting for exactly one face.
    Positioning,
    /// Exactly one face present; capture may be triggered.
    Ready,
    /// Burst captured, matching in progress.
    Capturing,
    Success,
    Failed,
    /// Camera acquisition or model initialization failed.
    Denied,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Success | Phase::Failed | Phase::Denied)
    }
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    /// 0–100; capped at 90 until the matcher actually returns.
    pub progress: u8,
    pub face_present: bool,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            phase: Phase::Initial,
            progress: 0,
            face_present: false,
        }
    }
}

/// Output record of one verification attempt.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub is_match: bool,
    /// Mean similarity across the burst, 0–100.
    pub similarity: f32,
    /// Distance threshold the attempt was judged against.
    pub threshold: f32,
    /// Subject id on a match, `"unknown"` otherwise.
    pub label: String,
    pub duration_ms: u64,
    /// Reference images that embedded successfully.
    pub reference_count: usize,
}

/// Result channel payload: the `onSuccess`/`onError` contract.
#[derive(Debug)]
pub enum SessionEvent {
    /// The matcher ran to completion (including below-threshold rejections).
    Completed(VerificationReport),
    /// The attempt failed before a verdict.
    Error(VerifyError),
}

enum Command {
    CapturePhoto {
        reply: oneshot::Sender<Option<CapturedPhoto>>,
    },
    CaptureAndVerify {
        photos: Vec<CapturedPhoto>,
    },
    Stop,
}

/// One iteration of the session loop: a caller command or a poll tick.
enum Turn {
    Command(Option<Command>),
    Poll,
}

/// Shared entry point: holds the collaborators every session borrows.
pub struct Verifier {
    analyzer: Arc<dyn FaceAnalyzer>,
    catalog: Arc<dyn ReferenceCatalog>,
    cameras: Arc<dyn CameraSource>,
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        catalog: Arc<dyn ReferenceCatalog>,
        cameras: Arc<dyn CameraSource>,
        config: VerifyConfig,
    ) -> Self {
        Self {
            analyzer,
            catalog,
            cameras,
            config,
        }
    }

    /// Start a verification session for one subject.
    ///
    /// Returns immediately; initialization happens inside the session
    /// task so camera and model failures surface as the `Denied` phase
    /// plus an error event.
    pub fn start_camera(&self, subject: impl Into<String>) -> Session {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(Snapshot::initial());
        let (event_tx, event_rx) = mpsc::channel(4);
        let active = Arc::new(AtomicBool::new(true));

        let actor = SessionActor {
            subject: subject.into(),
            analyzer: self.analyzer.clone(),
            loader: ReferenceLoader::new(self.catalog.clone(), self.analyzer.clone()),
            cameras: self.cameras.clone(),
            config: self.config.clone(),
            cmd_rx,
            state_tx,
            event_tx,
            active: active.clone(),
            source: None,
            buffer: VecDeque::new(),
            face_present: false,
        };
        tokio::spawn(actor.run());

        Session {
            cmd_tx,
            state_rx,
            event_rx,
            active,
        }
    }
}

/// Caller handle for one verification session.
pub struct Session {
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<Snapshot>,
    event_rx: mpsc::Receiver<SessionEvent>,
    active: Arc<AtomicBool>,
}

impl Session {
    pub fn snapshot(&self) -> Snapshot {
        *self.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<Snapshot> {
        self.state_rx.clone()
    }

    /// Sample one still from the live stream into the capture buffer.
    ///
    /// Returns `None` when the session has no active stream.
    pub async fn capture_photo(&self) -> Option<CapturedPhoto> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::CapturePhoto { reply })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.unwrap_or(None)
    }

    /// Trigger the multi-shot verification.
    ///
    /// A trigger while no face is present is ignored. The verdict (or
    /// failure) arrives through [`Session::next_event`].
    pub async fn capture_and_verify(&self, photos: Vec<CapturedPhoto>) {
        let _ = self.cmd_tx.send(Command::CaptureAndVerify { photos }).await;
    }

    /// Tear the session down. Idempotent; safe on any phase.
    pub fn stop_camera(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.try_send(Command::Stop);
    }

    /// Next result event, or `None` once the session task is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.event_rx.recv().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop_camera();
    }
}

struct SessionActor {
    subject: String,
    analyzer: Arc<dyn FaceAnalyzer>,
    loader: ReferenceLoader,
    cameras: Arc<dyn CameraSource>,
    config: VerifyConfig,
    cmd_rx: mpsc::Receiver<Command>,
    state_tx: watch::Sender<Snapshot>,
    event_tx: mpsc::Sender<SessionEvent>,
    active: Arc<AtomicBool>,
    source: Option<Box<dyn VideoSource>>,
    buffer: VecDeque<CapturedPhoto>,
    face_present: bool,
}

impl SessionActor {
    async fn run(mut self) {
        // Service initialization: lazy, memoized inside the analyzer.
        let analyzer = self.analyzer.clone();
        match tokio::task::spawn_blocking(move || analyzer.ensure_ready()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.deny(VerifyError::ModelInit(e)).await,
            Err(_) => return self.deny(VerifyError::SessionClosed).await,
        }

        // Camera acquisition.
        let cameras = self.cameras.clone();
        let constraints = self.config.constraints();
        match tokio::task::spawn_blocking(move || cameras.acquire(&constraints)).await {
            Ok(Ok(source)) => self.source = Some(source),
            Ok(Err(e)) => return self.deny(VerifyError::Camera(e)).await,
            Err(_) => return self.deny(VerifyError::SessionClosed).await,
        }

        if !self.active.load(Ordering::SeqCst) {
            return self.teardown();
        }

        tracing::info!(subject = %self.subject, "camera live, positioning");
        self.publish(|s| {
            s.phase = Phase::Positioning;
        });

        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let turn = tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => Turn::Command(cmd),
                _ = poll.tick() => Turn::Poll,
            };

            match turn {
                Turn::Command(None) | Turn::Command(Some(Command::Stop)) => break,
                Turn::Command(Some(Command::CapturePhoto { reply })) => {
                    let photo = self.sample_photo().await;
                    let _ = reply.send(photo);
                }
                Turn::Command(Some(Command::CaptureAndVerify { photos })) => {
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                    if !self.face_present {
                        tracing::debug!(subject = %self.subject, "capture trigger without face presence; ignoring");
                        continue;
                    }
                    self.run_capture(photos).await;
                    break;
                }
                Turn::Poll => {
                    self.poll_presence().await;
                    if !self.active.load(Ordering::SeqCst) {
                        break;
                    }
                }
            }
        }

        self.teardown();
    }

    /// One presence-detection cycle. Ticks are strictly serialized: the
    /// next cycle cannot start until this sample-and-count returns.
    async fn poll_presence(&mut self) {
        let Some(mut source) = self.source.take() else {
            return;
        };
        let analyzer = self.analyzer.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let counted = source
                .sample()
                .map_err(VerifyError::Camera)
                .and_then(|photo| analyzer.face_count(&photo.bytes).map_err(VerifyError::Vision));
            (source, counted)
        })
        .await;

        let Ok((source, counted)) = joined else {
            tracing::debug!("presence poll task failed; continuing");
            return;
        };
        self.source = Some(source);

        // A result that lands after teardown must not drive a transition.
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        match counted {
            Ok(count) => {
                let present = count == 1;
                self.face_present = present;
                self.publish(|s| {
                    s.face_present = present;
                    s.phase = if present {
                        Phase::Ready
                    } else {
                        Phase::Positioning
                    };
                });
            }
            // Transient: a single failed frame never fails the session.
            Err(e) => tracing::debug!(error = %e, "presence poll failed; continuing"),
        }
    }

    /// Sample one still and append it to the bounded capture buffer.
    async fn sample_photo(&mut self) -> Option<CapturedPhoto> {
        let source = self.source.take()?;
        let joined = tokio::task::spawn_blocking(move || {
            let mut source = source;
            let sampled = source.sample();
            (source, sampled)
        })
        .await;

        let Ok((source, sampled)) = joined else {
            return None;
        };
        self.source = Some(source);

        if !self.active.load(Ordering::SeqCst) {
            return None;
        }

        match sampled {
            Ok(photo) => {
                self.buffer.push_back(photo.clone());
                while self.buffer.len() > self.config.shots_per_verify {
                    self.buffer.pop_front();
                }
                Some(photo)
            }
            Err(e) => {
                tracing::warn!(error = %e, "photo capture failed");
                None
            }
        }
    }

    /// The CAPTURING phase: resolve the burst, match it, report, and end
    /// in a terminal phase.
    async fn run_capture(&mut self, photos: Vec<CapturedPhoto>) {
        self.publish(|s| {
            s.phase = Phase::Capturing;
        });
        let started = Instant::now();

        let mut burst = photos;
        if burst.is_empty() {
            burst = self.buffer.drain(..).collect();
        }
        if burst.is_empty() {
            if let Some(photo) = self.sample_photo().await {
                burst.push(photo);
            }
        }
        tracing::info!(subject = %self.subject, shots = burst.len(), "verifying burst");

        let verify_fut = run_verification(
            self.analyzer.clone(),
            self.loader.clone(),
            self.subject.clone(),
            self.config.match_threshold,
            self.config.require_all_shots,
            burst,
            started,
        );
        tokio::pin!(verify_fut);

        // Fixed-increment progress: the UI gets movement regardless of
        // how long the matcher takes, held at the ceiling until the
        // verdict is real.
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + PROGRESS_TICK, PROGRESS_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                result = &mut verify_fut => break result,
                _ = ticker.tick() => {
                    self.publish(|s| {
                        s.progress = (s.progress + PROGRESS_STEP).min(PROGRESS_CEILING);
                    });
                }
            }
        };

        match outcome {
            Ok(report) => {
                let phase = if report.is_match {
                    Phase::Success
                } else {
                    Phase::Failed
                };
                tracing::info!(
                    subject = %self.subject,
                    is_match = report.is_match,
                    similarity = report.similarity,
                    duration_ms = report.duration_ms,
                    "verification complete"
                );
                self.publish(|s| {
                    s.progress = 100;
                    s.phase = phase;
                });
                let _ = self.event_tx.send(SessionEvent::Completed(report)).await;
            }
            Err(e) => {
                tracing::warn!(subject = %self.subject, error = %e, "verification failed");
                self.publish(|s| {
                    s.progress = 100;
                    s.phase = Phase::Failed;
                });
                let _ = self.event_tx.send(SessionEvent::Error(e)).await;
            }
        }
    }

    async fn deny(mut self, error: VerifyError) {
        tracing::warn!(subject = %self.subject, error = %error, "session denied");
        self.publish(|s| {
            s.phase = Phase::Denied;
        });
        let _ = self.event_tx.send(SessionEvent::Error(error)).await;
        self.teardown();
    }

    /// Release the camera and mark the session inactive. Idempotent and
    /// reached on every exit path; timers die with the task.
    fn teardown(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if self.source.take().is_some() {
            tracing::debug!(subject = %self.subject, "camera released");
        }
    }

    fn publish(&self, update: impl FnOnce(&mut Snapshot)) {
        self.state_tx.send_if_modified(|snapshot| {
            let before = *snapshot;
            update(snapshot);
            *snapshot != before
        });
    }
}

/// Embed and match every photo of the burst against the subject's
/// reference descriptors, loaded once per attempt.
async fn run_verification(
    analyzer: Arc<dyn FaceAnalyzer>,
    loader: ReferenceLoader,
    subject: String,
    threshold: f32,
    require_all_shots: bool,
    burst: Vec<CapturedPhoto>,
    started: Instant,
) -> Result<VerificationReport, VerifyError> {
    if burst.is_empty() {
        return Err(VerifyError::NoFaceDetected);
    }

    let references = loader.load(&subject).await?;
    let reference_count = references.embeddings.len();
    let reference_sets = [references];

    let shots = burst.len();
    let mut matched = 0usize;
    let mut similarity_sum = 0.0f32;

    for photo in burst {
        let analyzer = analyzer.clone();
        let embedding = tokio::task::spawn_blocking(move || analyzer.embed_sole_face(&photo.bytes))
            .await
            .map_err(|_| VerifyError::SessionClosed)??
            .ok_or(VerifyError::NoFaceDetected)?;

        let outcome = NearestMatcher.best_match(&embedding, &reference_sets, threshold);
        similarity_sum += outcome.similarity();
        if outcome.is_match() {
            matched += 1;
        }
    }

    let is_match = if require_all_shots {
        matched == shots
    } else {
        matched * 2 > shots
    };

    Ok(VerificationReport {
        is_match,
        similarity: similarity_sum / shots as f32,
        threshold,
        label: if is_match {
            subject
        } else {
            UNKNOWN_LABEL.to_string()
        },
        duration_ms: started.elapsed().as_millis() as u64,
        reference_count,
    })
}
