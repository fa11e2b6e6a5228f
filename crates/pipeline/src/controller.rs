use crate::detector::SharedDetector;
use crate::notify::{DispatcherStats, NotificationDispatcher};
use crate::record::DetectionRecord;
use crate::session::{AnnotatedFrame, InferenceSession, LoopSettings, SessionConfig, SessionError};
use crate::source::FrameSource;
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerState {
    Idle,
    /// A session exists; its loop may still be running or may have finished.
    Running,
    /// Cancellation requested, waiting for the loop to exit.
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: ControllerState,
    pub session_id: Option<String>,
    pub source: Option<String>,
    pub frames_read: u64,
    pub frames_processed: u64,
    pub detections_total: u64,
    pub finished: bool,
    pub has_frame: bool,
    pub notifications: DispatcherStats,
}

struct ActiveSession {
    session: Arc<InferenceSession>,
    /// Disconnects when the worker thread exits.
    done: Receiver<()>,
    worker: JoinHandle<()>,
}

struct View {
    state: ControllerState,
    session: Option<Arc<InferenceSession>>,
}

/// Owns the single active [`InferenceSession`] and its worker thread.
///
/// `start` and `stop` are serialized by the lifecycle lock; queries only take
/// the view lock so they stay responsive while a stop is waiting.
pub struct SessionController {
    detector: SharedDetector,
    notifier: Arc<NotificationDispatcher>,
    settings: LoopSettings,
    active: Mutex<Option<ActiveSession>>,
    view: RwLock<View>,
}

impl SessionController {
    pub fn new(
        detector: SharedDetector,
        notifier: Arc<NotificationDispatcher>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            detector,
            notifier,
            settings,
            active: Mutex::new(None),
            view: RwLock::new(View {
                state: ControllerState::Idle,
                session: None,
            }),
        }
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn state(&self) -> ControllerState {
        self.view.read().unwrap_or_else(PoisonError::into_inner).state
    }

    pub fn current_session(&self) -> Option<Arc<InferenceSession>> {
        self.view
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session
            .clone()
    }

    fn set_view(&self, state: ControllerState, session: Option<Arc<InferenceSession>>) {
        let mut view = self.view.write().unwrap_or_else(PoisonError::into_inner);
        view.state = state;
        view.session = session;
    }

    fn set_state(&self, state: ControllerState) {
        self.view.write().unwrap_or_else(PoisonError::into_inner).state = state;
    }

    /// Start a session on `source`, replacing any running one.
    ///
    /// The prior session's source is fully released before the new worker
    /// starts pulling frames. Invalid configs and non-ready sources fail
    /// without touching the running session.
    pub fn start(
        &self,
        id: impl Into<String>,
        mut source: Box<dyn FrameSource>,
        config: SessionConfig,
    ) -> Result<Arc<InferenceSession>, SessionError> {
        config.validate()?;
        if !source.is_ready() {
            let description = source.describe();
            source.release();
            return Err(SessionError::SourceNotReady(description));
        }

        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prior) = active.take() {
            tracing::info!(session_id = %prior.session.id(), "Replacing running session");
            self.shutdown(prior, true);
        }

        let id = id.into();
        let session = Arc::new(InferenceSession::new(
            id.clone(),
            source,
            config,
            self.settings.clone(),
            Arc::clone(&self.detector),
            Arc::clone(&self.notifier),
        ));

        let (done_tx, done_rx) = bounded::<()>(0);
        let worker_session = Arc::clone(&session);
        let spawned = std::thread::Builder::new()
            .name(format!("inference-{}", id))
            .spawn(move || {
                let _done = done_tx;
                worker_session.run();
            });

        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                session.release_source();
                self.set_view(ControllerState::Idle, None);
                return Err(e.into());
            }
        };

        *active = Some(ActiveSession {
            session: Arc::clone(&session),
            done: done_rx,
            worker,
        });
        self.set_view(ControllerState::Running, Some(Arc::clone(&session)));

        tracing::info!(
            session_id = %id,
            source = %session.source_description(),
            "Session started"
        );
        Ok(session)
    }

    /// Stop the active session. Returns false when there was none.
    ///
    /// Waits up to `stop_timeout` for the loop to exit; ends `Idle` either way.
    pub fn stop(&self) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(prior) = active.take() else {
            return false;
        };

        let session_id = prior.session.id().to_string();
        self.shutdown(prior, false);
        self.set_view(ControllerState::Idle, None);

        tracing::info!(session_id = %session_id, "Session stopped");
        true
    }

    /// Cancel and wait for the worker. With `wait_for_release` the source is
    /// released even if the worker is stuck mid-iteration, blocking on any read
    /// in flight; otherwise release after a timeout is left to the loop's exit.
    fn shutdown(&self, prior: ActiveSession, wait_for_release: bool) {
        self.set_state(ControllerState::Stopping);
        prior.session.cancellation_token().cancel();

        match prior.done.recv_timeout(self.settings.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if prior.worker.join().is_err() {
                    tracing::error!(session_id = %prior.session.id(), "Inference worker panicked");
                    prior.session.release_source();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    session_id = %prior.session.id(),
                    timeout_ms = self.settings.stop_timeout.as_millis(),
                    "Inference loop did not exit in time"
                );
                if wait_for_release {
                    prior.session.release_source();
                } else if !prior.session.try_release_source() {
                    tracing::warn!(
                        session_id = %prior.session.id(),
                        "Frame read in flight, source release deferred to loop exit"
                    );
                }
            }
        }
    }

    fn require_session(&self) -> Result<Arc<InferenceSession>, SessionError> {
        self.current_session().ok_or(SessionError::NoActiveSession)
    }

    pub fn get_recent(&self, limit: usize) -> Result<Vec<Arc<DetectionRecord>>, SessionError> {
        Ok(self.require_session()?.get_recent(limit))
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Arc<DetectionRecord>>, SessionError> {
        Ok(self.require_session()?.get_by_id(id))
    }

    pub fn latest_frame(&self) -> Result<Option<Arc<AnnotatedFrame>>, SessionError> {
        Ok(self.require_session()?.latest_frame())
    }

    /// Run one step synchronously for a reader that has no frame yet.
    pub fn step_once(&self) -> Result<Option<Arc<AnnotatedFrame>>, SessionError> {
        let session = self.require_session()?;
        if let Err(e) = session.step() {
            tracing::debug!(error = %e, "On-demand step failed");
        }
        Ok(session.latest_frame())
    }

    pub fn status(&self) -> SessionStatus {
        let (state, session) = {
            let view = self.view.read().unwrap_or_else(PoisonError::into_inner);
            (view.state, view.session.clone())
        };
        let notifications = self.notifier.stats();

        match session {
            Some(session) => SessionStatus {
                state,
                session_id: Some(session.id().to_string()),
                source: Some(session.source_description().to_string()),
                frames_read: session.frames_read(),
                frames_processed: session.frames_processed(),
                detections_total: session.detections_total(),
                finished: session.is_finished(),
                has_frame: session.latest_frame().is_some(),
                notifications,
            },
            None => SessionStatus {
                state,
                session_id: None,
                source: None,
                frames_read: 0,
                frames_processed: 0,
                detections_total: 0,
                finished: false,
                has_frame: false,
                notifications,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{NoopDetector, shared};
    use crate::notify::LogSink;
    use crate::source::SyntheticSource;
    use std::time::Duration;

    fn controller() -> SessionController {
        let notifier = NotificationDispatcher::spawn(Arc::new(LogSink), 4).unwrap();
        SessionController::new(
            shared(NoopDetector),
            Arc::new(notifier),
            LoopSettings {
                frame_interval: Duration::from_millis(1),
                ..Default::default()
            },
        )
    }

    #[test]
    fn starts_idle() {
        let controller = controller();
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.current_session().is_none());

        let status = controller.status();
        assert_eq!(status.state, ControllerState::Idle);
        assert!(status.session_id.is_none());
    }

    #[test]
    fn stop_when_idle_is_noop() {
        let controller = controller();
        assert!(!controller.stop());
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn queries_without_session_report_no_active_session() {
        let controller = controller();
        assert!(matches!(controller.get_recent(10), Err(SessionError::NoActiveSession)));
        assert!(matches!(controller.get_by_id("x"), Err(SessionError::NoActiveSession)));
        assert!(matches!(controller.latest_frame(), Err(SessionError::NoActiveSession)));
        assert!(matches!(controller.step_once(), Err(SessionError::NoActiveSession)));
    }

    #[test]
    fn invalid_config_leaves_state_untouched() {
        let controller = controller();
        let config = SessionConfig {
            sample_rate: 0,
            ..Default::default()
        };
        let result = controller.start("bad", Box::new(SyntheticSource::new(5, 8, 8)), config);

        assert!(matches!(result, Err(SessionError::InvalidConfig(_))));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn non_ready_source_fails_start() {
        let controller = controller();
        let result = controller.start(
            "empty",
            Box::new(SyntheticSource::new(5, 0, 0)),
            SessionConfig::default(),
        );

        assert!(matches!(result, Err(SessionError::SourceNotReady(_))));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn start_then_stop_returns_to_idle() {
        let controller = controller();
        controller
            .start("s1", Box::new(SyntheticSource::new(1_000, 8, 8)), SessionConfig::default())
            .unwrap();
        assert_eq!(controller.state(), ControllerState::Running);
        assert_eq!(controller.status().session_id.as_deref(), Some("s1"));

        assert!(controller.stop());
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.current_session().is_none());
    }
}
