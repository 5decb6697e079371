//! Exam controller: the one task that owns the flow, the device check and
//! the active capture session. Everything else talks to it through
//! `ExamHandle`.

use serde::Serialize;
use std::future::pending;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::capture::{CaptureContext, CaptureHandle, CaptureMachine, CaptureOptions, CaptureStatus};
use crate::exam::{
    script, DeviceCheck, ExamFlow, ExamStep, FlowError, Recording, RecordingSummary, SessionScript,
    User, EXAM_RULES,
};
use crate::media::{AcquisitionError, MediaTrackStatus, PreviewBinding};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error(transparent)]
    Acquisition(#[from] AcquisitionError),
    #[error("Exam controller is not running")]
    Unavailable,
}

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

pub enum ApiCommand {
    Login {
        full_name: String,
        password: String,
        reply: Reply<User>,
    },
    RetryDevices {
        reply: Reply<MediaTrackStatus>,
    },
    StartExam {
        reply: Reply<ExamStep>,
    },
    FinishSession {
        reply: Reply<CaptureStatus>,
    },
    RescueSession {
        reply: Reply<CaptureStatus>,
    },
    ReloadSession {
        reply: Reply<u8>,
    },
    ContinueFromBreak {
        reply: Reply<ExamStep>,
    },
    Snapshot {
        reply: oneshot::Sender<ExamSnapshot>,
    },
    Recordings {
        reply: oneshot::Sender<Vec<RecordingSummary>>,
    },
    Recording {
        session_number: u8,
        reply: oneshot::Sender<Option<Recording>>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub readiness: MediaTrackStatus,
    pub error: Option<AcquisitionError>,
    pub can_start: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub script: SessionScript,
    pub status: CaptureStatus,
    pub progress_percent: u32,
}

/// Everything a front end needs to render the current screen.
#[derive(Debug, Clone, Serialize)]
pub struct ExamSnapshot {
    pub step: ExamStep,
    pub user: Option<User>,
    pub rules: Vec<&'static str>,
    pub devices: Option<DeviceSnapshot>,
    pub session: Option<SessionSnapshot>,
    pub up_next: Option<&'static str>,
    pub recordings: Vec<RecordingSummary>,
    pub preview: Option<PreviewBinding>,
}

/// Cloneable client for the controller task.
#[derive(Clone)]
pub struct ExamHandle {
    tx: mpsc::Sender<ApiCommand>,
    shutdown: CancellationToken,
}

impl ExamHandle {
    /// Stop the controller. It disposes the running session and releases
    /// the device check before its task returns.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub async fn login(&self, full_name: &str, password: &str) -> Result<User, CommandError> {
        let full_name = full_name.to_string();
        let password = password.to_string();
        self.request(|reply| ApiCommand::Login {
            full_name,
            password,
            reply,
        })
        .await
    }

    pub async fn retry_devices(&self) -> Result<MediaTrackStatus, CommandError> {
        self.request(|reply| ApiCommand::RetryDevices { reply }).await
    }

    pub async fn start_exam(&self) -> Result<ExamStep, CommandError> {
        self.request(|reply| ApiCommand::StartExam { reply }).await
    }

    pub async fn finish_session(&self) -> Result<CaptureStatus, CommandError> {
        self.request(|reply| ApiCommand::FinishSession { reply }).await
    }

    pub async fn rescue_session(&self) -> Result<CaptureStatus, CommandError> {
        self.request(|reply| ApiCommand::RescueSession { reply }).await
    }

    pub async fn reload_session(&self) -> Result<u8, CommandError> {
        self.request(|reply| ApiCommand::ReloadSession { reply }).await
    }

    pub async fn continue_from_break(&self) -> Result<ExamStep, CommandError> {
        self.request(|reply| ApiCommand::ContinueFromBreak { reply })
            .await
    }

    pub async fn snapshot(&self) -> Result<ExamSnapshot, CommandError> {
        self.query(|reply| ApiCommand::Snapshot { reply }).await
    }

    pub async fn recordings(&self) -> Result<Vec<RecordingSummary>, CommandError> {
        self.query(|reply| ApiCommand::Recordings { reply }).await
    }

    pub async fn recording(&self, session_number: u8) -> Result<Option<Recording>, CommandError> {
        self.query(|reply| ApiCommand::Recording {
            session_number,
            reply,
        })
        .await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> ApiCommand,
    ) -> Result<T, CommandError> {
        self.query(command).await?
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ApiCommand,
    ) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| CommandError::Unavailable)?;
        response.await.map_err(|_| CommandError::Unavailable)
    }
}

pub struct ExamController {
    flow: ExamFlow,
    check: DeviceCheck,
    authenticator: Arc<dyn Authenticator>,
    context: CaptureContext,
    options: CaptureOptions,
    capture: Option<CaptureHandle>,
    completion: Option<oneshot::Receiver<Recording>>,
}

impl ExamController {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        context: CaptureContext,
        options: CaptureOptions,
    ) -> Self {
        let check = DeviceCheck::new(
            context.devices.clone(),
            context.preview.clone(),
            options.health_poll,
        );

        Self {
            flow: ExamFlow::new(),
            check,
            authenticator,
            context,
            options,
            capture: None,
            completion: None,
        }
    }

    /// Run the controller on its own task.
    pub fn spawn(self) -> (ExamHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(self.run(rx, shutdown.clone()));
        (ExamHandle { tx, shutdown }, task)
    }

    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<ApiCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                completed = next_completion(&mut self.completion) => {
                    self.completion = None;
                    match completed {
                        Ok(recording) => self.on_session_complete(recording).await,
                        Err(_) => debug!("Session ended without a recording"),
                    }
                }
            }
        }

        info!("Exam controller shutting down");
        if let Some(capture) = self.capture.take() {
            capture.dispose().await;
        }
        self.check.release();
    }

    async fn handle(&mut self, command: ApiCommand) {
        match command {
            ApiCommand::Login {
                full_name,
                password,
                reply,
            } => {
                let result = self.login(&full_name, &password).await;
                let _ = reply.send(result);
            }
            ApiCommand::RetryDevices { reply } => {
                let result = self.retry_devices().await;
                let _ = reply.send(result);
            }
            ApiCommand::StartExam { reply } => {
                let result = self.start_exam().await;
                let _ = reply.send(result);
            }
            ApiCommand::FinishSession { reply } => {
                let result = self.with_capture("finish", |capture| capture.finish());
                let _ = reply.send(result);
            }
            ApiCommand::RescueSession { reply } => {
                let result = self.with_capture("continue", |capture| capture.rescue_continue());
                let _ = reply.send(result);
            }
            ApiCommand::ReloadSession { reply } => {
                let result = self.reload_session().await;
                let _ = reply.send(result);
            }
            ApiCommand::ContinueFromBreak { reply } => {
                let result = self.continue_from_break().await;
                let _ = reply.send(result);
            }
            ApiCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ApiCommand::Recordings { reply } => {
                let _ = reply.send(self.flow.summaries());
            }
            ApiCommand::Recording {
                session_number,
                reply,
            } => {
                let _ = reply.send(self.flow.recording(session_number).cloned());
            }
        }
    }

    async fn login(&mut self, full_name: &str, password: &str) -> Result<User, CommandError> {
        let user = self
            .flow
            .login(self.authenticator.as_ref(), full_name, password)
            .await?
            .clone();

        // The dashboard checks devices as soon as it opens.
        if let Err(e) = self.check.acquire().await {
            warn!("Initial device check failed: {}", e);
        }
        Ok(user)
    }

    async fn retry_devices(&mut self) -> Result<MediaTrackStatus, CommandError> {
        if self.flow.step() != ExamStep::Dashboard {
            return Err(FlowError::InvalidStep {
                action: "check devices",
                step: self.flow.step(),
            }
            .into());
        }
        Ok(self.check.acquire().await?)
    }

    async fn start_exam(&mut self) -> Result<ExamStep, CommandError> {
        let step = self.flow.start_exam(self.check.readiness())?;
        self.check.release();
        self.start_session(1).await;
        Ok(step)
    }

    async fn continue_from_break(&mut self) -> Result<ExamStep, CommandError> {
        let step = self.flow.continue_from_break()?;
        if let ExamStep::Session(n) = step {
            self.start_session(n).await;
        }
        Ok(step)
    }

    async fn reload_session(&mut self) -> Result<u8, CommandError> {
        let Some(n) = self.flow.active_session() else {
            return Err(FlowError::InvalidStep {
                action: "reload",
                step: self.flow.step(),
            }
            .into());
        };
        info!("Reloading session {}", n);
        self.start_session(n).await;
        Ok(n)
    }

    fn with_capture(
        &self,
        action: &'static str,
        f: impl FnOnce(&CaptureHandle),
    ) -> Result<CaptureStatus, CommandError> {
        match (&self.capture, self.flow.active_session()) {
            (Some(capture), Some(n)) if capture.session_number() == n => {
                f(capture);
                Ok(capture.status())
            }
            _ => Err(FlowError::InvalidStep {
                action,
                step: self.flow.step(),
            }
            .into()),
        }
    }

    /// Replace whatever session is running with a fresh one for `n`.
    async fn start_session(&mut self, n: u8) {
        if let Some(previous) = self.capture.take() {
            previous.dispose().await;
        }
        self.completion = None;

        let full_name = self
            .flow
            .user()
            .map(|u| u.full_name.clone())
            .unwrap_or_default();

        let (tx, rx) = oneshot::channel();
        self.capture = Some(CaptureMachine::spawn(
            n,
            full_name,
            self.options.clone(),
            self.context.clone(),
            tx,
        ));
        self.completion = Some(rx);
    }

    async fn on_session_complete(&mut self, recording: Recording) {
        let n = recording.session_number();
        if let Some(capture) = self.capture.take() {
            capture.dispose().await;
        }

        match self.flow.on_session_complete(n, recording) {
            Ok(step) => info!("Session {} stored, now at {}", n, step),
            Err(e) => error!("Could not store session {}: {}", n, e),
        }
    }

    fn snapshot(&self) -> ExamSnapshot {
        let step = self.flow.step();

        let devices = (step == ExamStep::Dashboard).then(|| {
            let readiness = self.check.readiness();
            DeviceSnapshot {
                readiness,
                error: self.check.last_error().cloned(),
                can_start: readiness.all_ready(),
            }
        });

        let session = self.flow.active_session().and_then(|n| {
            let script = *script::session(n)?;
            let status = self
                .capture
                .as_ref()
                .filter(|c| c.session_number() == n)?
                .status();
            Some(SessionSnapshot {
                script,
                progress_percent: status.progress_percent(),
                status,
            })
        });

        let up_next = match step {
            ExamStep::Break(n) => script::break_label(n),
            _ => None,
        };

        ExamSnapshot {
            step,
            user: self.flow.user().cloned(),
            rules: if step == ExamStep::Dashboard {
                EXAM_RULES.to_vec()
            } else {
                Vec::new()
            },
            devices,
            session,
            up_next,
            recordings: self.flow.summaries(),
            preview: self.context.preview.current(),
        }
    }
}

async fn next_completion(
    completion: &mut Option<oneshot::Receiver<Recording>>,
) -> Result<Recording, oneshot::error::RecvError> {
    match completion {
        Some(rx) => rx.await,
        None => pending().await,
    }
}
