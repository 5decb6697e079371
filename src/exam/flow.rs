//! Exam step sequencing and the per-session recordings.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::media::MediaTrackStatus;

use super::recording::{Recording, RecordingSummary};
use super::script::SESSION_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "step", content = "number", rename_all = "snake_case")]
pub enum ExamStep {
    Login,
    Dashboard,
    Session(u8),
    Break(u8),
    Completion,
}

impl fmt::Display for ExamStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExamStep::Login => write!(f, "login"),
            ExamStep::Dashboard => write!(f, "dashboard"),
            ExamStep::Session(n) => write!(f, "session {n}"),
            ExamStep::Break(n) => write!(f, "break {n}"),
            ExamStep::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("Please fill in all fields")]
    MissingCredentials,
    #[error("Authentication failed. Check your name and password format.")]
    AuthenticationFailed,
    #[error("Camera and microphone must both be ready before starting")]
    DevicesNotReady,
    #[error("Cannot {action} during {step}")]
    InvalidStep { action: &'static str, step: ExamStep },
    #[error("Unknown session {0}")]
    UnknownSession(u8),
}

/// Current step, the examinee and the recordings collected so far.
#[derive(Debug)]
pub struct ExamFlow {
    user: Option<User>,
    step: ExamStep,
    recordings: BTreeMap<u8, Recording>,
}

impl Default for ExamFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ExamFlow {
    pub fn new() -> Self {
        Self {
            user: None,
            step: ExamStep::Login,
            recordings: BTreeMap::new(),
        }
    }

    pub fn step(&self) -> ExamStep {
        self.step
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub async fn login(
        &mut self,
        authenticator: &dyn Authenticator,
        full_name: &str,
        password: &str,
    ) -> Result<&User, FlowError> {
        self.expect_step(ExamStep::Login, "log in")?;
        if full_name.is_empty() || password.is_empty() {
            return Err(FlowError::MissingCredentials);
        }

        if !authenticator.authenticate(full_name, password).await {
            return Err(FlowError::AuthenticationFailed);
        }

        info!("Examinee '{}' logged in", full_name);
        self.step = ExamStep::Dashboard;
        Ok(self.user.insert(User {
            full_name: full_name.to_string(),
        }))
    }

    pub fn start_exam(&mut self, readiness: MediaTrackStatus) -> Result<ExamStep, FlowError> {
        self.expect_step(ExamStep::Dashboard, "start the exam")?;
        if !readiness.all_ready() {
            return Err(FlowError::DevicesNotReady);
        }
        self.advance(ExamStep::Session(1));
        Ok(self.step)
    }

    /// Store the artifact for `session_number`, replacing any earlier one.
    /// The step only moves if that session is the one on screen.
    pub fn on_session_complete(
        &mut self,
        session_number: u8,
        recording: Recording,
    ) -> Result<ExamStep, FlowError> {
        let next = match session_number {
            n if n < SESSION_COUNT && n > 0 => ExamStep::Break(n),
            SESSION_COUNT => ExamStep::Completion,
            other => return Err(FlowError::UnknownSession(other)),
        };

        if let Some(previous) = self.recordings.insert(session_number, recording) {
            warn!(
                "Session {} reported twice, replaced {} bytes",
                session_number,
                previous.data().len()
            );
        }

        if self.step == ExamStep::Session(session_number) {
            self.advance(next);
        } else {
            warn!(
                "Session {} completed during {}, step unchanged",
                session_number, self.step
            );
        }
        Ok(self.step)
    }

    pub fn continue_from_break(&mut self) -> Result<ExamStep, FlowError> {
        match self.step {
            ExamStep::Break(n) => {
                self.advance(ExamStep::Session(n + 1));
                Ok(self.step)
            }
            step => Err(FlowError::InvalidStep {
                action: "continue",
                step,
            }),
        }
    }

    /// Session currently on screen, if any.
    pub fn active_session(&self) -> Option<u8> {
        match self.step {
            ExamStep::Session(n) => Some(n),
            _ => None,
        }
    }

    pub fn recording(&self, session_number: u8) -> Option<&Recording> {
        self.recordings.get(&session_number)
    }

    pub fn recordings(&self) -> impl Iterator<Item = &Recording> {
        self.recordings.values()
    }

    pub fn summaries(&self) -> Vec<RecordingSummary> {
        self.recordings.values().map(Recording::summary).collect()
    }

    fn expect_step(&self, expected: ExamStep, action: &'static str) -> Result<(), FlowError> {
        if self.step != expected {
            return Err(FlowError::InvalidStep {
                action,
                step: self.step,
            });
        }
        Ok(())
    }

    fn advance(&mut self, next: ExamStep) {
        info!("Exam step {} -> {}", self.step, next);
        self.step = next;
    }
}
