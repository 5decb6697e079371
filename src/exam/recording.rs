//! The finished output of one session.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};

/// Immutable recording handed from a capture session to the exam flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    session_number: u8,
    data: Arc<[u8]>,
    mime_type: String,
    suggested_filename: String,
    created_at: DateTime<Utc>,
}

/// Serializable description of a recording, without its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordingSummary {
    pub session_number: u8,
    pub mime_type: String,
    pub filename: String,
    pub size_bytes: usize,
    pub created_at: DateTime<Utc>,
}

impl Recording {
    /// Join `chunks` in order into one contiguous artifact.
    pub fn assemble(
        session_number: u8,
        full_name: &str,
        mime_type: &str,
        chunks: Vec<Vec<u8>>,
    ) -> Self {
        let data: Vec<u8> = chunks.concat();
        Self {
            session_number,
            data: data.into(),
            mime_type: mime_type.to_string(),
            suggested_filename: suggested_filename(full_name, session_number),
            created_at: Utc::now(),
        }
    }

    pub fn session_number(&self) -> u8 {
        self.session_number
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn suggested_filename(&self) -> &str {
        &self.suggested_filename
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            session_number: self.session_number,
            mime_type: self.mime_type.clone(),
            filename: self.suggested_filename.clone(),
            size_bytes: self.data.len(),
            created_at: self.created_at,
        }
    }
}

/// `{full name, whitespace runs as underscores}_Session_{n}.webm`
pub fn suggested_filename(full_name: &str, session_number: u8) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let whitespace = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static pattern"));
    format!(
        "{}_Session_{}.webm",
        whitespace.replace_all(full_name, "_"),
        session_number
    )
}
