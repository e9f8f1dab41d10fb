use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::form::Form;

pub type SubmissionId = u64;

// Reported when the request could not be written to the server
pub const STATUS_SEND_FAILED: u16 = 499;

/// Outcome of one submission, published on the manager's event channel.
#[derive(Debug, Clone, Serialize)]
pub struct FormResponse {
    pub id: SubmissionId,
    pub form: Form,
    pub action: String,
    pub ok: bool,
    pub status: u16,
    pub reason: String,
    pub content_type: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub body: String,
    pub canceled: bool,
    pub ignore_reply: bool,
    pub error: Option<String>,
}

impl FormResponse {
    pub fn pending(id: SubmissionId, form: Form, ignore_reply: bool) -> Self {
        Self {
            id,
            form,
            action: String::new(),
            ok: false,
            status: 0,
            reason: String::new(),
            content_type: String::new(),
            timestamp: None,
            body: String::new(),
            canceled: false,
            ignore_reply,
            error: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.form.url
    }

    pub fn fail(&mut self, status: u16, error: impl Into<String>) {
        self.ok = false;
        self.status = status;
        self.error = Some(error.into());
    }
}
