//! Calendar collaborator
//!
//! The booking action state persists the appointment through this trait.
//! An integration failure is not a call failure: the state machine records
//! a callback request and tells the caller someone will confirm.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Appointment to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    pub org_id: String,
    pub session_id: String,
    pub service: String,
    /// Caller-phrased window, e.g. "Tuesday at 3 PM".
    pub time_window: String,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Confirmed appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub booking_id: String,
    pub booked_at: DateTime<Utc>,
}

/// Callback request recorded when the calendar integration fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub org_id: String,
    pub session_id: String,
    pub caller_number: String,
    pub service: Option<String>,
    pub time_window: Option<String>,
    pub requested_at: DateTime<Utc>,
}

/// Booking failures.
#[derive(Error, Debug)]
pub enum BookingError {
    #[error("calendar integration unavailable: {0}")]
    IntegrationUnavailable(String),

    #[error("slot conflict: {0}")]
    Conflict(String),

    #[error("invalid booking request: {0}")]
    Invalid(String),
}

/// Persists appointments and callback requests.
#[async_trait]
pub trait AppointmentSink: Send + Sync {
    async fn book(&self, request: BookingRequest) -> Result<BookingConfirmation, BookingError>;

    /// Best-effort; failures are logged by the caller and the call
    /// continues to the callback-scheduled script regardless.
    async fn record_callback(&self, request: CallbackRequest) -> Result<(), BookingError>;
}
