//! Core types for the phone booking voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Audio frame types (8 kHz mu-law telephony audio)
//! - Organization context (per-number configuration resolved at call start)
//! - Slot store for accumulating booking data across turns
//! - Turn and call records emitted to the event sink
//! - Phone number normalization (E.164)
//! - Collaborator traits for external systems
//! - Error taxonomy

pub mod audio;
pub mod error;
pub mod org;
pub mod phone;
pub mod record;
pub mod slots;
pub mod traits;

pub use audio::{AudioFrame, FRAME_BYTES, FRAME_MS, MULAW_SAMPLE_RATE_HZ};
pub use error::{Error, ErrorCategory, Result};
pub use org::{
    BusinessHours, DayHours, Integration, IntegrationStatus, OrgRules, OrganizationContext,
    Service, VoiceSettings, Weekday,
};
pub use phone::normalize_e164;
pub use record::{CallStatus, CallUpdate, TurnRecord};
pub use slots::{EntityPatch, SlotKey, SlotStore, SlotValue};

pub use traits::{
    AppointmentSink, BookingConfirmation, BookingError, BookingRequest, CallbackRequest,
    EventSink, NullEventSink, OrgContextProvider,
};
