//! Collaborator traits
//!
//! The voice path touches external systems only through these seams:
//! organization lookup, the append-only event sink, and the calendar
//! collaborator used by the booking action. Each is injected at session
//! construction; nothing reaches for a global.

mod booking;
mod events;
mod org;

pub use booking::{
    AppointmentSink, BookingConfirmation, BookingError, BookingRequest, CallbackRequest,
};
pub use events::{EventSink, NullEventSink};
pub use org::OrgContextProvider;
