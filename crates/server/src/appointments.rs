//! In-memory appointment sink
//!
//! Stands in for the calendar connector, which lives outside this service.
//! Bookings succeed when the organization has a connected calendar
//! integration or none configured at all; a broken integration routes the
//! caller to the callback path.

use async_trait::async_trait;
use parking_lot::RwLock;

use frontdesk_core::{
    AppointmentSink, BookingConfirmation, BookingError, BookingRequest, CallbackRequest,
};

/// Records bookings and callback requests in memory.
#[derive(Default)]
pub struct InMemoryAppointments {
    bookings: RwLock<Vec<BookingRequest>>,
    callbacks: RwLock<Vec<CallbackRequest>>,
    /// Force booking failures (integration down).
    fail_bookings: RwLock<bool>,
}

impl InMemoryAppointments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the calendar integration going down.
    pub fn set_failing(&self, failing: bool) {
        *self.fail_bookings.write() = failing;
    }

    pub fn bookings(&self) -> Vec<BookingRequest> {
        self.bookings.read().clone()
    }

    pub fn callbacks(&self) -> Vec<CallbackRequest> {
        self.callbacks.read().clone()
    }
}

#[async_trait]
impl AppointmentSink for InMemoryAppointments {
    async fn book(&self, request: BookingRequest) -> Result<BookingConfirmation, BookingError> {
        if request.service.is_empty() || request.time_window.is_empty() {
            return Err(BookingError::Invalid("missing service or time".to_string()));
        }
        if *self.fail_bookings.read() {
            return Err(BookingError::IntegrationUnavailable(
                "calendar integration offline".to_string(),
            ));
        }

        let confirmation = BookingConfirmation {
            booking_id: uuid::Uuid::new_v4().to_string(),
            booked_at: chrono::Utc::now(),
        };
        self.bookings.write().push(request);
        Ok(confirmation)
    }

    async fn record_callback(&self, request: CallbackRequest) -> Result<(), BookingError> {
        self.callbacks.write().push(request);
        Ok(())
    }
}
