//! Shared application state
//!
//! The only process-wide collaborators: the pending-call store, the org
//! context cache, the event sink, and the extractor. Everything else is
//! built per call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use frontdesk_config::Settings;
use frontdesk_core::{AppointmentSink, EventSink, OrgContextProvider};
use frontdesk_llm::ExtractorBackend;
use frontdesk_transport::CallStore;

/// Process-wide state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub calls: CallStore,
    pub org_provider: Arc<dyn OrgContextProvider>,
    pub events: Arc<dyn EventSink>,
    pub appointments: Arc<dyn AppointmentSink>,
    pub extractor: Arc<dyn ExtractorBackend>,
    /// Process shutdown token; sessions derive their own from it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        settings: Settings,
        org_provider: Arc<dyn OrgContextProvider>,
        events: Arc<dyn EventSink>,
        appointments: Arc<dyn AppointmentSink>,
        extractor: Arc<dyn ExtractorBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            calls: CallStore::new(),
            org_provider,
            events,
            appointments,
            extractor,
            shutdown,
        }
    }
}
