//! Prompt assembly
//!
//! Builds the message list for the extraction call: a system prompt
//! carrying the organization's services, hours, and the output contract;
//! bounded recent history; and the caller's transcript as the final user
//! message.

use crate::backend::ChatMessage;
use crate::contract::ExtractionRequest;

/// Maximum history entries included in the prompt.
const MAX_HISTORY: usize = 10;

/// Assembles extraction prompts.
pub struct PromptBuilder<'a> {
    request: &'a ExtractionRequest,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(request: &'a ExtractionRequest) -> Self {
        Self { request }
    }

    /// Build the message list for the chat-completions call.
    pub fn build(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.request.recent_history.len() + 2);

        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt(),
        });

        for entry in self
            .request
            .recent_history
            .iter()
            .rev()
            .take(MAX_HISTORY)
            .rev()
        {
            let role = match entry.role.as_str() {
                "agent" => "assistant",
                other => other,
            };
            messages.push(ChatMessage {
                role: role.to_string(),
                content: entry.text.clone(),
            });
        }

        messages.push(ChatMessage {
            role: "user".to_string(),
            content: self.request.transcript.clone(),
        });

        messages
    }

    fn system_prompt(&self) -> String {
        let services = if self.request.services.is_empty() {
            "(none listed)".to_string()
        } else {
            self.request.services.join(", ")
        };

        let slots = if self.request.slots.is_empty() {
            "(none yet)".to_string()
        } else {
            self.request
                .slots
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "You are the phone receptionist for a business, helping a caller book \
             an appointment. Classify the caller's latest utterance and extract \
             booking details.\n\
             \n\
             Bookable services: {services}\n\
             Business hours: {hours}\n\
             Timezone: {tz}\n\
             Conversation state: {state}\n\
             Details collected so far: {slots}\n\
             \n\
             Respond with a single JSON object and nothing else:\n\
             {{\n\
             \"intent\": one of \"booking\", \"service_provided\", \"time_provided\", \
             \"contact_provided\", \"confirmation_yes\", \"confirmation_no\", \
             \"digression\", \"unclear\",\n\
             \"confidence\": number between 0 and 1,\n\
             \"entities\": {{\"service\", \"time_window\", \"contact\", \"location\", \
             \"notes\" (all optional strings), \"override_slots\" (array of slot names \
             the caller explicitly asked to change)}},\n\
             \"response\": what you will say next, one or two short spoken sentences\n\
             }}\n\
             \n\
             The response must be plain speakable text: no markdown, no JSON, no \
             stage directions. Only list a service in entities if it matches the \
             bookable services. If the caller corrects an earlier detail, include \
             that slot name in override_slots.",
            services = services,
            hours = self.request.business_hours,
            tz = self.request.timezone,
            state = self.request.state,
            slots = slots,
        )
    }
}
