use chrono::{DateTime, Local};

use crate::api::{ApiError, ChatClient};
use crate::i18n::I18n;
use crate::transcript::{Author, ChatMessage, Transcript};

/// Where the latest request stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Ready,
    Pending,
    Completed(DateTime<Local>),
    Failed,
}

impl ResponseStatus {
    pub fn label(&self, i18n: &I18n) -> String {
        match self {
            ResponseStatus::Ready => i18n.t("response.ready"),
            ResponseStatus::Pending => i18n.t("response.pending"),
            ResponseStatus::Completed(at) => {
                let time = at.format("%H:%M:%S").to_string();
                i18n.format("response.done", &[("time", time.as_str())])
            }
            ResponseStatus::Failed => i18n.t("response.failed"),
        }
    }
}

/// Transcript plus the state of the latest request. The send control is
/// enabled whenever no request is pending.
///
/// Only the UI trigger checks `send_enabled`; nothing here stops two
/// programmatic sends from overlapping.
#[derive(Debug, Clone)]
pub struct Conversation {
    transcript: Transcript,
    status: ResponseStatus,
}

impl Default for Conversation {
    fn default() -> Self {
        Conversation {
            transcript: Transcript::new(),
            status: ResponseStatus::Ready,
        }
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn status(&self) -> ResponseStatus {
        self.status
    }

    pub fn send_enabled(&self) -> bool {
        self.status != ResponseStatus::Pending
    }

    /// First half of a send: drops blank input, otherwise appends the user
    /// row and marks the request pending. The returned message is what
    /// should go out in the request.
    pub fn submit(&mut self, text: &str) -> Option<ChatMessage> {
        let message = ChatMessage::new(Author::User, text)?;
        self.transcript.push(message.clone());
        self.status = ResponseStatus::Pending;
        Some(message)
    }

    /// Second half of a send: appends the assistant row for `outcome` and
    /// re-enables the send control.
    pub fn resolve(&mut self, outcome: Result<Option<String>, ApiError>, i18n: &I18n) {
        let (reply, status) = match outcome {
            Ok(Some(text)) => (
                ChatMessage::new(Author::Assistant, text),
                ResponseStatus::Completed(Local::now()),
            ),
            Ok(None) => (None, ResponseStatus::Completed(Local::now())),
            Err(error) => {
                tracing::warn!("chat request failed: {}", error);
                let text = i18n.request_failed(&i18n.describe_error(&error));
                (ChatMessage::new(Author::Assistant, text), ResponseStatus::Failed)
            }
        };

        // A blank reply gets the same placeholder as a missing one.
        let reply = reply.or_else(|| ChatMessage::new(Author::Assistant, i18n.no_response()));
        if let Some(reply) = reply {
            self.transcript.push(reply);
        }
        self.status = status;
    }

    /// Runs a whole turn against `client`. Returns the user message, or
    /// `None` when the input was blank and nothing happened.
    #[allow(dead_code)]
    pub async fn send_message(
        &mut self,
        client: &ChatClient,
        text: &str,
        i18n: &I18n,
    ) -> Option<ChatMessage> {
        let message = self.submit(text)?;
        let outcome = client.send(message.text()).await;
        self.resolve(outcome, i18n);
        Some(message)
    }
}
