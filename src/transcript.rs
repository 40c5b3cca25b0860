use chrono::{DateTime, Local};

use crate::layout::BubbleGeometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    pub fn is_user(self) -> bool {
        matches!(self, Author::User)
    }
}

/// One chat turn. Text is never empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    author: Author,
    text: String,
    created_at: DateTime<Local>,
}

impl ChatMessage {
    pub fn new(author: Author, text: impl Into<String>) -> Option<Self> {
        Self::at(author, text, Local::now())
    }

    pub fn at(author: Author, text: impl Into<String>, created_at: DateTime<Local>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return None;
        }
        Some(ChatMessage {
            author,
            text,
            created_at,
        })
    }

    pub fn author(&self) -> Author {
        self.author
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Local time of day the message was created, as `HH:MM`.
    pub fn timestamp(&self) -> String {
        self.created_at.format("%H:%M").to_string()
    }
}

#[derive(Debug, Clone)]
pub struct TranscriptRow {
    message: ChatMessage,
    geometry: BubbleGeometry,
}

impl TranscriptRow {
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    /// Geometry from the most recent layout pass.
    pub fn geometry(&self) -> BubbleGeometry {
        self.geometry
    }

    pub(crate) fn set_geometry(&mut self, geometry: BubbleGeometry) {
        self.geometry = geometry;
    }
}

/// Append-only list of rows for the current session.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    rows: Vec<TranscriptRow>,
    content_height: f32,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.rows.push(TranscriptRow {
            message,
            geometry: BubbleGeometry::default(),
        });
    }

    pub fn rows(&self) -> &[TranscriptRow] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [TranscriptRow] {
        &mut self.rows
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[allow(dead_code)]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.rows.last().map(|row| &row.message)
    }

    pub fn content_height(&self) -> f32 {
        self.content_height
    }

    pub(crate) fn set_content_height(&mut self, height: f32) {
        self.content_height = height;
    }
}
