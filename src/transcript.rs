use chrono::{DateTime, Local};

use crate::language::Language;

pub const WELCOME_TEXT: &str = "আস্সালামু আলাইকুম! আমি আপনার বাংলা ও ইংরেজি প্রশ্নের উত্তর দিতে পারি। HSC বাংলা সাহিত্য সম্পর্কে যেকোনো প্রশ্ন করুন।\n\nHello! I can answer your questions in both Bengali and English. Feel free to ask any questions about HSC Bangla literature.";

/// Offered while the transcript holds nothing but the welcome message.
pub const SAMPLE_QUESTIONS: [&str; 4] = [
    "অনুপমের ভাষায় সুপুরুষ কাকে বলা হয়েছে?",
    "কাকে অনুপমের ভাগ্য দেবতা বলে উল্লেখ করা হয়েছে?",
    "বিয়ের সময় কল্যাণীর প্রকৃত বয়স কত ছিল?",
    "Who is described as a good man according to Anupam?",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
    pub confidence_score: Option<f64>,
    pub source_count: Option<u32>,
    pub detected_language: Option<Language>,
    pub is_error: bool,
}

impl ChatMessage {
    fn new(role: Role, content: String) -> Self {
        ChatMessage {
            role,
            content,
            // Restamped by MessageLog::append
            timestamp: Local::now(),
            confidence_score: None,
            source_count: None,
            detected_language: None,
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into())
    }

    pub fn welcome() -> Self {
        Self::new(Role::Assistant, WELCOME_TEXT.to_string())
    }

    /// Scores outside `0.0..=1.0` are dropped rather than displayed.
    pub fn answer(
        content: impl Into<String>,
        confidence_score: Option<f64>,
        source_count: u32,
        detected_language: Language,
    ) -> Self {
        ChatMessage {
            confidence_score: confidence_score.filter(|s| (0.0..=1.0).contains(s)),
            source_count: Some(source_count),
            detected_language: Some(detected_language),
            ..Self::new(Role::Assistant, content.into())
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        ChatMessage {
            is_error: true,
            ..Self::new(Role::Assistant, content.into())
        }
    }

    pub fn time_label(&self) -> String {
        self.timestamp.format("%H:%M").to_string()
    }

    /// Source, confidence and language line shown under a successful answer.
    pub fn meta_line(&self) -> Option<String> {
        if self.role != Role::Assistant || self.is_error {
            return None;
        }
        let sources = self.source_count?;

        let mut parts = vec![format!("সূত্র: {}টি", sources)];
        if let Some(score) = self.confidence_score {
            parts.push(format!("নির্ভরযোগ্যতা: {:.0}%", score * 100.0));
        }
        if let Some(lang) = self.detected_language {
            parts.push(format!("ভাষা: {}", lang.display_name()));
        }
        Some(parts.join("  ·  "))
    }
}

/// Append-only, ordered transcript.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    entries: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp the message with the current time and add it to the end of the
    /// log. Returns the new length.
    pub fn append(&mut self, mut message: ChatMessage) -> usize {
        message.timestamp = Local::now();
        self.entries.push(message);
        self.entries.len()
    }

    pub fn snapshot(&self) -> &[ChatMessage] {
        &self.entries
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.entries.last()
    }
}
