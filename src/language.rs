use serde::{Deserialize, Serialize};

/// Language hint sent with every question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Bn,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Bn => "bn",
            Language::En => "en",
        }
    }

    /// Name of the language as shown under an answer (always in Bengali).
    pub fn display_name(self) -> &'static str {
        match self {
            Language::Bn => "বাংলা",
            Language::En => "ইংরেজি",
        }
    }
}

fn is_bengali(ch: char) -> bool {
    ('\u{0980}'..='\u{09FF}').contains(&ch)
}

/// Classify text as Bengali if it contains at least one character from the
/// Bengali block, English otherwise.
pub fn detect(text: &str) -> Language {
    if text.chars().any(is_bengali) {
        Language::Bn
    } else {
        Language::En
    }
}
