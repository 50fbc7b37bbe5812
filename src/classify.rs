use std::fmt;

use crate::backend::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    NetworkUnreachable,
    HttpError,
    Unknown,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::NetworkUnreachable => "network_unreachable",
            Category::HttpError => "http_error",
            Category::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub category: Category,
    pub message: String,
}

/// Turns a failed exchange into bilingual guidance for the transcript.
///
/// Every message ends with an `Error: ...` line carrying the raw error text.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    base_url: String,
    port: String,
    startup_script: String,
}

impl ErrorClassifier {
    pub fn new(base_url: &str, startup_script: &str) -> Self {
        let port = reqwest::Url::parse(base_url)
            .ok()
            .and_then(|url| url.port_or_known_default())
            .map(|p| p.to_string())
            .unwrap_or_else(|| "8000".to_string());

        ErrorClassifier {
            base_url: base_url.to_string(),
            port,
            startup_script: startup_script.to_string(),
        }
    }

    pub fn classify(&self, failure: &BackendError) -> Classified {
        let (category, guidance) = match failure {
            BackendError::Unreachable(_) => (
                Category::NetworkUnreachable,
                format!(
                    "সার্ভারের সাথে সংযোগ করা যাচ্ছে না। অনুগ্রহ করে পোর্ট {port}-এ ব্যাকএন্ড সার্ভার চালু করুন, অথবা {script} স্ক্রিপ্ট চালান।\n\n\
                     Cannot connect to the server at {url}. Please start the backend server on port {port}, or run the {script} script.",
                    port = self.port,
                    script = self.startup_script,
                    url = self.base_url,
                ),
            ),
            BackendError::Http { status, body } => {
                let mut text = format!(
                    "সার্ভার একটি ত্রুটি ফেরত দিয়েছে (স্ট্যাটাস {status})। অনুগ্রহ করে আবার চেষ্টা করুন।\n\n\
                     The server returned an error (status {status}). Please try again.",
                );
                if !body.trim().is_empty() {
                    text.push_str(&format!("\n\nServer response: {}", body.trim()));
                }
                (Category::HttpError, text)
            }
            BackendError::Decode(_) | BackendError::Other(_) => (
                Category::Unknown,
                "দুঃখিত, একটি ত্রুটি হয়েছে। অনুগ্রহ করে আবার চেষ্টা করুন।\n\n\
                 Sorry, there was an error. Please try again."
                    .to_string(),
            ),
        };

        Classified {
            category,
            message: format!("{}\n\nError: {}", guidance, failure),
        }
    }
}
