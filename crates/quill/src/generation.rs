//! Generation request types, prompt construction and the provider trait.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of content a user can generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Long-form SEO article.
    Article,
    /// List of content ideas for a topic.
    Ideas,
    /// Structured article outline.
    Outline,
    /// Review of a betting or casino platform.
    Review,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Article => "article",
            Self::Ideas => "ideas",
            Self::Outline => "outline",
            Self::Review => "review",
        }
    }
}

/// Per-user writing preferences applied to every prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritingProfile {
    pub tone: Option<String>,
    pub language: Option<String>,
    pub audience: Option<String>,
    pub brand: Option<String>,
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub kind: ContentKind,
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_count: Option<u32>,
    #[serde(default)]
    pub profile: WritingProfile,
}

impl GenerationRequest {
    pub const WORD_COUNT_RANGE: std::ops::RangeInclusive<u32> = 100..=5000;
    pub const IDEA_COUNT_RANGE: std::ops::RangeInclusive<u32> = 1..=50;
    const DEFAULT_WORD_COUNT: u32 = 1200;
    const DEFAULT_IDEA_COUNT: u32 = 10;

    pub fn new(kind: ContentKind, topic: impl Into<String>) -> Self {
        Self {
            kind,
            topic: topic.into(),
            keywords: Vec::new(),
            word_count: None,
            idea_count: None,
            profile: WritingProfile::default(),
        }
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_word_count(mut self, words: u32) -> Self {
        self.word_count = Some(words);
        self
    }

    pub fn with_idea_count(mut self, ideas: u32) -> Self {
        self.idea_count = Some(ideas);
        self
    }

    pub fn with_profile(mut self, profile: WritingProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.topic.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "topic must not be empty".to_string(),
            ));
        }
        if let Some(words) = self.word_count {
            if self.kind != ContentKind::Article {
                return Err(GenerationError::InvalidRequest(
                    "word_count only applies to articles".to_string(),
                ));
            }
            if !Self::WORD_COUNT_RANGE.contains(&words) {
                return Err(GenerationError::InvalidRequest(format!(
                    "word_count must be between {} and {}",
                    Self::WORD_COUNT_RANGE.start(),
                    Self::WORD_COUNT_RANGE.end()
                )));
            }
        }
        if let Some(ideas) = self.idea_count {
            if self.kind != ContentKind::Ideas {
                return Err(GenerationError::InvalidRequest(
                    "idea_count only applies to idea lists".to_string(),
                ));
            }
            if !Self::IDEA_COUNT_RANGE.contains(&ideas) {
                return Err(GenerationError::InvalidRequest(format!(
                    "idea_count must be between {} and {}",
                    Self::IDEA_COUNT_RANGE.start(),
                    Self::IDEA_COUNT_RANGE.end()
                )));
            }
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(GenerationError::InvalidRequest(
                "keywords must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}

/// Chat prompt sent to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn for_request(request: &GenerationRequest) -> Self {
        let profile = &request.profile;
        let mut system = String::from(
            "You are an experienced SEO copywriter for the online betting and casino industry. \
             Write accurate, compliant content that encourages responsible gambling and never \
             promises guaranteed winnings.",
        );
        if let Some(tone) = &profile.tone {
            system.push_str(&format!(" Use a {} tone.", tone.trim()));
        }
        if let Some(language) = &profile.language {
            system.push_str(&format!(" Write in {}.", language.trim()));
        }
        if let Some(audience) = &profile.audience {
            system.push_str(&format!(" The audience is {}.", audience.trim()));
        }
        if let Some(brand) = &profile.brand {
            system.push_str(&format!(" Write on behalf of {}.", brand.trim()));
        }
        if let Some(instructions) = &profile.instructions {
            system.push_str("\n\n");
            system.push_str(instructions.trim());
        }

        let topic = request.topic.trim();
        let mut user = match request.kind {
            ContentKind::Article => format!(
                "Write an SEO-optimised article of about {} words on \"{topic}\". \
                 Use markdown with one H1, descriptive H2 sections, and a short FAQ at the end.",
                request.word_count.unwrap_or(GenerationRequest::DEFAULT_WORD_COUNT)
            ),
            ContentKind::Ideas => format!(
                "Suggest {} distinct content ideas about \"{topic}\". \
                 Return a numbered list, each with a working title and one sentence on the angle.",
                request.idea_count.unwrap_or(GenerationRequest::DEFAULT_IDEA_COUNT)
            ),
            ContentKind::Outline => format!(
                "Create a detailed article outline for \"{topic}\". \
                 Return markdown headings (H2/H3) with two or three bullet points under each."
            ),
            ContentKind::Review => format!(
                "Write an honest review of the platform \"{topic}\". Cover licensing, bonuses and \
                 wagering requirements, game selection, payments, support, and a pros/cons summary."
            ),
        };
        if !request.keywords.is_empty() {
            user.push_str(&format!(
                "\n\nWork these keywords in naturally: {}.",
                request.keywords.join(", ")
            ));
        }

        Self { system, user }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Raw provider answer for one prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// Generated content returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutput {
    pub id: String,
    pub kind: ContentKind,
    pub content: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    pub created_at: String,
    #[serde(with = "duration_secs")]
    pub queue_time: Duration,
    #[serde(with = "duration_secs")]
    pub generation_time: Duration,
}

mod duration_secs {
    use std::time::Duration;

    pub fn serialize<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Provider returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Provider request failed: {0}")]
    Transport(String),
    #[error("Provider response could not be decoded: {0}")]
    Decode(String),
    #[error("Provider returned no content")]
    EmptyResponse,
}

/// Outbound generation provider. Each call is one protected section.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<Completion, GenerationError>;

    fn model(&self) -> &str;
}
