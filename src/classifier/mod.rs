use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::core::config::ClassifierConfig;
use crate::llm::{ChatMessage, GenerationOptions, LLMProvider, LlmError, OpenAIClient};
use crate::tickets::{round_confidence, TicketCategory};

pub const FALLBACK_MARKER: &str = "Fallback classification";
const DISABLED_SUFFIX: &str = "(Fallback classification - AI classification disabled)";
const UNAVAILABLE_SUFFIX: &str = "(Fallback classification - AI service unavailable)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    Ai,
    FallbackDisabled,
    FallbackError,
}

impl ClassificationSource {
    pub fn is_fallback(self) -> bool {
        !matches!(self, Self::Ai)
    }
}

impl fmt::Display for ClassificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ai => "ai",
            Self::FallbackDisabled => "fallback_disabled",
            Self::FallbackError => "fallback_error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub category: TicketCategory,
    pub explanation: String,
    pub confidence: f64,
    pub source: ClassificationSource,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("provider call failed: {0}")]
    Provider(#[from] LlmError),
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("invalid confidence `{0}`")]
    InvalidConfidence(String),
}

/// Classifier gateway. Never fails: any provider or parsing problem turns
/// into a fallback result.
pub struct TicketClassifier {
    provider: Option<Arc<dyn LLMProvider>>,
    options: GenerationOptions,
}

impl TicketClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, options: GenerationOptions) -> Self {
        Self {
            provider: Some(provider),
            options,
        }
    }

    pub fn disabled(options: GenerationOptions) -> Self {
        Self {
            provider: None,
            options,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        let options = config.generation_options();
        if !config.enabled {
            return Self::disabled(options);
        }
        match OpenAIClient::new(
            config.api_key.clone(),
            Some(config.base_url.clone()),
            config.request_timeout,
        ) {
            Ok(client) => Self::new(Arc::new(client), options),
            Err(e) => {
                warn!("Failed to build LLM client, classification disabled: {e}");
                Self::disabled(options)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    pub async fn classify(&self, subject: &str, body: &str) -> ClassificationResult {
        let Some(provider) = &self.provider else {
            return fallback(ClassificationSource::FallbackDisabled);
        };

        match self.classify_with_provider(provider.as_ref(), subject, body).await {
            Ok(result) => result,
            Err(e) => {
                warn!("AI classification failed error={e} subject={subject:?}");
                fallback(ClassificationSource::FallbackError)
            }
        }
    }

    async fn classify_with_provider(
        &self,
        provider: &dyn LLMProvider,
        subject: &str,
        body: &str,
    ) -> Result<ClassificationResult, ClassificationError> {
        let messages = [
            ChatMessage::system(system_prompt()),
            ChatMessage::user(user_prompt(subject, body)),
        ];
        let content = provider.generate(&messages, &self.options).await?;
        debug!("Classifier response: {content}");
        parse_classification(&content)
    }
}

pub fn system_prompt() -> String {
    let categories = TicketCategory::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), c.description()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a help desk ticket classification system. Analyze the provided ticket and \
classify it into one of these categories:\n\n\
Categories:\n{categories}\n\n\
You must respond with valid JSON in this exact format:\n\
{{\n    \"category\": \"one_of_the_categories_above\",\n    \
\"explanation\": \"Brief explanation of why this category was chosen\",\n    \
\"confidence\": 0.95\n}}\n\n\
The confidence should be a number between 0 and 1, where 1 is completely confident and 0 \
is not confident at all."
    )
}

pub fn user_prompt(subject: &str, body: &str) -> String {
    format!("Subject: {subject}\n\nBody: {body}")
}

/// Validate model output. Tolerates prose or code fences around the object.
pub fn parse_classification(raw: &str) -> Result<ClassificationResult, ClassificationError> {
    let start = raw.find('{').ok_or(ClassificationError::NoJson)?;
    let end = raw.rfind('}').ok_or(ClassificationError::NoJson)?;
    if end < start {
        return Err(ClassificationError::NoJson);
    }
    let value: Value = serde_json::from_str(&raw[start..=end])?;

    let category = value
        .get("category")
        .and_then(Value::as_str)
        .ok_or(ClassificationError::MissingField("category"))?;
    let category: TicketCategory = category
        .trim()
        .parse()
        .map_err(|_| ClassificationError::UnknownCategory(category.to_string()))?;

    let explanation = value
        .get("explanation")
        .and_then(Value::as_str)
        .map(str::trim)
        .ok_or(ClassificationError::MissingField("explanation"))?;

    let confidence = match value.get("confidence") {
        None | Some(Value::Null) => return Err(ClassificationError::MissingField("confidence")),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    }
    .filter(|c| c.is_finite() && (0.0..=1.0).contains(c))
    .ok_or_else(|| ClassificationError::InvalidConfidence(value["confidence"].to_string()))?;

    Ok(ClassificationResult {
        category,
        explanation: explanation.to_string(),
        confidence: round_confidence(confidence),
        source: ClassificationSource::Ai,
    })
}

/// Synthetic result: random category, canned explanation tagged with the
/// cause, confidence in [0.70, 0.95].
pub fn fallback(source: ClassificationSource) -> ClassificationResult {
    let mut rng = rand::thread_rng();
    let category = *TicketCategory::ALL
        .choose(&mut rng)
        .unwrap_or(&TicketCategory::GeneralInquiry);
    let suffix = match source {
        ClassificationSource::FallbackDisabled => DISABLED_SUFFIX,
        _ => UNAVAILABLE_SUFFIX,
    };
    let confidence = f64::from(rng.gen_range(70u32..=95)) / 100.0;

    ClassificationResult {
        category,
        explanation: format!("{} {suffix}", category.fallback_explanation()),
        confidence,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        reply: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(messages.len(), 2);
            assert!(messages[1].content.starts_with("Subject: "));
            self.reply.clone().map_err(|_| LlmError::EmptyResponse)
        }
    }

    fn options() -> GenerationOptions {
        GenerationOptions {
            model: "gpt-3.5-turbo".into(),
            max_tokens: 150,
            temperature: 0.1,
        }
    }

    fn assert_fallback_shape(result: &ClassificationResult) {
        assert!(TicketCategory::ALL.contains(&result.category));
        assert!((0.70..=0.95).contains(&result.confidence));
        assert!(result.explanation.contains(FALLBACK_MARKER));
        assert!(result.source.is_fallback());
    }

    #[tokio::test]
    async fn test_disabled_returns_fallback_without_calling_provider() {
        let classifier = TicketClassifier::disabled(options());
        for _ in 0..50 {
            let result = classifier.classify("Can't log in", "Reset link expired").await;
            assert_fallback_shape(&result);
            assert_eq!(result.source, ClassificationSource::FallbackDisabled);
            assert!(result.explanation.ends_with(DISABLED_SUFFIX));
        }
    }

    #[tokio::test]
    async fn test_valid_response_is_used() {
        let provider = StubProvider::replying(
            r#"{"category": "account_access", "explanation": "Login problem", "confidence": 0.876}"#,
        );
        let classifier = TicketClassifier::new(provider.clone(), options());
        let result = classifier.classify("Can't log in", "Reset link expired").await;

        assert_eq!(result.category, TicketCategory::AccountAccess);
        assert_eq!(result.explanation, "Login problem");
        assert_eq!(result.confidence, 0.88);
        assert_eq!(result.source, ClassificationSource::Ai);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_category_falls_back() {
        let provider = StubProvider::replying(
            r#"{"category": "not_a_real_category", "explanation": "x", "confidence": 0.9}"#,
        );
        let classifier = TicketClassifier::new(provider, options());
        let result = classifier.classify("s", "b").await;
        assert_fallback_shape(&result);
        assert_eq!(result.source, ClassificationSource::FallbackError);
        assert!(result.explanation.ends_with(UNAVAILABLE_SUFFIX));
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let classifier = TicketClassifier::new(StubProvider::failing(), options());
        let result = classifier.classify("s", "b").await;
        assert_fallback_shape(&result);
        assert_eq!(result.source, ClassificationSource::FallbackError);
    }

    #[test]
    fn test_missing_confidence_is_rejected() {
        let err = parse_classification(r#"{"category": "bug_report", "explanation": "crash"}"#)
            .unwrap_err();
        assert!(matches!(err, ClassificationError::MissingField("confidence")));
    }

    #[test]
    fn test_empty_explanation_is_accepted() {
        let result = parse_classification(
            r#"{"category": "bug_report", "explanation": "", "confidence": 0.6}"#,
        )
        .unwrap();
        assert_eq!(result.explanation, "");
        assert_eq!(result.category, TicketCategory::BugReport);

        let err = parse_classification(r#"{"category": "bug_report", "confidence": 0.6}"#)
            .unwrap_err();
        assert!(matches!(err, ClassificationError::MissingField("explanation")));
    }

    #[test]
    fn test_confidence_out_of_range_is_rejected() {
        let err = parse_classification(
            r#"{"category": "bug_report", "explanation": "crash", "confidence": 1.2}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ClassificationError::InvalidConfidence(_)));
    }

    #[test]
    fn test_string_confidence_and_code_fence() {
        let raw = "```json\n{\"category\": \"complaint\", \"explanation\": \"Unhappy\", \"confidence\": \"0.7\"}\n```";
        let result = parse_classification(raw).unwrap();
        assert_eq!(result.category, TicketCategory::Complaint);
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(
            parse_classification("I think it's billing"),
            Err(ClassificationError::NoJson)
        ));
        assert!(parse_classification("{not json}").is_err());
    }

    #[test]
    fn test_system_prompt_lists_every_category() {
        let prompt = system_prompt();
        for category in TicketCategory::ALL {
            assert!(prompt.contains(&format!("- {}: ", category.as_str())));
        }
        assert!(prompt.contains("\"confidence\": 0.95"));
    }

    #[test]
    fn test_user_prompt_format() {
        assert_eq!(user_prompt("Hi", "There"), "Subject: Hi\n\nBody: There");
    }
}
