//! Multi-intent recognition.
//!
//! A keyword classifier gives a cheap single-intent baseline; the LLM is then
//! asked whether the text actually holds several requests. Anything the LLM
//! returns that does not form a consistent, ordered intent list is discarded
//! in favour of the baseline.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use intentflow_core::{
    call::bounded,
    json::{parse_json, truncate},
    traits::{IntentClassifier, LlmClient},
    types::{Intent, IntentKind, MultiIntentResult},
    Error, RequestContext, Result,
};

/// Keyword patterns, checked in order; the first hit wins.
///
/// Each entry is a regex alternation matched on word boundaries, so "format"
/// does not fire on "information".
const KEYWORDS: &[(&str, IntentKind)] = &[
    (r"security scan|vulnerab\w*|security audit", IntentKind::SecurityScan),
    (r"refactor\w*", IntentKind::RefactorCode),
    (r"analy[sz]e\w*|analysis|code review", IntentKind::AnalyzeCode),
    (r"optimi[sz]\w*|performance", IntentKind::OptimizePerformance),
    (r"architecture", IntentKind::ReviewArchitecture),
    (r"migrat\w*", IntentKind::MigrateSchema),
    (r"compress\w*", IntentKind::CompressImage),
    (r"git push|push to|push the", IntentKind::GitPush),
    (r"commit\w*", IntentKind::GitCommit),
    (r"git add|stage", IntentKind::GitAdd),
    (r"run (?:the )?tests|test suite", IntentKind::RunTests),
    (r"build\w*", IntentKind::BuildProject),
    (r"install\w*", IntentKind::InstallDependencies),
    (r"format\w*", IntentKind::FormatCode),
    (r"delete|remove", IntentKind::DeleteFile),
    (r"create|new file|touch", IntentKind::CreateFile),
    (r"write", IntentKind::WriteFile),
    (r"edit|modify|update", IntentKind::EditFile),
    (r"reports?", IntentKind::GenerateReport),
    (r"export", IntentKind::ExportData),
    (r"query|database", IntentKind::QueryDatabase),
    (r"e?mail", IntentKind::SendEmail),
    (r"read|open|show", IntentKind::ReadFile),
    (r"search|find|lookup", IntentKind::Search),
];

fn keyword_table() -> &'static [(Regex, IntentKind)] {
    static TABLE: OnceLock<Vec<(Regex, IntentKind)>> = OnceLock::new();
    TABLE.get_or_init(|| {
        KEYWORDS
            .iter()
            .map(|(pattern, kind)| {
                let re = Regex::new(&format!(r"\b(?:{})\b", pattern)).expect("keyword pattern is valid");
                (re, kind.clone())
            })
            .collect()
    })
}

const MATCHED_CONFIDENCE: f64 = 0.8;
const UNMATCHED_CONFIDENCE: f64 = 0.3;

fn file_path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:\.{0,2}/)?(?:[\w-]+/)*[\w-]+\.[A-Za-z][A-Za-z0-9]{0,7}\b").expect("file path pattern is valid")
    })
}

fn quoted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]+)"|'([^']+)'"#).expect("quoted text pattern is valid"))
}

/// Keyword-based baseline classifier.
///
/// Extracts file paths and quoted text as entities and maps them onto the
/// parameter names of the detected kind.
pub struct KeywordIntentClassifier {
    /// Custom patterns, checked before the built-in table.
    custom: Vec<(Regex, IntentKind)>,
}

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self { custom: Vec::new() }
    }

    /// Add a custom keyword, matched as a whole phrase.
    pub fn with_pattern(mut self, keyword: impl Into<String>, kind: IntentKind) -> Self {
        let keyword = keyword.into().to_lowercase();
        match Regex::new(&format!(r"(?:^|\W){}(?:\W|$)", regex::escape(&keyword))) {
            Ok(re) => self.custom.push((re, kind)),
            Err(e) => tracing::warn!(keyword = %keyword, error = %e, "Ignoring custom keyword"),
        }
        self
    }

    fn detect_kind(&self, lower: &str) -> Option<IntentKind> {
        self.custom
            .iter()
            .map(|(re, kind)| (re, kind))
            .chain(keyword_table().iter().map(|(re, kind)| (re, kind)))
            .find(|(re, _)| re.is_match(lower))
            .map(|(_, kind)| kind.clone())
    }

    /// Build the intent for `text` without any I/O.
    pub fn classify_text(&self, text: &str) -> Intent {
        let lower = text.to_lowercase();
        let kind = self.detect_kind(&lower);
        let confidence = if kind.is_some() { MATCHED_CONFIDENCE } else { UNMATCHED_CONFIDENCE };
        let kind = kind.unwrap_or(IntentKind::Unknown);

        let quoted: Option<String> = quoted_regex().captures(text).and_then(|c| {
            c.get(1).or_else(|| c.get(2)).map(|m| m.as_str().to_string())
        });
        // Quoted text is not a path candidate
        let unquoted = quoted_regex().replace_all(text, " ");
        let paths: Vec<String> = file_path_regex()
            .find_iter(&unquoted)
            .map(|m| m.as_str().to_string())
            .collect();

        let mut intent = Intent::new(kind.clone()).with_confidence(confidence);
        if !paths.is_empty() {
            intent = intent.with_entity(
                "filePaths",
                Value::Array(paths.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(q) = &quoted {
            intent = intent.with_entity("quoted", q.clone());
        }

        let first_path = paths.first().cloned();
        match &kind {
            IntentKind::CompressImage => {
                if let Some(p) = first_path {
                    intent = intent.with_param("imagePath", p);
                }
            }
            IntentKind::GitCommit => {
                if let Some(q) = quoted {
                    intent = intent.with_param("message", q);
                }
            }
            IntentKind::WriteFile | IntentKind::CreateFile => {
                if let Some(p) = first_path {
                    intent = intent.with_param("filePath", p);
                }
                if let Some(q) = quoted {
                    intent = intent.with_param("content", q);
                }
            }
            IntentKind::AnalyzeCode
            | IntentKind::RefactorCode
            | IntentKind::SecurityScan
            | IntentKind::OptimizePerformance => {
                intent = intent.with_param("path", first_path.unwrap_or_else(|| ".".to_string()));
            }
            IntentKind::Search | IntentKind::QueryDatabase => {
                intent = intent.with_param("query", text.trim());
            }
            _ => {
                if let Some(p) = first_path {
                    intent = intent.with_param("filePath", p);
                }
            }
        }
        intent
    }
}

impl Default for KeywordIntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, text: &str, ctx: &RequestContext) -> Result<Intent> {
        let intent = self.classify_text(text);
        tracing::debug!(
            session_id = %ctx.session_id,
            kind = %intent.kind,
            confidence = intent.confidence,
            "Keyword classification"
        );
        Ok(intent)
    }
}

// =============================================================================
// Multi-intent recognizer
// =============================================================================

const MULTI_INTENT_PROMPT: &str = "You split user requests into independent actionable intents.
Decide whether the request below contains MORE THAN ONE independent action.
Respond with JSON only:
{\"isMultiIntent\": bool, \"intents\": [{\"type\": \"SCREAMING_SNAKE_KIND\", \"params\": {}, \"priority\": 1, \"dependencies\": [], \"confidence\": 0.9}]}
Priorities are 1-based execution order. Dependencies list priorities that must finish first and must be lower than the intent's own priority.
Known kinds: ";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiIntentReply {
    #[serde(default)]
    is_multi_intent: bool,
    #[serde(default)]
    intents: Vec<Intent>,
}

/// Splits raw input into ordered, dependency-annotated intents.
pub struct MultiIntentRecognizer {
    llm: Arc<dyn LlmClient>,
    classifier: Arc<dyn IntentClassifier>,
    llm_timeout: Duration,
}

impl MultiIntentRecognizer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            classifier: Arc::new(KeywordIntentClassifier::new()),
            llm_timeout: Duration::from_secs(30),
        }
    }

    /// Replace the baseline classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Classify `text` into one or more intents.
    ///
    /// Only an empty input is an error; every LLM problem degrades to the
    /// single baseline intent.
    pub async fn classify_multiple(&self, text: &str, ctx: &RequestContext) -> Result<MultiIntentResult> {
        if text.trim().is_empty() {
            return Err(Error::invalid_request("input text is empty"));
        }

        let baseline = match self.classifier.classify(text, ctx).await {
            Ok(intent) => intent,
            Err(e) => {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "Baseline classifier failed");
                Intent::new(IntentKind::Unknown).with_confidence(0.0)
            }
        };

        match self.ask_llm(text, ctx).await {
            Ok(Some(intents)) => {
                tracing::info!(
                    session_id = %ctx.session_id,
                    intent_count = intents.len(),
                    "Multi-intent request recognized"
                );
                Ok(MultiIntentResult {
                    is_multi_intent: true,
                    intents,
                })
            }
            Ok(None) => Ok(MultiIntentResult::single(baseline)),
            Err(e) => {
                tracing::warn!(
                    session_id = %ctx.session_id,
                    error = %e,
                    "Multi-intent analysis failed, using baseline intent"
                );
                Ok(MultiIntentResult::single(baseline))
            }
        }
    }

    async fn ask_llm(&self, text: &str, ctx: &RequestContext) -> Result<Option<Vec<Intent>>> {
        let kinds = known_kind_names();
        let prompt = format!("{}{}\n\nRequest: {}", MULTI_INTENT_PROMPT, kinds, text);
        let response = bounded("multi-intent LLM", self.llm_timeout, &ctx.cancel, self.llm.complete(&prompt)).await?;

        let reply: MultiIntentReply = parse_json(&response.content)?;
        if !reply.is_multi_intent || reply.intents.len() < 2 {
            tracing::debug!(
                reply = %truncate(&response.content, 120),
                "LLM declined multi-intent split"
            );
            return Ok(None);
        }
        let mut intents: Vec<Intent> = reply
            .intents
            .into_iter()
            .map(|intent| {
                let confidence = if intent.confidence.is_finite() { intent.confidence } else { 0.0 };
                intent.with_confidence(confidence)
            })
            .collect();
        intents.sort_by_key(|i| i.priority);
        check_ordering(&intents)?;
        Ok(Some(intents))
    }
}

fn known_kind_names() -> String {
    [
        IntentKind::CreateFile,
        IntentKind::WriteFile,
        IntentKind::ReadFile,
        IntentKind::EditFile,
        IntentKind::DeleteFile,
        IntentKind::FormatCode,
        IntentKind::GitAdd,
        IntentKind::GitCommit,
        IntentKind::GitPush,
        IntentKind::BuildProject,
        IntentKind::RunTests,
        IntentKind::InstallDependencies,
        IntentKind::CompressImage,
        IntentKind::QueryDatabase,
        IntentKind::ExportData,
        IntentKind::GenerateReport,
        IntentKind::SendEmail,
        IntentKind::Search,
        IntentKind::AnalyzeCode,
        IntentKind::RefactorCode,
        IntentKind::SecurityScan,
        IntentKind::OptimizePerformance,
        IntentKind::ReviewArchitecture,
        IntentKind::MigrateSchema,
    ]
    .iter()
    .map(|k| k.as_str().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

/// Priorities must be unique and positive; dependencies must name an earlier priority.
fn check_ordering(intents: &[Intent]) -> Result<()> {
    let mut seen: HashSet<u32> = HashSet::new();
    for intent in intents {
        if intent.priority == 0 || !seen.insert(intent.priority) {
            return Err(Error::malformed(format!(
                "invalid or duplicate priority {} in LLM intents",
                intent.priority
            )));
        }
        for dep in &intent.dependencies {
            if *dep >= intent.priority || !seen.contains(dep) {
                return Err(Error::malformed(format!(
                    "intent {} depends on unknown or later priority {}",
                    intent.priority, dep
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use intentflow_core::mocks::{FailingLlm, MockLlm, StaticClassifier};
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new("s1", "u1")
    }

    #[test]
    fn test_keyword_classifier_extracts_paths() {
        let c = KeywordIntentClassifier::new();
        let intent = c.classify_text("create file src/main.rs");
        assert_eq!(intent.kind, IntentKind::CreateFile);
        assert_eq!(intent.param_str("filePath"), Some("src/main.rs"));
        assert_eq!(intent.entities["filePaths"], json!(["src/main.rs"]));
    }

    #[test]
    fn test_keyword_classifier_commit_message() {
        let c = KeywordIntentClassifier::new();
        let intent = c.classify_text("commit with message \"fix: handle empty input\"");
        assert_eq!(intent.kind, IntentKind::GitCommit);
        assert_eq!(intent.param_str("message"), Some("fix: handle empty input"));
    }

    #[test]
    fn test_keyword_classifier_unknown() {
        let intent = KeywordIntentClassifier::new().classify_text("hmm");
        assert_eq!(intent.kind, IntentKind::Unknown);
        assert!(intent.confidence < 0.5);
    }

    #[test]
    fn test_custom_pattern_wins() {
        let c = KeywordIntentClassifier::new().with_pattern("ship it", IntentKind::GitPush);
        assert_eq!(c.classify_text("Ship it and create notes").kind, IntentKind::GitPush);
    }

    #[tokio::test]
    async fn test_empty_text_is_error() {
        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant("{}")));
        assert!(matches!(r.classify_multiple("  ", &ctx()).await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_llm_split_accepted() {
        let reply = json!({
            "isMultiIntent": true,
            "intents": [
                {"type": "GIT_COMMIT", "params": {"message": "wip"}, "priority": 2, "dependencies": [1]},
                {"type": "GIT_ADD", "params": {}, "priority": 1, "dependencies": []}
            ]
        });
        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&reply.to_string())));
        let res = r.classify_multiple("add and commit", &ctx()).await.unwrap();
        assert!(res.is_multi_intent);
        assert_eq!(res.intents.len(), 2);
        assert_eq!(res.intents[0].kind, IntentKind::GitAdd);
        assert_eq!(res.intents[1].dependencies, vec![1]);
    }

    #[tokio::test]
    async fn test_forward_dependency_falls_back() {
        let reply = json!({
            "isMultiIntent": true,
            "intents": [
                {"type": "GIT_ADD", "priority": 1, "dependencies": [2]},
                {"type": "GIT_COMMIT", "priority": 2}
            ]
        });
        let classifier = Arc::new(StaticClassifier::new(Intent::new(IntentKind::GitAdd).with_priority(7)));
        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&reply.to_string())))
            .with_classifier(classifier);
        let res = r.classify_multiple("add and commit", &ctx()).await.unwrap();
        assert!(!res.is_multi_intent);
        assert_eq!(res.intents.len(), 1);
        assert_eq!(res.intents[0].priority, 1);
    }

    #[tokio::test]
    async fn test_llm_failure_and_garbage_fall_back() {
        let r = MultiIntentRecognizer::new(Arc::new(FailingLlm::default()));
        let res = r.classify_multiple("read notes.txt", &ctx()).await.unwrap();
        assert!(!res.is_multi_intent);
        assert_eq!(res.intents[0].kind, IntentKind::ReadFile);

        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant("I think there are two things")));
        let res = r.classify_multiple("read notes.txt", &ctx()).await.unwrap();
        assert!(!res.is_multi_intent);
    }

    #[tokio::test]
    async fn test_single_intent_from_llm_is_declined() {
        let reply = json!({"isMultiIntent": true, "intents": [{"type": "SEARCH", "priority": 1}]});
        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&reply.to_string())));
        let res = r.classify_multiple("search docs", &ctx()).await.unwrap();
        assert!(!res.is_multi_intent);
        assert_eq!(res.intents[0].kind, IntentKind::Search);
    }

    #[tokio::test]
    async fn test_llm_confidence_is_clamped() {
        let reply = json!({
            "isMultiIntent": true,
            "intents": [
                {"type": "GIT_ADD", "priority": 1, "confidence": 1.7},
                {"type": "GIT_COMMIT", "priority": 2, "dependencies": [1], "confidence": -0.4}
            ]
        });
        let r = MultiIntentRecognizer::new(Arc::new(MockLlm::constant(&reply.to_string())));
        let res = r.classify_multiple("add and commit", &ctx()).await.unwrap();
        assert_eq!(res.intents[0].confidence, 1.0);
        assert_eq!(res.intents[1].confidence, 0.0);
    }

    #[test]
    fn test_keywords_match_whole_words() {
        let c = KeywordIntentClassifier::new();
        assert_eq!(c.classify_text("information is already there").kind, IntentKind::Unknown);
        assert_eq!(c.classify_text("format the code").kind, IntentKind::FormatCode);
        assert_eq!(c.classify_text("read notes.txt").kind, IntentKind::ReadFile);
        assert_eq!(c.classify_text("check for vulnerabilities").kind, IntentKind::SecurityScan);
        assert_eq!(c.classify_text("please reshow the page").kind, IntentKind::Unknown);
    }
}
