//! Maps free-text member feedback onto a fixed vocabulary of concern tags
//! via an OpenAI-compatible chat endpoint, with a deterministic demo mode
//! and a client-side rate gate. `analyze_member` never surfaces an error —
//! every failure degrades to the Miscellaneous fallback.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::DeskError;
use crate::member::MembershipRecord;

fn ai_err(msg: impl Into<String>) -> DeskError {
    DeskError::AiBackend(msg.into())
}

const AI_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TAGS: usize = 3;

/// The closed set of concern tags the adapter may assign. Order matters for
/// UI ranking, not for matching.
pub const TAG_VOCABULARY: &[&str] = &[
    "Lack of visible results",
    "Workout plateau or repetition fatigue",
    "Mismatch of class style",
    "Instructor connection issues",
    "Studio environment concerns",
    "Inconvenient class timings",
    "Location accessibility challenges",
    "Difficulty booking classes",
    "Cost concerns",
    "Perceived value gap",
    "Life changes",
    "Time constraints",
    "Health or injury issues",
    "Seasonal drop in motivation",
    "Preference for alternative fitness options",
    "Unresponsive",
    "Needs additional discounts",
    "Miscellaneous",
];

pub fn is_valid_tag(tag: &str) -> bool {
    TAG_VOCABULARY.contains(&tag)
}

#[derive(Clone)]
pub struct AiConfig {
    pub llm_url: String,
    pub llm_key: String,
    pub llm_model: String,
    /// Deterministic offline mode: canned keyword-triggered results, no
    /// network calls. Selected via CLUBDESK_AI_DEMO=1.
    pub demo: bool,
    pub client: reqwest::Client,
    /// Minimum gap between backend requests (client-side rate limit).
    pub min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl AiConfig {
    /// Returns `None` when neither CLUBDESK_LLM_URL nor CLUBDESK_AI_DEMO is
    /// set — classification endpoints then answer 503.
    pub fn from_env() -> Option<Self> {
        let demo = std::env::var("CLUBDESK_AI_DEMO")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let llm_url = std::env::var("CLUBDESK_LLM_URL").ok();
        if llm_url.is_none() && !demo {
            return None;
        }

        let min_interval_ms: u64 = std::env::var("CLUBDESK_AI_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1000);

        let client = reqwest::Client::builder()
            .timeout(AI_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Some(Self {
            llm_url: llm_url.unwrap_or_default(),
            llm_key: std::env::var("CLUBDESK_LLM_KEY").unwrap_or_default(),
            llm_model: std::env::var("CLUBDESK_LLM_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
            demo,
            client,
            min_interval: Duration::from_millis(min_interval_ms),
            last_request: Arc::new(Mutex::new(None)),
        })
    }

    /// Demo-mode constructor for tests.
    pub fn demo() -> Self {
        Self {
            llm_url: String::new(),
            llm_key: String::new(),
            llm_model: "demo".into(),
            demo: true,
            client: reqwest::Client::new(),
            min_interval: Duration::ZERO,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Sleep out the remainder of the rate-limit window, then claim it.
    async fn rate_gate(&self) {
        let wait = {
            let last = self.last_request.lock();
            last.map(|t| self.min_interval.saturating_sub(t.elapsed()))
                .unwrap_or(Duration::ZERO)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        *self.last_request.lock() = Some(Instant::now());
    }
}

/// Classification outcome for one member. `suggested_tags` is always a
/// validated subset of [`TAG_VOCABULARY`], at most three entries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberAnalysis {
    pub member_id: String,
    pub suggested_tags: Vec<String>,
    pub confidence: u8,
    pub reasoning: String,
}

impl MemberAnalysis {
    fn no_content(member_id: &str) -> Self {
        Self {
            member_id: member_id.into(),
            suggested_tags: vec![],
            confidence: 0,
            reasoning: "No comments or notes to analyze".into(),
        }
    }

    fn fallback(member_id: &str, why: &str) -> Self {
        Self {
            member_id: member_id.into(),
            suggested_tags: vec!["Miscellaneous".into()],
            confidence: 0,
            reasoning: format!("Automatic classification unavailable: {why}"),
        }
    }
}

/// Classify one member's annotation text. Infallible by contract: transport
/// and parse failures degrade to the Miscellaneous fallback.
pub async fn analyze_member(cfg: &AiConfig, record: &MembershipRecord) -> MemberAnalysis {
    let text = record.annotation_text();
    if text.is_empty() {
        return MemberAnalysis::no_content(&record.member_id);
    }

    if cfg.demo {
        return demo_analysis(&record.member_id, &text);
    }

    cfg.rate_gate().await;
    match classify(cfg, &text).await {
        Ok(raw) => parse_analysis(&record.member_id, &raw),
        Err(e) => {
            warn!(member = %record.member_id, error = %e, "classification request failed");
            MemberAnalysis::fallback(&record.member_id, &e.to_string())
        }
    }
}

/// Classify every member that has annotation content, strictly sequentially
/// so the rate gate holds. One result per processed record; a member's
/// failure degrades to its own fallback and never aborts the batch.
pub async fn analyze_batch(cfg: &AiConfig, records: &[MembershipRecord]) -> Vec<MemberAnalysis> {
    let with_content: Vec<&MembershipRecord> = records
        .iter()
        .filter(|r| !r.annotation_text().is_empty())
        .collect();
    debug!(total = records.len(), analyzable = with_content.len(), "batch analysis");

    let mut out = Vec::with_capacity(with_content.len());
    for record in with_content {
        out.push(analyze_member(cfg, record).await);
    }
    out
}

// ── backend call ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn system_prompt() -> String {
    format!(
        "You are classifying gym member feedback for a retention dashboard. \
        Given staff comments and notes about one member, pick the concern tags \
        that apply, ONLY from this list:\n{}\n\
        Respond with a single JSON object: \
        {{\"tags\": [\"...\"], \"confidence\": 0-100, \"reasoning\": \"...\"}}. \
        At most {MAX_TAGS} tags. No other text.",
        TAG_VOCABULARY.join("\n")
    )
}

async fn classify(cfg: &AiConfig, text: &str) -> Result<String, DeskError> {
    let req = ChatRequest {
        model: cfg.llm_model.clone(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system_prompt() },
            ChatMessage { role: "user".into(), content: text.into() },
        ],
        temperature: 0.1,
    };

    let mut builder = cfg.client.post(&cfg.llm_url).json(&req);
    if !cfg.llm_key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.llm_key));
    }

    let resp = builder
        .send()
        .await
        .map_err(|e| ai_err(format!("request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ai_err(format!("backend returned {status}: {body}")));
    }

    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| ai_err(format!("response parse failed: {e}")))?;
    Ok(chat
        .choices
        .first()
        .and_then(|c| c.message.content.clone())
        .unwrap_or_default())
}

// ── response parsing ──────────────────────────────────────────────────────

/// Pull the first JSON object out of model output that may be wrapped in
/// prose or markdown fences.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[derive(Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Validate a raw model response into a `MemberAnalysis`. Tags outside the
/// vocabulary are dropped silently; confidence is clamped to 0-100.
pub fn parse_analysis(member_id: &str, raw: &str) -> MemberAnalysis {
    let Some(json) = extract_json_object(raw) else {
        return MemberAnalysis::fallback(member_id, "no JSON object in response");
    };
    let parsed: RawAnalysis = match serde_json::from_str(json) {
        Ok(p) => p,
        Err(e) => return MemberAnalysis::fallback(member_id, &format!("invalid JSON: {e}")),
    };

    let tags: Vec<String> = parsed
        .tags
        .into_iter()
        .filter(|t| is_valid_tag(t))
        .take(MAX_TAGS)
        .collect();

    MemberAnalysis {
        member_id: member_id.into(),
        suggested_tags: tags,
        confidence: parsed.confidence.clamp(0.0, 100.0) as u8,
        reasoning: parsed
            .reasoning
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No reasoning provided".into()),
    }
}

// ── demo mode ─────────────────────────────────────────────────────────────

/// Keyword-triggered canned results, checked in order. First hit wins.
const DEMO_RULES: &[(&[&str], &[&str], u8)] = &[
    (&["injury", "health", "pain"], &["Health or injury issues"], 95),
    (&["cost", "price", "expensive"], &["Cost concerns", "Perceived value gap"], 85),
    (&["time", "busy", "schedule"], &["Time constraints"], 80),
    (&["booking", "book", "waitlist"], &["Difficulty booking classes"], 80),
    (&["moved", "moving", "relocat"], &["Life changes"], 85),
    (&["results", "plateau"], &["Lack of visible results"], 75),
];

fn demo_analysis(member_id: &str, text: &str) -> MemberAnalysis {
    let lower = text.to_lowercase();
    for (keywords, tags, confidence) in DEMO_RULES {
        if keywords.iter().any(|k| lower.contains(k)) {
            return MemberAnalysis {
                member_id: member_id.into(),
                suggested_tags: tags.iter().map(|t| (*t).to_string()).collect(),
                confidence: *confidence,
                reasoning: "Demo-mode keyword match".into(),
            };
        }
    }
    MemberAnalysis {
        member_id: member_id.into(),
        suggested_tags: vec!["Miscellaneous".into()],
        confidence: 40,
        reasoning: "Demo-mode: no keyword matched".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_from_prose() {
        let raw = "Sure! Here is the result:\n```json\n{\"tags\": []}\n```\nDone.";
        assert_eq!(extract_json_object(raw), Some("{\"tags\": []}"));
    }

    #[test]
    fn extract_json_bare() {
        let raw = r#"{"tags": ["Cost concerns"], "confidence": 90}"#;
        assert_eq!(extract_json_object(raw), Some(raw));
    }

    #[test]
    fn extract_json_none() {
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("}{"), None);
    }

    #[test]
    fn parse_drops_invalid_tags() {
        let a = parse_analysis(
            "M1",
            r#"{"tags": ["Cost concerns", "Totally Made Up"], "confidence": 70, "reasoning": "cost"}"#,
        );
        assert_eq!(a.suggested_tags, vec!["Cost concerns"]);
        assert_eq!(a.confidence, 70);
    }

    #[test]
    fn parse_clamps_confidence_and_caps_tags() {
        let a = parse_analysis(
            "M1",
            r#"{"tags": ["Cost concerns", "Time constraints", "Life changes", "Unresponsive"],
                "confidence": 250}"#,
        );
        assert_eq!(a.suggested_tags.len(), 3);
        assert_eq!(a.confidence, 100);
        assert_eq!(a.reasoning, "No reasoning provided");
    }

    #[test]
    fn parse_garbage_falls_back_to_miscellaneous() {
        let a = parse_analysis("M1", "the model refused to answer");
        assert_eq!(a.suggested_tags, vec!["Miscellaneous"]);
        assert_eq!(a.confidence, 0);
    }

    #[test]
    fn vocabulary_is_closed_and_ordered() {
        assert_eq!(TAG_VOCABULARY.len(), 18);
        assert_eq!(TAG_VOCABULARY[0], "Lack of visible results");
        assert_eq!(TAG_VOCABULARY[17], "Miscellaneous");
        assert!(is_valid_tag("Cost concerns"));
        assert!(!is_valid_tag("cost concerns")); // match is exact
    }
}
