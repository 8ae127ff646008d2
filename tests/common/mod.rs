//! Shared fixtures for the integration tests: a model gateway scripted by
//! prompt heading and an in-memory case-law table.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use docket::checkpoint::{RefundGateway, TracingNotifier};
use docket::citation::{CaseLawLookup, CaseRecord, Citation, LookupResult, Treatment};
use docket::config::DocketConfig;
use docket::engine::{Collaborators, Engine};
use docket::gateway::{ModelGateway, ModelRequest, ModelResponse, ProviderError};
use docket::store::{DbHandle, NewOrder, Refund};
use docket_common::{MotionType, Order, Tier};

pub const CELOTEX: &str = "Celotex Corp. v. Catrett, 477 U.S. 317 (1986)";

pub const OPINION: &str = "One of the principal purposes of the summary judgment rule is to \
    isolate and dispose of factually unsupported claims or defenses.";

/// Answers phase prompts by their `# Phase <code>:` heading and the
/// verification steps by theirs. Every request is recorded.
pub struct FakeGateway {
    answers: Mutex<HashMap<String, Vec<String>>>,
    pub grade: Mutex<String>,
    pub seen: Mutex<Vec<String>>,
    hold_until: Mutex<Option<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            answers: Mutex::new(HashMap::new()),
            grade: Mutex::new("A-".to_string()),
            seen: Mutex::new(Vec::new()),
            hold_until: Mutex::new(None),
        }
    }

    /// Phase III keeps asking for a hold until its prompt contains `text`.
    pub fn hold_until_prompt_contains(&self, text: &str) {
        *self.hold_until.lock().unwrap() = Some(text.to_string());
    }

    /// Queue a one-off answer for a phase; later calls fall back to the
    /// default answer.
    pub fn answer_once(&self, phase: &str, text: &str) {
        self.answers
            .lock()
            .unwrap()
            .entry(phase.to_string())
            .or_default()
            .push(text.to_string());
    }

    pub fn set_grade(&self, grade: &str) {
        *self.grade.lock().unwrap() = grade.to_string();
    }

    /// Phase codes in the order they were called.
    pub fn phases_called(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p.strip_prefix("# Phase "))
            .filter_map(|rest| rest.split(':').next())
            .map(str::to_string)
            .collect()
    }

    fn answer(&self, prompt: &str) -> String {
        if prompt.starts_with("# Holding Match") {
            return r#"{"confidence": 0.92, "reasoning": "The opinion states the rule."}"#.into();
        }
        if prompt.starts_with("# Adversarial") {
            return r#"{"approve": true, "confidence": 0.9}"#.into();
        }
        if prompt.starts_with("# Dicta") {
            return r#"{"dicta_risk": 0.1}"#.into();
        }
        if prompt.starts_with("# Subsequent History") {
            return r#"{"status": "good"}"#.into();
        }

        let code = prompt
            .strip_prefix("# Phase ")
            .and_then(|rest| rest.split(':').next())
            .unwrap_or_default()
            .to_string();
        if let Some(queued) = self.answers.lock().unwrap().get_mut(&code) {
            if !queued.is_empty() {
                return queued.remove(0);
            }
        }
        if code == "III" {
            if let Some(needle) = self.hold_until.lock().unwrap().as_deref() {
                if !prompt.contains(needle) {
                    return r#"{"hold_required": true, "hold_reason": "Need the incident photos"}"#.into();
                }
            }
        }
        match code.as_str() {
            "IV" => serde_json::json!({
                "summary": "One controlling authority",
                "citations": [{
                    "citation": CELOTEX,
                    "proposition": "Summary judgment disposes of factually unsupported claims"
                }]
            })
            .to_string(),
            "V" => serde_json::json!({
                "draft": format!(
                    "Summary judgment disposes of factually unsupported claims. {}.",
                    CELOTEX
                )
            })
            .to_string(),
            "VII" => serde_json::json!({
                "grade": *self.grade.lock().unwrap(),
                "weaknesses": ["thin facts section"]
            })
            .to_string(),
            "VIII" => serde_json::json!({
                "revised_draft": "Revised motion text without new authority."
            })
            .to_string(),
            "X" => serde_json::json!({
                "document": "NOTICE OF MOTION AND MOTION FOR SUMMARY JUDGMENT"
            })
            .to_string(),
            _ => r#"{"summary": "done"}"#.into(),
        }
    }
}

#[async_trait]
impl ModelGateway for FakeGateway {
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.seen.lock().unwrap().push(request.prompt.clone());
        Ok(ModelResponse {
            model: request.model.clone(),
            text: self.answer(&request.prompt),
            input_tokens: 1_000,
            output_tokens: 500,
        })
    }
}

/// Every citation resolves to the same opinion with a configurable
/// treatment signal.
pub struct FakeLookup {
    pub treatment: Mutex<Treatment>,
}

impl FakeLookup {
    pub fn new() -> Self {
        Self {
            treatment: Mutex::new(Treatment::Positive),
        }
    }
}

#[async_trait]
impl CaseLawLookup for FakeLookup {
    async fn lookup(&self, _citation: &Citation) -> Result<LookupResult> {
        Ok(LookupResult::Found(CaseRecord {
            source_id: "cl-111".into(),
            case_name: Some("Celotex Corp. v. Catrett".into()),
            text: Some(OPINION.into()),
            treatment: *self.treatment.lock().unwrap(),
            ..Default::default()
        }))
    }
}

#[derive(Default)]
pub struct RecordingRefunds {
    pub keys: Mutex<Vec<String>>,
}

#[async_trait]
impl RefundGateway for RecordingRefunds {
    async fn issue_refund(&self, _refund: &Refund, idempotency_key: &str) -> Result<()> {
        self.keys.lock().unwrap().push(idempotency_key.to_string());
        Ok(())
    }
}

/// Defaults with rate limits wide enough that a full run never waits.
pub fn test_config() -> DocketConfig {
    let mut config = DocketConfig::default();
    config.models.max_retries = 0;
    config.models.retry_base_delay_ms = 1;
    for limit in [
        &mut config.rate_limits.fast_model,
        &mut config.rate_limits.slow_model,
        &mut config.rate_limits.case_law,
    ] {
        limit.capacity = 10_000;
        limit.refill_tokens = 10_000;
    }
    config
}

pub struct Harness {
    pub engine: Engine,
    pub gateway: Arc<FakeGateway>,
    pub lookup: Arc<FakeLookup>,
    pub refunds: Arc<RecordingRefunds>,
}

impl Harness {
    pub fn new() -> Result<Self> {
        Self::with_config(test_config())
    }

    pub fn with_config(config: DocketConfig) -> Result<Self> {
        let gateway = Arc::new(FakeGateway::new());
        let lookup = Arc::new(FakeLookup::new());
        let refunds = Arc::new(RecordingRefunds::default());
        let collaborators = Collaborators {
            gateway: gateway.clone(),
            lookup: lookup.clone(),
            notifier: Arc::new(TracingNotifier),
            refunds: refunds.clone(),
        };
        let engine = Engine::new(config, DbHandle::in_memory()?, collaborators)?;
        Ok(Self {
            engine,
            gateway,
            lookup,
            refunds,
        })
    }

    pub async fn order(&self, tier: Tier) -> Result<Order> {
        let new = NewOrder {
            tier,
            motion_type: MotionType::SummaryJudgment,
            jurisdiction: "CA".into(),
            filing_deadline: None,
            customer_email: Some("counsel@example.com".into()),
            amount_paid_cents: 150_000,
            case_caption: "Smith v. Jones".into(),
            statement_of_facts: "Plaintiff slipped on a wet floor.".into(),
        };
        self.engine.db.call(move |db| db.create_order(&new)).await
    }
}
