//! Transform orchestrator.
//!
//! Drives one request through preprocessing, background analysis,
//! segmentation, labeling, template selection, redaction, generation and
//! validation with at most one repair retry. `execute` returns the result
//! directly; `stream` runs the same state machine as a producer feeding a
//! bounded event channel.
//!
//! All state is request-scoped. Optional stages (situation analysis,
//! identity booster, refiner, knowledge search) that fail are logged and
//! treated as not fired.

mod flow;
mod sink;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use super::events::{ErrorPayload, PipelineEvent};
use super::knowledge::KnowledgeSearch;
use super::llm::{LlmError, ModelDispatcher};
use super::types::{PipelineResult, TransformRequest};
use crate::config::ServiceConfig;
use sink::EventSink;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input text is empty")]
    EmptyInput,

    #[error("Input text too long: {actual} characters (max {max})")]
    InputTooLong { max: usize, actual: usize },

    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Request cancelled by consumer")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::EmptyInput => "EMPTY_INPUT",
            PipelineError::InputTooLong { .. } => "INPUT_TOO_LONG",
            PipelineError::Generation(e) => e.code(),
            PipelineError::Cancelled => "CANCELLED",
        }
    }

    /// Message safe to show to end users.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::EmptyInput => "변환할 내용을 입력해 주세요.".to_string(),
            PipelineError::InputTooLong { max, .. } => {
                format!("입력은 최대 {max}자까지 가능합니다.")
            }
            PipelineError::Generation(e) => e.user_message().to_string(),
            PipelineError::Cancelled => "요청이 취소되었습니다.".to_string(),
        }
    }

    /// Input-validation failures, rejected before any model call.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::EmptyInput | PipelineError::InputTooLong { .. }
        )
    }
}

/// The transformation service. Cheap to share behind an `Arc`.
pub struct TransformPipeline {
    config: Arc<ServiceConfig>,
    dispatcher: Arc<ModelDispatcher>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
}

impl TransformPipeline {
    pub fn new(config: Arc<ServiceConfig>, dispatcher: Arc<ModelDispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            knowledge: None,
        }
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Reject empty or over-long input without running anything.
    pub fn check_input(&self, request: &TransformRequest) -> Result<(), PipelineError> {
        flow::check_input(request, self.config.max_input_chars)
    }

    /// Run a request to completion.
    pub async fn execute(&self, request: &TransformRequest) -> Result<PipelineResult, PipelineError> {
        let span = tracing::info_span!("transform", request_id = %Uuid::new_v4());
        flow::run(self, request, &EventSink::detached())
            .instrument(span)
            .await
    }

    /// Run a request in the background and return its event stream.
    ///
    /// The stream always ends with `done` or `error` unless the receiver is
    /// dropped, which cancels the run before its next stage.
    pub fn stream(self: &Arc<Self>, request: TransformRequest) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let pipeline = Arc::clone(self);
        let span = tracing::info_span!("transform_stream", request_id = %Uuid::new_v4());

        tokio::spawn(
            async move {
                let sink = EventSink::new(tx);
                match flow::run(&pipeline, &request, &sink).await {
                    Ok(_) => {}
                    Err(PipelineError::Cancelled) => {
                        tracing::info!("Stream consumer disconnected, run cancelled");
                    }
                    Err(e) => {
                        if e.is_input_error() {
                            tracing::info!(code = e.code(), "Request rejected");
                        } else {
                            tracing::error!(code = e.code(), "Transform failed: {e}");
                        }
                        let _ = sink
                            .emit(PipelineEvent::Error(ErrorPayload {
                                code: e.code(),
                                message: e.user_message(),
                            }))
                            .await;
                    }
                }
            }
            .instrument(span),
        );
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRoster;
    use crate::pipeline::knowledge::StaticKnowledge;
    use crate::pipeline::llm::{LlmRequest, MockBackend};
    use crate::pipeline::validation::IssueType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const INPUT: &str = "2024년 2월 4일까지 자료 보내주세요. 진짜 한심하네요";
    const CLEAN: &str = "{{DATE_1}}까지 자료를 보내주시면 감사하겠습니다.";

    fn config() -> ServiceConfig {
        ServiceConfig {
            models: ModelRoster {
                generation: "mock-gen".into(),
                labeler: "mock-labeler".into(),
                labeler_fallback: "mock-labeler-fallback".into(),
                analysis: "mock-analysis".into(),
                refiner: "mock-refiner".into(),
                identity: "mock-identity".into(),
            },
            ..ServiceConfig::default()
        }
    }

    /// Labels every listed segment; text mentioning 한심 is an attack.
    fn label_reply(request: &LlmRequest) -> String {
        request
            .user
            .split("[구간]")
            .nth(1)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.split_once(": "))
            .map(|(id, text)| {
                let label = if text.contains("한심") {
                    "PERSONAL_ATTACK"
                } else {
                    "CORE_FACT"
                };
                format!("{id}|{label}")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mock wiring every stage; `generation` answers the n-th generation call.
    fn backend<F>(generation: F) -> Arc<MockBackend>
    where
        F: Fn(usize) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        let count = AtomicUsize::new(0);
        Arc::new(MockBackend::with_handler(move |req| match req.model.as_str() {
            "mock-gen" => generation(count.fetch_add(1, Ordering::SeqCst)),
            "mock-labeler" | "mock-labeler-fallback" => Ok(label_reply(req)),
            "mock-analysis" => Ok(
                r#"{"facts": ["{{DATE_1}}까지 자료 제출", "상대가 퇴사함"], "intent": "자료 요청", "purpose": "REQUEST"}"#
                    .to_string(),
            ),
            _ => Ok("[]".to_string()),
        }))
    }

    fn pipeline(mock: Arc<MockBackend>) -> TransformPipeline {
        let dispatcher = ModelDispatcher::empty().with_backend("mock", mock);
        TransformPipeline::new(Arc::new(config()), Arc::new(dispatcher))
    }

    fn generation_calls(mock: &MockBackend) -> usize {
        mock.calls().iter().filter(|c| c.model == "mock-gen").count()
    }

    async fn collect(mut rx: mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn clean_run_completes_without_retry() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        let result = pipeline(mock.clone())
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();

        assert_eq!(result.transformed_text, "2024년 2월 4일까지 자료를 보내주시면 감사하겠습니다.");
        assert!(result.validation_issues.is_empty(), "{:?}", result.validation_issues);
        assert_eq!(result.stats.retry_count, 0);
        assert_eq!(result.stats.locked_span_count, 1);
        assert_eq!(result.stats.tiers.red, 1);
        assert!(result.stats.stages.situation_analysis);
        // Inferred purpose picks the request template.
        assert_eq!(result.stats.template_id, "T02");
        assert_eq!(generation_calls(&mock), 1);
        assert!(result.stats.prompt_tokens > 0);
    }

    #[tokio::test]
    async fn generation_prompt_never_contains_deleted_text() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        pipeline(mock.clone())
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();
        let calls = mock.calls();
        let gen = calls.iter().find(|c| c.model == "mock-gen").unwrap();
        assert!(!gen.user.contains("한심"));
        assert!(gen.user.contains("{{DATE_1}}"));
        assert!(!gen.user.contains("퇴사"), "untraceable fact reached the prompt");
    }

    #[tokio::test]
    async fn defective_output_triggers_exactly_one_retry() {
        let mock = backend(|n| {
            Ok(if n == 0 {
                "아래는 변환된 메시지입니다 😊 {{DATE_2}}까지 부탁드립니다".to_string()
            } else {
                CLEAN.to_string()
            })
        });
        let result = pipeline(mock.clone())
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();
        assert_eq!(result.stats.retry_count, 1);
        assert!(result.validation_issues.is_empty());
        assert_eq!(generation_calls(&mock), 2);

        let calls = mock.calls();
        let retry = calls.iter().filter(|c| c.model == "mock-gen").nth(1).unwrap();
        assert!(retry.user.contains("이전 결과의 문제점"));
        assert!(retry.temperature < config().generation.temperature);
    }

    #[tokio::test]
    async fn retry_is_bounded_and_defects_are_reported() {
        let mock = backend(|_| Ok("곧 보내주세요 😊".to_string()));
        let result = pipeline(mock.clone())
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();
        assert_eq!(generation_calls(&mock), 2);
        assert_eq!(result.stats.retry_count, 1);
        let types: Vec<IssueType> = result.validation_issues.iter().map(|i| i.issue_type).collect();
        assert!(types.contains(&IssueType::LockedSpanMissing));
        assert!(types.contains(&IssueType::Emoji));
    }

    #[tokio::test]
    async fn retry_prompt_keeps_locked_values_masked() {
        let mock = backend(|_| Ok("곧 보내주세요".to_string()));
        let result = pipeline(mock.clone())
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();

        let calls = mock.calls();
        let gens: Vec<_> = calls.iter().filter(|c| c.model == "mock-gen").collect();
        assert_eq!(gens.len(), 2);
        for call in &gens {
            assert!(!call.user.contains("2024년 2월 4일"), "{}", call.user);
            assert!(!call.system.contains("2024년 2월 4일"));
        }
        assert!(gens[1].user.contains("{{DATE_1}}이(가) 빠졌습니다"));

        let missing = result
            .validation_issues
            .iter()
            .find(|i| i.issue_type == IssueType::LockedSpanMissing)
            .unwrap();
        assert_eq!(missing.matched_text.as_deref(), Some("2024년 2월 4일"));
    }

    #[tokio::test]
    async fn failed_retry_keeps_first_candidate() {
        let mock = backend(|n| {
            if n == 0 {
                Ok("{{DATE_1}}까지 자료 부탁드립니다 😊".to_string())
            } else {
                Err(LlmError::Timeout(30))
            }
        });
        let result = pipeline(mock)
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();
        assert_eq!(result.transformed_text, "2024년 2월 4일까지 자료 부탁드립니다 😊");
        assert_eq!(result.stats.retry_count, 1);
    }

    #[tokio::test]
    async fn authentication_failure_aborts() {
        let mock = backend(|_| Err(LlmError::Authentication("bad key".into())));
        let err = pipeline(mock)
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUTHENTICATION");
        assert!(!err.user_message().contains("bad key"));
    }

    #[tokio::test]
    async fn optional_stage_failure_does_not_fail_request() {
        let mock = Arc::new(MockBackend::with_handler(|req| match req.model.as_str() {
            "mock-gen" => Ok(CLEAN.to_string()),
            "mock-labeler" => Ok(label_reply(req)),
            _ => Err(LlmError::Connection("offline".into())),
        }));
        let result = pipeline(mock)
            .execute(&TransformRequest::new(INPUT))
            .await
            .unwrap();
        assert!(!result.stats.stages.situation_analysis);
        assert_eq!(result.stats.template_id, "T01");
    }

    #[tokio::test]
    async fn input_is_validated_before_any_model_call() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        let p = pipeline(mock.clone());
        let err = p.execute(&TransformRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, PipelineError::EmptyInput));

        let long = "가".repeat(3001);
        let err = p.execute(&TransformRequest::new(long)).await.unwrap_err();
        assert!(matches!(err, PipelineError::InputTooLong { max: 3000, actual: 3001 }));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn knowledge_blocks_reach_the_prompt() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        let p = pipeline(mock.clone()).with_knowledge(Arc::new(StaticKnowledge::new(vec![
            "제출 양식은 PDF입니다".into(),
        ])));
        let result = p.execute(&TransformRequest::new(INPUT)).await.unwrap();
        assert!(result.stats.stages.knowledge);
        let calls = mock.calls();
        let gen = calls.iter().find(|c| c.model == "mock-gen").unwrap();
        assert!(gen.user.contains("제출 양식은 PDF입니다"));
    }

    #[tokio::test]
    async fn stream_emits_events_in_pipeline_order() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        let p = Arc::new(pipeline(mock));
        let events = collect(p.stream(TransformRequest::new(INPUT))).await;
        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();

        let order = [
            "spans",
            "maskedText",
            "segments",
            "labels",
            "situationAnalysis",
            "processedSegments",
            "templateSelected",
            "delta",
            "validationIssues",
            "stats",
            "usage",
            "done",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|n| names.iter().position(|x| x == n).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{names:?}");
        assert_eq!(names[0], "phase");
        assert_eq!(*names.last().unwrap(), "done");

        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Delta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, CLEAN);
    }

    #[tokio::test]
    async fn stream_marks_retry_before_new_deltas() {
        let mock = backend(|n| {
            Ok(if n == 0 {
                "근데 😊 {{DATE_1}}까지".to_string()
            } else {
                CLEAN.to_string()
            })
        });
        let p = Arc::new(pipeline(mock));
        let events = collect(p.stream(TransformRequest::new(INPUT))).await;

        let retry_at = events.iter().position(|e| e.name() == "retry").unwrap();
        let first_delta = events.iter().position(|e| e.name() == "delta").unwrap();
        let last_delta = events.iter().rposition(|e| e.name() == "delta").unwrap();
        assert!(first_delta < retry_at && retry_at < last_delta);

        let after_retry: String = events[retry_at..]
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Delta(d) => Some(d.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(after_retry, CLEAN);
    }

    #[tokio::test]
    async fn stream_ends_with_error_event_on_failure() {
        let mock = backend(|_| Err(LlmError::RateLimited { retry_after: Some(5) }));
        let p = Arc::new(pipeline(mock));
        let events = collect(p.stream(TransformRequest::new(INPUT))).await;
        match events.last() {
            Some(PipelineEvent::Error(payload)) => assert_eq!(payload.code, "RATE_LIMITED"),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(!events.iter().any(|e| e.name() == "done"));
    }

    #[tokio::test]
    async fn dropped_consumer_stops_model_calls() {
        let mock = backend(|_| Ok(CLEAN.to_string()));
        let mut cfg = config();
        cfg.stream_buffer = 1;
        let dispatcher = ModelDispatcher::empty().with_backend("mock", mock.clone());
        let p = Arc::new(TransformPipeline::new(Arc::new(cfg), Arc::new(dispatcher)));

        let mut rx = p.stream(TransformRequest::new(INPUT));
        assert_eq!(rx.recv().await.map(|e| e.name()), Some("phase"));
        drop(rx);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let calls = mock.calls();
        assert!(!calls.iter().any(|c| c.model.starts_with("mock-labeler")));
        assert_eq!(generation_calls(&mock), 0);
    }
}
