//! The per-request state machine.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::sink::{BackgroundTask, EventSink};
use super::{PipelineError, TransformPipeline};
use crate::pipeline::analysis::{
    analyze_situation, boost_identities, booster_gate, filter_facts, AnalysisError, IdentityParams,
    SituationAnalysis, SituationParams,
};
use crate::pipeline::events::{Phase, PipelineEvent};
use crate::pipeline::labeling::{enforce_labels, label_segments, LabeledSegment, LabelerParams};
use crate::pipeline::llm::{LlmError, LlmRequest, LlmResponse, ModelDispatcher};
use crate::pipeline::preprocess::{preprocess, remask_with_names, unmask, LockedSpan};
use crate::pipeline::prompt::{build_prompt, PromptInput};
use crate::pipeline::redact::{redact, Redaction};
use crate::pipeline::segment::{refine_segments, segment_text, RefineParams, Segment};
use crate::pipeline::template::{select_template, SelectedTemplate, SelectionInput};
use crate::pipeline::types::{PipelineResult, PipelineStats, StagesFired, TransformRequest};
use crate::pipeline::usage::{UsageLedger, UsagePhase};
use crate::pipeline::validation::{validate, ValidationContext, ValidationResult};

/// Capacity of the delta channel between a backend and the event sink.
const DELTA_BUFFER: usize = 32;

/// Request-scoped state after segmentation and the identity join.
struct TextState {
    normalized: String,
    spans: Vec<LockedSpan>,
    masked: String,
    segments: Vec<Segment>,
}

/// Everything a candidate output is validated against.
struct Frame<'a> {
    request: &'a TransformRequest,
    state: &'a TextState,
    labeled: &'a [LabeledSegment],
    redaction: &'a Redaction,
    template: &'a SelectedTemplate,
    situation: Option<&'a SituationAnalysis>,
    knowledge: &'a [String],
}

struct Candidate {
    text: String,
    validation: ValidationResult,
}

pub(super) fn check_input(
    request: &TransformRequest,
    max_chars: usize,
) -> Result<(), PipelineError> {
    let text = request.original_text.trim();
    if text.is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let actual = text.chars().count();
    if actual > max_chars {
        return Err(PipelineError::InputTooLong {
            max: max_chars,
            actual,
        });
    }
    Ok(())
}

pub(super) async fn run(
    pipeline: &TransformPipeline,
    request: &TransformRequest,
    sink: &EventSink,
) -> Result<PipelineResult, PipelineError> {
    let started = Instant::now();
    let config = &pipeline.config;
    check_input(request, config.max_input_chars)?;

    let ledger = Arc::new(UsageLedger::default());
    let mut stages = StagesFired::default();

    // Preprocessing
    sink.emit(PipelineEvent::Phase(Phase::Preprocessing)).await?;
    let pre = preprocess(&request.original_text);

    // Background analysis, joined where consumed
    let situation_task = {
        let dispatcher = pipeline.dispatcher.clone();
        let ledger = ledger.clone();
        let model = config.models.analysis.clone();
        let max_tokens = config.generation.auxiliary_max_tokens;
        let masked = pre.masked.clone();
        let sender = request.sender_info.clone();
        BackgroundTask::spawn("situation_analysis", async move {
            let params = SituationParams {
                model: &model,
                max_tokens,
            };
            analyze_situation(&dispatcher, &ledger, &params, &masked, sender.as_deref()).await
        })
    };
    let identity_task = booster_gate(
        config.identity_booster_enabled,
        &pre.masked,
        config.identity_min_chars,
    )
    .then(|| {
        let dispatcher = pipeline.dispatcher.clone();
        let ledger = ledger.clone();
        let model = config.models.identity.clone();
        let max_tokens = config.generation.auxiliary_max_tokens;
        let masked = pre.masked.clone();
        BackgroundTask::spawn("identity_booster", async move {
            let params = IdentityParams {
                model: &model,
                max_tokens,
            };
            boost_identities(&dispatcher, &ledger, &params, &masked).await
        })
    });

    // Segmenting
    sink.emit(PipelineEvent::Phase(Phase::Segmenting)).await?;
    let segments = segment_text(&pre.masked, &config.segmenter);
    let refined = refine_segments(
        &pipeline.dispatcher,
        &ledger,
        &RefineParams {
            model: &config.models.refiner,
            threshold_chars: config.refiner_threshold_chars,
            max_tokens: config.generation.auxiliary_max_tokens,
        },
        &pre.masked,
        segments,
    )
    .await;
    stages.segment_refiner = refined.fired;

    // Facts are traced against the text the analyzer saw, before any
    // identity re-masking.
    let analyzed = pre.masked.clone();
    let mut state = TextState {
        normalized: pre.normalized,
        spans: pre.spans,
        masked: pre.masked,
        segments: refined.segments,
    };
    if let Some(task) = identity_task {
        stages.identity_booster = join_identity(task, &mut state).await;
    }
    sink.emit(PipelineEvent::Spans(state.spans.clone())).await?;
    sink.emit(PipelineEvent::MaskedText(state.masked.clone())).await?;
    sink.emit(PipelineEvent::Segments(state.segments.clone())).await?;

    // Labeling
    sink.emit(PipelineEvent::Phase(Phase::Labeling)).await?;
    let outcome = label_segments(
        &pipeline.dispatcher,
        &ledger,
        &LabelerParams {
            model: &config.models.labeler,
            fallback_model: &config.models.labeler_fallback,
            max_tokens: config.generation.auxiliary_max_tokens,
        },
        &state.masked,
        &state.segments,
    )
    .await;
    stages.all_safe_recovery = outcome.all_safe_recovery;
    stages.labeling_fallback = outcome.fallback_used;
    let mut labeled = outcome.segments;
    let enforced = enforce_labels(&mut labeled);
    if !enforced.is_empty() {
        tracing::debug!(changes = enforced.len(), "Enforcer corrected labels");
    }
    sink.emit(PipelineEvent::Labels(labeled.clone())).await?;

    let situation = match situation_task.join().await {
        Some(Ok(analysis)) => {
            let analysis = filter_facts(analysis, &analyzed);
            stages.situation_analysis = true;
            sink.emit(PipelineEvent::SituationAnalysis(analysis.clone())).await?;
            Some(analysis)
        }
        Some(Err(e)) => {
            log_optional_failure("situation_analysis", &e);
            None
        }
        None => None,
    };

    // Template selection and redaction
    sink.emit(PipelineEvent::Phase(Phase::TemplateSelecting)).await?;
    let purpose = request
        .purpose
        .or_else(|| situation.as_ref().and_then(|s| s.purpose));
    let template = select_template(&SelectionInput {
        persona: request.persona,
        purpose,
        primary_context: request.primary_context(),
        topic: request.topic,
        masked_text: &state.masked,
        segments: &labeled,
    });
    stages.section_enforced = template.section_enforced;
    let redaction = redact(&labeled);
    sink.emit(PipelineEvent::ProcessedSegments(redaction.segments.clone()))
        .await?;
    sink.emit(PipelineEvent::TemplateSelected(template.clone())).await?;

    let knowledge = search_knowledge(pipeline, &state.masked).await;
    stages.knowledge = !knowledge.is_empty();

    let frame = Frame {
        request,
        state: &state,
        labeled: &labeled,
        redaction: &redaction,
        template: &template,
        situation: situation.as_ref(),
        knowledge: &knowledge,
    };

    // Generating and validating
    sink.emit(PipelineEvent::Phase(Phase::Generating)).await?;
    let settings = &config.generation;
    let request_first = generation_request(pipeline, &frame, &[])
        .with_temperature(settings.temperature)
        .with_reasoning_effort(settings.reasoning_effort);
    let response = generate(&pipeline.dispatcher, &request_first, sink).await?;
    ledger.record(UsagePhase::Generation, &request_first.model, &response.usage);

    sink.emit(PipelineEvent::Phase(Phase::Validating)).await?;
    let mut candidate = evaluate(pipeline, &frame, &response.content);
    let mut retry_count = 0;

    if candidate.validation.needs_retry() {
        let hints = candidate.validation.retry_hints(&frame.state.spans);
        tracing::info!(
            issues = candidate.validation.issues.len(),
            errors = candidate.validation.error_count(),
            "Validation requested a repair retry"
        );
        retry_count = 1;
        sink.emit(PipelineEvent::Retry(hints.clone())).await?;
        sink.emit(PipelineEvent::Phase(Phase::Retrying)).await?;
        let retry_request = generation_request(pipeline, &frame, &hints)
            .with_temperature(settings.retry_temperature)
            .with_reasoning_effort(settings.retry_reasoning_effort);
        match generate(&pipeline.dispatcher, &retry_request, sink).await {
            Ok(response) => {
                ledger.record(UsagePhase::Retry, &retry_request.model, &response.usage);
                sink.emit(PipelineEvent::Phase(Phase::Validating)).await?;
                let second = evaluate(pipeline, &frame, &response.content);
                if second.validation.error_count() <= candidate.validation.error_count() {
                    candidate = second;
                } else {
                    tracing::info!("Retry produced more errors, keeping first candidate");
                }
            }
            Err(PipelineError::Generation(e)) if !matches!(e, LlmError::Authentication(_)) => {
                tracing::warn!(code = e.code(), "Retry generation failed, keeping first candidate");
            }
            Err(e) => return Err(e),
        }
    }

    // Completion
    let usage = ledger.report();
    let stats = PipelineStats {
        segment_count: labeled.len(),
        tiers: redaction.counts,
        locked_span_count: state.spans.len(),
        retry_count,
        stages,
        template_id: template.template_id.to_string(),
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        latency_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        segments = stats.segment_count,
        spans = stats.locked_span_count,
        retries = retry_count,
        template = %stats.template_id,
        passed = candidate.validation.passed,
        latency_ms = stats.latency_ms,
        "Transform complete"
    );

    sink.emit(PipelineEvent::ValidationIssues(candidate.validation.issues.clone()))
        .await?;
    sink.emit(PipelineEvent::Stats(stats.clone())).await?;
    sink.emit(PipelineEvent::Usage(usage)).await?;
    sink.emit(PipelineEvent::Done(candidate.text.clone())).await?;

    Ok(PipelineResult {
        transformed_text: candidate.text,
        validation_issues: candidate.validation.issues,
        stats,
    })
}

/// Merge booster names into the span list. Returns whether anything changed.
async fn join_identity(
    task: BackgroundTask<Result<Vec<String>, AnalysisError>>,
    state: &mut TextState,
) -> bool {
    let names = match task.join().await {
        Some(Ok(names)) if !names.is_empty() => names,
        Some(Err(e)) => {
            log_optional_failure("identity_booster", &e);
            return false;
        }
        _ => return false,
    };
    let Some(remasked) =
        remask_with_names(&state.normalized, &state.spans, &state.segments, &names)
    else {
        tracing::debug!("Identity booster names left spans unchanged");
        return false;
    };
    tracing::debug!(
        spans = remasked.spans.len(),
        "Identity booster added name spans"
    );
    state.spans = remasked.spans;
    state.masked = remasked.masked_text;
    state.segments = remasked.segments;
    true
}

async fn search_knowledge(pipeline: &TransformPipeline, masked: &str) -> Vec<String> {
    let Some(knowledge) = &pipeline.knowledge else {
        return Vec::new();
    };
    match knowledge.search(masked, pipeline.config.rag_max_blocks).await {
        Ok(mut blocks) => {
            blocks.truncate(pipeline.config.rag_max_blocks);
            blocks
        }
        Err(e) => {
            tracing::warn!("Knowledge search failed, continuing without it: {e}");
            Vec::new()
        }
    }
}

fn log_optional_failure(stage: &'static str, error: &AnalysisError) {
    tracing::warn!(stage, code = error.code(), "Optional stage did not fire");
}

fn generation_request(
    pipeline: &TransformPipeline,
    frame: &Frame<'_>,
    retry_hints: &[String],
) -> LlmRequest {
    let prompt = build_prompt(&PromptInput {
        persona: frame.request.persona,
        segments: &frame.redaction.segments,
        template: frame.template,
        situation: frame.situation,
        knowledge: frame.knowledge,
        sender_info: frame.request.sender_info.as_deref(),
        user_prompt: frame.request.user_prompt.as_deref(),
        retry_hints,
    });
    LlmRequest::new(&pipeline.config.models.generation, prompt.system, prompt.user)
        .with_max_tokens(pipeline.config.generation.max_tokens)
}

/// Stream one generation, forwarding deltas to the sink.
async fn generate(
    dispatcher: &ModelDispatcher,
    request: &LlmRequest,
    sink: &EventSink,
) -> Result<LlmResponse, PipelineError> {
    let (tx, mut rx) = mpsc::channel::<String>(DELTA_BUFFER);
    let forward = async move {
        while let Some(delta) = rx.recv().await {
            sink.emit(PipelineEvent::Delta(delta)).await?;
        }
        Ok::<(), PipelineError>(())
    };
    let (response, forwarded) = tokio::join!(dispatcher.stream(request, tx), forward);
    forwarded?;
    Ok(response?)
}

fn evaluate(pipeline: &TransformPipeline, frame: &Frame<'_>, raw: &str) -> Candidate {
    let raw = raw.trim();
    let unmasked = unmask(raw, &frame.state.spans);
    let validation = validate(
        &ValidationContext {
            output: &unmasked.text,
            raw_output: raw,
            original: &frame.state.normalized,
            spans: &frame.state.spans,
            unmask: &unmasked,
            segments: frame.labeled,
            redactions: &frame.redaction.map,
            persona: frame.request.persona,
            template: frame.template,
        },
        &pipeline.config.validation,
    );
    Candidate {
        text: unmasked.text,
        validation,
    }
}
