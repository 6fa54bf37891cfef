//! Model-backed structure labeling with acceptance checks, one targeted
//! retry and the all-safe recovery path.

use std::collections::HashMap;

use super::enforce::{apply_triggers, scan_triggers, LabelChange};
use super::types::{Label, LabeledSegment, Tier};
use crate::pipeline::llm::{LlmError, LlmRequest, ModelDispatcher};
use crate::pipeline::segment::Segment;
use crate::pipeline::usage::{UsageLedger, UsagePhase};

/// Share of segments that must receive a label.
const MIN_COVERAGE: f64 = 0.6;
/// All-safe recovery only runs on at least this many segments.
const ALL_SAFE_MIN_SEGMENTS: usize = 4;

const LABELER_SYSTEM: &str = "\
당신은 한국어 메시지의 각 구간을 분류하는 분석기입니다.
각 구간에 아래 라벨 중 정확히 하나를 붙이세요.

[유지] CORE_FACT(핵심 사실), CORE_INTENT(핵심 의도), REQUEST(요청), APOLOGY(사과), COURTESY(인사·예의)
[다듬기] ACCOUNTABILITY(책임 소재), SELF_JUSTIFICATION(자기 변명), NEGATIVE_FEEDBACK(부정적 피드백), EMOTIONAL(감정 표현), EXCESS_DETAIL(과도한 세부)
[삭제] AGGRESSION(공격·욕설), PERSONAL_ATTACK(인신공격), PRIVATE_TMI(불필요한 사생활), PURE_GRUMBLE(단순 불평)

규칙:
- {{TYPE_N}} 형태의 자리표시자는 실제 값이 가려진 것이므로 그대로 사실로 취급합니다.
- 출력은 한 줄에 하나씩 `구간ID|라벨` 형식만 사용합니다. 설명을 덧붙이지 마세요.
- 모든 구간 ID에 대해 빠짐없이 출력하세요.";

/// Model names and token ceiling for labeling.
#[derive(Debug, Clone, Copy)]
pub struct LabelerParams<'a> {
    pub model: &'a str,
    pub fallback_model: &'a str,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelingOutcome {
    pub segments: Vec<LabeledSegment>,
    pub all_safe_recovery: bool,
    pub fallback_used: bool,
    /// Scanner or fallback upgrades made during all-safe recovery.
    pub recovery_changes: Vec<LabelChange>,
}

/// Parse `id|LABEL` lines. Known ids only; unresolvable labels fall back
/// to the safest keep label.
pub fn parse_labels(content: &str, segments: &[Segment]) -> HashMap<String, Label> {
    let mut labels = HashMap::new();
    for line in content.lines() {
        let Some((id, token)) = line.split_once('|') else {
            continue;
        };
        let id = id
            .trim()
            .trim_matches(|c: char| !c.is_ascii_alphanumeric())
            .to_ascii_uppercase();
        if !segments.iter().any(|s| s.id == id) {
            continue;
        }
        let label = Label::parse(token).unwrap_or_else(|| {
            tracing::debug!(id = %id, "Unresolvable label token, using safest keep label");
            Label::SAFEST_KEEP
        });
        labels.insert(id, label);
    }
    labels
}

fn accepted(labels: &HashMap<String, Label>, total: usize) -> bool {
    let coverage = labels.len() as f64 / total as f64;
    coverage >= MIN_COVERAGE && labels.values().any(Label::is_core)
}

fn build_user(masked: &str, segments: &[Segment], missing: Option<&[&str]>) -> String {
    let mut user = format!("[전체 메시지]\n{masked}\n\n[구간]\n");
    for segment in segments {
        user.push_str(&format!("{}: {}\n", segment.id, segment.text));
    }
    if let Some(missing) = missing {
        user.push_str(&format!(
            "\n이전 응답에서 다음 구간의 라벨이 누락되었습니다: {}\n모든 구간을 다시 출력하세요.\n",
            missing.join(", ")
        ));
    }
    user
}

async fn call(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    phase: UsagePhase,
    model: &str,
    max_tokens: u32,
    user: String,
) -> Result<String, LlmError> {
    let request = LlmRequest::new(model, LABELER_SYSTEM, user)
        .with_temperature(0.0)
        .with_max_tokens(max_tokens);
    let response = dispatcher.complete(&request).await?;
    ledger.record(phase, model, &response.usage);
    Ok(response.content)
}

fn assemble(segments: &[Segment], labels: &HashMap<String, Label>) -> Vec<LabeledSegment> {
    segments
        .iter()
        .map(|s| LabeledSegment::new(s, labels.get(&s.id).copied().unwrap_or(Label::SAFEST_KEEP)))
        .collect()
}

/// Label every segment.
///
/// Never fails: if both models are unreachable every segment gets the
/// safest keep label.
pub async fn label_segments(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    params: &LabelerParams<'_>,
    masked: &str,
    segments: &[Segment],
) -> LabelingOutcome {
    if segments.is_empty() {
        return LabelingOutcome::default();
    }
    let max_tokens = params.max_tokens;
    let mut outcome = LabelingOutcome::default();

    let mut model = params.model;
    let user = build_user(masked, segments, None);
    let first = match call(dispatcher, ledger, UsagePhase::Labeling, model, max_tokens, user.clone()).await {
        Ok(content) => Ok(content),
        Err(e) => {
            tracing::warn!(code = e.code(), "Primary labeler failed, trying fallback model");
            model = params.fallback_model;
            outcome.fallback_used = true;
            call(dispatcher, ledger, UsagePhase::LabelingFallback, model, max_tokens, user).await
        }
    };
    let content = match first {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(code = e.code(), "Labeling unavailable, defaulting all segments");
            outcome.segments = assemble(segments, &HashMap::new());
            return outcome;
        }
    };

    let mut labels = parse_labels(&content, segments);
    if !accepted(&labels, segments.len()) {
        let missing: Vec<&str> = segments
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !labels.contains_key(*id))
            .collect();
        tracing::debug!(
            labeled = labels.len(),
            total = segments.len(),
            "Labeler output rejected, retrying once"
        );
        let phase = if outcome.fallback_used {
            UsagePhase::LabelingFallback
        } else {
            UsagePhase::Labeling
        };
        let user = build_user(masked, segments, Some(&missing));
        let retry = call(dispatcher, ledger, phase, model, max_tokens, user).await;
        let merged = match retry {
            Ok(content) => {
                let mut merged = labels.clone();
                merged.extend(parse_labels(&content, segments));
                merged
            }
            Err(e) => {
                tracing::warn!(code = e.code(), "Labeler retry failed");
                labels.clone()
            }
        };
        labels = if accepted(&merged, segments.len()) {
            merged
        } else {
            tracing::warn!("Labeler retry rejected, defaulting all segments");
            HashMap::new()
        };
    }

    outcome.segments = assemble(segments, &labels);
    recover_all_safe(dispatcher, ledger, params, masked, segments, &mut outcome).await;
    outcome
}

/// Second look at results where everything came back keep-tier.
async fn recover_all_safe(
    dispatcher: &ModelDispatcher,
    ledger: &UsageLedger,
    params: &LabelerParams<'_>,
    masked: &str,
    segments: &[Segment],
    outcome: &mut LabelingOutcome,
) {
    if outcome.segments.len() < ALL_SAFE_MIN_SEGMENTS
        || outcome.segments.iter().any(|s| s.tier != Tier::Green)
    {
        return;
    }
    outcome.all_safe_recovery = true;

    let hits = scan_triggers(&outcome.segments);
    if !hits.is_empty() {
        outcome.recovery_changes = apply_triggers(&mut outcome.segments, &hits);
        tracing::info!(upgrades = hits.len(), "All-safe recovery upgraded labels by trigger scan");
        return;
    }

    let content = match call(
        dispatcher,
        ledger,
        UsagePhase::LabelingFallback,
        params.fallback_model,
        params.max_tokens,
        build_user(masked, segments, None),
    )
    .await
    {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(code = e.code(), "All-safe fallback check failed, keeping labels");
            return;
        }
    };
    outcome.fallback_used = true;

    let second = parse_labels(&content, segments);
    for segment in outcome.segments.iter_mut() {
        let Some(&label) = second.get(&segment.id) else {
            continue;
        };
        if label.tier() != Tier::Green {
            outcome.recovery_changes.push(LabelChange {
                id: segment.id.clone(),
                from: segment.label,
                to: label,
            });
            segment.relabel(label);
        }
    }
    tracing::info!(
        upgrades = outcome.recovery_changes.len(),
        "All-safe recovery fallback check complete"
    );
}
