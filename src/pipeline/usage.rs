//! Per-request token ledger and cost estimate.

use std::sync::Mutex;

use serde::Serialize;

use super::llm::TokenUsage;

/// Pipeline phase a model call is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UsagePhase {
    SegmentRefine,
    Labeling,
    LabelingFallback,
    SituationAnalysis,
    IdentityBooster,
    Generation,
    Retry,
}

impl UsagePhase {
    pub const ALL: [UsagePhase; 7] = [
        UsagePhase::SegmentRefine,
        UsagePhase::Labeling,
        UsagePhase::LabelingFallback,
        UsagePhase::SituationAnalysis,
        UsagePhase::IdentityBooster,
        UsagePhase::Generation,
        UsagePhase::Retry,
    ];
}

/// USD per one million tokens: (prompt, completion). Longest prefix wins.
const PRICES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-5-mini", 0.25, 2.00),
    ("gpt-5-nano", 0.05, 0.40),
    ("gpt-5", 1.25, 10.00),
    ("o3-mini", 1.10, 4.40),
    ("o4-mini", 1.10, 4.40),
    ("o3", 2.00, 8.00),
    ("claude-3-5-haiku", 0.80, 4.00),
    ("claude-haiku-4", 1.00, 5.00),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-opus-4", 15.00, 75.00),
    ("gemini-2.0-flash", 0.10, 0.40),
    ("gemini-2.5-flash", 0.30, 2.50),
    ("gemini-2.5-pro", 1.25, 10.00),
];

/// Monthly request volumes used for the cost projection.
pub const MONTHLY_VOLUMES: [u64; 3] = [1_000, 10_000, 100_000];

fn price_for(model: &str) -> (f64, f64) {
    let model = model.strip_prefix("openai/").unwrap_or(model);
    PRICES
        .iter()
        .filter(|(prefix, _, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _, _)| prefix.len())
        .map(|&(_, prompt, completion)| (prompt, completion))
        .unwrap_or((0.0, 0.0))
}

pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (prompt, completion) = price_for(model);
    (usage.prompt_tokens as f64 * prompt + usage.completion_tokens as f64 * completion)
        / 1_000_000.0
}

#[derive(Debug, Clone)]
struct UsageRecord {
    phase: UsagePhase,
    model: String,
    usage: TokenUsage,
}

/// Collects usage from every model call of one request. Background
/// tasks record into it concurrently.
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageLedger {
    pub fn record(&self, phase: UsagePhase, model: &str, usage: &TokenUsage) {
        if let Ok(mut records) = self.records.lock() {
            records.push(UsageRecord {
                phase,
                model: model.to_string(),
                usage: *usage,
            });
        }
    }

    pub fn report(&self) -> UsageReport {
        let records = self
            .records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();

        let phases: Vec<PhaseUsage> = UsagePhase::ALL
            .iter()
            .filter_map(|&phase| {
                let mine: Vec<&UsageRecord> = records.iter().filter(|r| r.phase == phase).collect();
                if mine.is_empty() {
                    return None;
                }
                Some(PhaseUsage {
                    phase,
                    model: mine[0].model.clone(),
                    calls: mine.len(),
                    prompt_tokens: mine.iter().map(|r| r.usage.prompt_tokens).sum(),
                    completion_tokens: mine.iter().map(|r| r.usage.completion_tokens).sum(),
                    cost_usd: mine.iter().map(|r| estimate_cost(&r.model, &r.usage)).sum(),
                })
            })
            .collect();

        let cost_usd: f64 = phases.iter().map(|p| p.cost_usd).sum();
        UsageReport {
            prompt_tokens: phases.iter().map(|p| p.prompt_tokens).sum(),
            completion_tokens: phases.iter().map(|p| p.completion_tokens).sum(),
            cost_usd,
            monthly_projection: MONTHLY_VOLUMES
                .iter()
                .map(|&requests| MonthlyProjection {
                    requests,
                    cost_usd: cost_usd * requests as f64,
                })
                .collect(),
            phases,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseUsage {
    pub phase: UsagePhase,
    pub model: String,
    pub calls: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyProjection {
    pub requests: u64,
    pub cost_usd: f64,
}

/// The `usage` event payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageReport {
    pub phases: Vec<PhaseUsage>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub monthly_projection: Vec<MonthlyProjection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(p: u64, c: u64) -> TokenUsage {
        TokenUsage {
            prompt_tokens: p,
            completion_tokens: c,
        }
    }

    #[test]
    fn longest_prefix_price_is_used() {
        assert_eq!(price_for("gpt-4o-mini-2024-07-18"), (0.15, 0.60));
        assert_eq!(price_for("gpt-4o"), (2.50, 10.00));
        assert_eq!(price_for("openai/gpt-4o"), (2.50, 10.00));
        assert_eq!(price_for("ollama/llama3"), (0.0, 0.0));
    }

    #[test]
    fn report_aggregates_per_phase_and_projects() {
        let ledger = UsageLedger::default();
        ledger.record(UsagePhase::Labeling, "gpt-4o-mini", &usage(1_000_000, 0));
        ledger.record(UsagePhase::Generation, "gpt-4o", &usage(0, 100_000));
        ledger.record(UsagePhase::Generation, "gpt-4o", &usage(0, 100_000));

        let report = ledger.report();
        assert_eq!(report.phases.len(), 2);
        assert_eq!(report.phases[0].phase, UsagePhase::Labeling);
        assert_eq!(report.phases[1].calls, 2);
        assert_eq!(report.completion_tokens, 200_000);
        assert!((report.cost_usd - (0.15 + 2.0)).abs() < 1e-9);
        assert_eq!(report.monthly_projection.len(), 3);
        assert!((report.monthly_projection[2].cost_usd - report.cost_usd * 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn phases_serialize_camel_case() {
        assert_eq!(
            serde_json::to_value(UsagePhase::SegmentRefine).unwrap(),
            "segmentRefine"
        );
    }
}
