//! Subgroup effect estimates and the test for interaction across subgroups

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::contingency::{estimate_effect, EffectEstimate, Measure, TwoByTwo};
use crate::distributions::chi2_p_value;

/// Effect estimate within one level of the grouping column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubgroupResult {
    pub label: String,
    /// Rows carrying this label, coded or not
    pub n: usize,
    pub n_exposed: u64,
    pub events_exposed: u64,
    pub events_unexposed: u64,
    pub table: TwoByTwo,
    pub estimate: EffectEstimate,
    /// Inverse-variance weight 1/se², 0 when se is 0
    pub weight: f64,
    /// Share of the total weight, in percent
    pub relative_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeterogeneityResult {
    pub q: f64,
    pub df: u32,
    pub p_value: f64,
    pub i_squared: f64,
    /// Inverse-variance pooled estimate on the reporting scale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pooled: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<EpiError>,
}

impl HeterogeneityResult {
    fn none(warning: Option<EpiError>) -> Self {
        Self { q: 0.0, df: 0, p_value: 1.0, i_squared: 0.0, pooled: None, warning }
    }

    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubgroupAnalysis {
    pub measure: Measure,
    pub outcome: String,
    pub exposure: String,
    pub subgroup: String,
    pub subgroups: Vec<SubgroupResult>,
    pub heterogeneity: HeterogeneityResult,
}

fn inverse_variance(se: f64) -> f64 {
    if se > 0.0 && se.is_finite() {
        1.0 / (se * se)
    } else {
        0.0
    }
}

/// Estimate the effect within every level of `subgroup`.
///
/// Levels are the distinct non-missing labels in lexicographic order.
pub fn subgroup_effects(
    dataset: &Dataset,
    outcome: &str,
    exposure: &str,
    subgroup: &str,
    measure: Measure,
    config: &EngineConfig,
) -> Result<Vec<SubgroupResult>, EpiError> {
    dataset.validate_roles(&[("outcome", outcome), ("exposure", exposure), ("subgroup", subgroup)])?;

    let mut results = Vec::new();
    for level in dataset.levels(subgroup) {
        let subset = dataset.subset(subgroup, &level);
        let table = TwoByTwo::from_dataset(&subset, outcome, exposure)?;
        let estimate = estimate_effect(&table, measure, config);
        if estimate.is_neutral() {
            warn!(subgroup = %level, "neutral estimate substituted for sparse subgroup");
        }
        results.push(SubgroupResult {
            n: subset.len(),
            n_exposed: table.exposed_total(),
            events_exposed: table.a,
            events_unexposed: table.c,
            table,
            weight: inverse_variance(estimate.se),
            relative_weight: 0.0,
            estimate,
            label: level,
        });
    }

    let total_weight: f64 = results.iter().map(|r| r.weight).sum();
    if total_weight > 0.0 {
        for r in &mut results {
            r.relative_weight = r.weight / total_weight * 100.0;
        }
    }
    debug!(subgroups = results.len(), total_weight, "subgroup estimates");
    Ok(results)
}

/// Cochran's Q across subgroup estimates, with df = k − 1 and I²
///
/// Pooling happens on ln(OR) for odds ratios and on the raw scale for
/// risk differences.
pub fn heterogeneity(results: &[SubgroupResult]) -> HeterogeneityResult {
    let k = results.len();
    if k < 2 {
        return HeterogeneityResult::none(None);
    }

    let total_weight: f64 = results.iter().map(|r| r.weight).sum();
    if total_weight <= 0.0 {
        warn!(k, "no subgroup carries weight, interaction test skipped");
        return HeterogeneityResult::none(Some(
            EpiError::insufficient_data("every subgroup has a zero standard error").in_operation("heterogeneity"),
        ));
    }

    let theta: Vec<f64> = results.iter().map(|r| r.estimate.analysis_scale()).collect();
    let pooled = results.iter().zip(&theta).map(|(r, t)| r.weight * t).sum::<f64>() / total_weight;
    let q: f64 = results
        .iter()
        .zip(&theta)
        .filter(|(r, _)| r.weight > 0.0)
        .map(|(r, t)| r.weight * (t - pooled).powi(2))
        .sum();
    let df = (k - 1) as u32;
    let i_squared = if q > 0.0 {
        ((q - df as f64) / q * 100.0).max(0.0)
    } else {
        0.0
    };

    let pooled = match results[0].estimate.measure {
        Measure::OddsRatio => pooled.exp(),
        Measure::RiskDifference => pooled,
    };

    HeterogeneityResult {
        q,
        df,
        p_value: chi2_p_value(q, df),
        i_squared,
        pooled: Some(pooled),
        warning: None,
    }
}

/// Per-subgroup estimates plus the interaction test
pub fn analyze_subgroups(
    dataset: &Dataset,
    outcome: &str,
    exposure: &str,
    subgroup: &str,
    measure: Measure,
    config: &EngineConfig,
) -> Result<SubgroupAnalysis, EpiError> {
    let subgroups = subgroup_effects(dataset, outcome, exposure, subgroup, measure, config)?;
    let heterogeneity = heterogeneity(&subgroups);
    Ok(SubgroupAnalysis {
        measure,
        outcome: outcome.to_string(),
        exposure: exposure.to_string(),
        subgroup: subgroup.to_string(),
        subgroups,
        heterogeneity,
    })
}

// ============ Plugin ============

#[derive(Deserialize)]
struct SubgroupArgs {
    data: Dataset,
    outcome: String,
    exposure: String,
    subgroup: String,
    #[serde(default)]
    measure: Measure,
}

pub struct SubgroupAnalysisFn;

static SUBGROUP_ARGS: [ArgMeta; 5] = [
    ArgMeta::required("data", "Dataset", "Records with outcome, exposure and subgroup columns"),
    ArgMeta::required("outcome", "String", "Binary outcome column"),
    ArgMeta::required("exposure", "String", "Binary exposure column"),
    ArgMeta::required("subgroup", "String", "Grouping column"),
    ArgMeta::optional("measure", "String", "OR or RD", "OR"),
];

static SUBGROUP_EXAMPLES: [&str; 1] =
    ["subgroup_analysis(data=[...], outcome=\"death\", exposure=\"smoker\", subgroup=\"sex\")"];

static SUBGROUP_RELATED: [&str; 2] = ["effect_estimate", "methods_text"];

impl FunctionPlugin for SubgroupAnalysisFn {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "subgroup_analysis",
            description: "Effect estimate per subgroup with a test for interaction (Q, I², p)",
            usage: "subgroup_analysis(data, outcome, exposure, subgroup, [measure])",
            args: &SUBGROUP_ARGS,
            returns: "Object",
            examples: &SUBGROUP_EXAMPLES,
            category: "stats/subgroup",
            related: &SUBGROUP_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let a: SubgroupArgs = decode_args("subgroup_analysis", args)?;
        let analysis = analyze_subgroups(&a.data, &a.outcome, &a.exposure, &a.subgroup, a.measure, ctx.config())?;
        encode_result(&analysis)
    }
}
