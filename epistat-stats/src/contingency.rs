//! 2×2 contingency tables and their effect measures: odds ratio, risk difference

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::distributions::z_to_two_sided_p;

/// Effect measure of a 2×2 table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Measure {
    #[default]
    #[serde(rename = "OR", alias = "or")]
    OddsRatio,
    #[serde(rename = "RD", alias = "rd")]
    RiskDifference,
}

impl Measure {
    /// Value of "no effect" on the reporting scale
    pub fn null_value(self) -> f64 {
        match self {
            Measure::OddsRatio => 1.0,
            Measure::RiskDifference => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Measure::OddsRatio => "OR",
            Measure::RiskDifference => "RD",
        }
    }
}

/// Cell counts, exposure in rows and outcome in columns
///
/// | | event | no event |
/// |---|---|---|
/// | exposed | a | b |
/// | unexposed | c | d |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TwoByTwo {
    pub a: u64,
    pub b: u64,
    pub c: u64,
    pub d: u64,
}

impl TwoByTwo {
    pub fn new(a: u64, b: u64, c: u64, d: u64) -> Self {
        Self { a, b, c, d }
    }

    /// Margins saturate at `u64::MAX`
    pub fn total(&self) -> u64 {
        self.exposed_total().saturating_add(self.unexposed_total())
    }

    pub fn exposed_total(&self) -> u64 {
        self.a.saturating_add(self.b)
    }

    pub fn unexposed_total(&self) -> u64 {
        self.c.saturating_add(self.d)
    }

    pub fn has_zero_cell(&self) -> bool {
        self.a == 0 || self.b == 0 || self.c == 0 || self.d == 0
    }

    /// Cells as floats, zeros replaced by `correction`
    pub fn corrected(&self, correction: f64) -> [f64; 4] {
        let fix = |n: u64| if n == 0 { correction } else { n as f64 };
        [fix(self.a), fix(self.b), fix(self.c), fix(self.d)]
    }

    /// Add one observation
    pub fn record(&mut self, event: bool, exposed: bool) {
        match (exposed, event) {
            (true, true) => self.a += 1,
            (true, false) => self.b += 1,
            (false, true) => self.c += 1,
            (false, false) => self.d += 1,
        }
    }

    /// Tabulate binary-coded outcome and exposure columns.
    ///
    /// Rows where either cell is missing or uncoded are skipped.
    pub fn from_dataset(dataset: &Dataset, outcome: &str, exposure: &str) -> Result<Self, EpiError> {
        dataset.validate_roles(&[("outcome", outcome), ("exposure", exposure)])?;
        let mut table = Self::default();
        for record in dataset.records() {
            let event = Dataset::value(record, outcome).as_binary();
            let exposed = Dataset::value(record, exposure).as_binary();
            if let (Some(event), Some(exposed)) = (event, exposed) {
                table.record(event, exposed);
            }
        }
        Ok(table)
    }

    /// Tabulate paired outcome/exposure vectors
    pub fn from_vectors(outcomes: &[RawValue], exposures: &[RawValue]) -> Result<Self, EpiError> {
        if outcomes.len() != exposures.len() {
            return Err(EpiError::validation(format!(
                "outcome and exposure vectors differ in length ({} vs {})",
                outcomes.len(),
                exposures.len()
            )));
        }
        let mut table = Self::default();
        for (o, e) in outcomes.iter().zip(exposures) {
            if let (Some(event), Some(exposed)) = (o.as_binary(), e.as_binary()) {
                table.record(event, exposed);
            }
        }
        Ok(table)
    }
}

/// Point estimate with its Wald inference
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectEstimate {
    pub measure: Measure,
    pub estimate: f64,
    pub se: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64,
    /// ln(OR); absent for the risk difference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_estimate: Option<f64>,
    /// True when at least one zero cell was replaced
    pub corrected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<EpiError>,
}

impl EffectEstimate {
    /// Fail-soft estimate used for sparse or undefined tables
    pub fn neutral(measure: Measure, warning: EpiError) -> Self {
        let (estimate, ci_lower, ci_upper, log_estimate) = match measure {
            Measure::OddsRatio => (1.0, 0.5, 2.0, Some(0.0)),
            Measure::RiskDifference => (0.0, 0.0, 0.0, None),
        };
        Self {
            measure,
            estimate,
            se: 0.0,
            ci_lower,
            ci_upper,
            p_value: 1.0,
            log_estimate,
            corrected: false,
            warning: Some(warning),
        }
    }

    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }

    pub fn is_neutral(&self) -> bool {
        self.warning.is_some()
    }

    /// Estimate on the pooling scale: ln(OR) or the raw RD
    pub fn analysis_scale(&self) -> f64 {
        match self.measure {
            Measure::OddsRatio => self.log_estimate.unwrap_or_else(|| self.estimate.ln()),
            Measure::RiskDifference => self.estimate,
        }
    }
}

/// Odds ratio with Wald CI and p-value
pub fn odds_ratio(table: &TwoByTwo, config: &EngineConfig) -> EffectEstimate {
    if let Some(warning) = sparse_warning(table, config) {
        return EffectEstimate::neutral(Measure::OddsRatio, warning);
    }

    let [a, b, c, d] = table.corrected(config.continuity_correction);
    let lor = (a * d / (b * c)).ln();
    let se = (1.0 / a + 1.0 / b + 1.0 / c + 1.0 / d).sqrt();
    let z = config.confidence_z;

    EffectEstimate {
        measure: Measure::OddsRatio,
        estimate: lor.exp(),
        se,
        ci_lower: (lor - z * se).exp(),
        ci_upper: (lor + z * se).exp(),
        p_value: z_to_two_sided_p(lor / se),
        log_estimate: Some(lor),
        corrected: table.has_zero_cell(),
        warning: None,
    }
}

/// Risk difference p1 − p2 with Wald CI and p-value
///
/// The point estimate uses the true counts; the variance switches to the
/// corrected cells whenever one of them is zero.
pub fn risk_difference(table: &TwoByTwo, config: &EngineConfig) -> EffectEstimate {
    if let Some(warning) = sparse_warning(table, config) {
        return EffectEstimate::neutral(Measure::RiskDifference, warning);
    }
    if table.exposed_total() == 0 || table.unexposed_total() == 0 {
        warn!(?table, "risk difference undefined for an empty arm");
        return EffectEstimate::neutral(
            Measure::RiskDifference,
            EpiError::insufficient_data("risk is undefined when an exposure arm is empty")
                .in_operation("risk_difference"),
        );
    }

    let p1 = table.a as f64 / table.exposed_total() as f64;
    let p2 = table.c as f64 / table.unexposed_total() as f64;
    let rd = p1 - p2;

    let se = if table.has_zero_cell() {
        let [a, b, c, d] = table.corrected(config.continuity_correction);
        let (n1, n2) = (a + b, c + d);
        let (q1, q2) = (a / n1, c / n2);
        (q1 * (1.0 - q1) / n1 + q2 * (1.0 - q2) / n2).sqrt()
    } else {
        let (n1, n2) = (table.exposed_total() as f64, table.unexposed_total() as f64);
        (p1 * (1.0 - p1) / n1 + p2 * (1.0 - p2) / n2).sqrt()
    };
    let z = config.confidence_z;

    EffectEstimate {
        measure: Measure::RiskDifference,
        estimate: rd,
        se,
        ci_lower: rd - z * se,
        ci_upper: rd + z * se,
        p_value: z_to_two_sided_p(rd / se),
        log_estimate: None,
        corrected: table.has_zero_cell(),
        warning: None,
    }
}

/// Dispatch on the selected measure
pub fn estimate_effect(table: &TwoByTwo, measure: Measure, config: &EngineConfig) -> EffectEstimate {
    match measure {
        Measure::OddsRatio => odds_ratio(table, config),
        Measure::RiskDifference => risk_difference(table, config),
    }
}

fn sparse_warning(table: &TwoByTwo, config: &EngineConfig) -> Option<EpiError> {
    let n = table.total();
    if (n as usize) < config.min_observations {
        warn!(n, min = config.min_observations, "too few observations, returning neutral estimate");
        return Some(
            EpiError::insufficient_data(format!(
                "{} observations; at least {} are needed for a stable estimate",
                n, config.min_observations
            ))
            .in_operation("effect_estimate"),
        );
    }
    None
}

// ============ Plugin ============

/// Where a 2×2 table comes from
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TableInput {
    Counts { a: u64, b: u64, c: u64, d: u64 },
    Columns { data: Dataset, outcome: String, exposure: String },
    Vectors { outcomes: Vec<RawValue>, exposures: Vec<RawValue> },
}

impl TableInput {
    pub fn tabulate(&self) -> Result<TwoByTwo, EpiError> {
        match self {
            TableInput::Counts { a, b, c, d } => Ok(TwoByTwo::new(*a, *b, *c, *d)),
            TableInput::Columns { data, outcome, exposure } => TwoByTwo::from_dataset(data, outcome, exposure),
            TableInput::Vectors { outcomes, exposures } => TwoByTwo::from_vectors(outcomes, exposures),
        }
    }
}

#[derive(Deserialize)]
struct EffectArgs {
    #[serde(flatten)]
    table: TableInput,
    #[serde(default)]
    measure: Measure,
}

pub struct EffectEstimateFn;

static EFFECT_ARGS: [ArgMeta; 10] = [
    ArgMeta::optional("a", "Integer", "Exposed with event", "-"),
    ArgMeta::optional("b", "Integer", "Exposed without event", "-"),
    ArgMeta::optional("c", "Integer", "Unexposed with event", "-"),
    ArgMeta::optional("d", "Integer", "Unexposed without event", "-"),
    ArgMeta::optional("data", "Dataset", "Records to tabulate instead of counts", "-"),
    ArgMeta::optional("outcome", "String", "Binary outcome column (with data)", "-"),
    ArgMeta::optional("exposure", "String", "Binary exposure column (with data)", "-"),
    ArgMeta::optional("outcomes", "List<Text>", "Binary outcome vector", "-"),
    ArgMeta::optional("exposures", "List<Text>", "Binary exposure vector", "-"),
    ArgMeta::optional("measure", "String", "OR or RD", "OR"),
];

static EFFECT_EXAMPLES: [&str; 3] = [
    "effect_estimate(a=20, b=10, c=10, d=20) → OR 4.0, p 0.011",
    "effect_estimate(a=20, b=10, c=10, d=20, measure=\"RD\")",
    "effect_estimate(data=[...], outcome=\"death\", exposure=\"smoker\")",
];

static EFFECT_RELATED: [&str; 2] = ["subgroup_analysis", "sensitivity_analysis"];

impl FunctionPlugin for EffectEstimateFn {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "effect_estimate",
            description: "Odds ratio or risk difference of a 2×2 table with 95% CI and Wald p-value",
            usage: "effect_estimate(a, b, c, d, [measure]) | effect_estimate(data, outcome, exposure, [measure])",
            args: &EFFECT_ARGS,
            returns: "Object",
            examples: &EFFECT_EXAMPLES,
            category: "stats/contingency",
            related: &EFFECT_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let EffectArgs { table, measure } = decode_args("effect_estimate", args)?;
        let table = table.tabulate()?;
        let estimate = estimate_effect(&table, measure, ctx.config());
        encode_result(&serde_json::json!({
            "table": table,
            "n": table.total(),
            "estimate": estimate,
        }))
    }
}
