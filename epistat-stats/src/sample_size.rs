//! Closed-form sample-size formulas for four study designs

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Fixed quantile → z lookup
///
/// Not an inverse-normal solver: quantiles outside the table fall back to
/// 1.96 and the result is flagged.
#[derive(Debug, Clone, PartialEq)]
pub struct ZTable {
    entries: Vec<(f64, f64)>,
    fallback: f64,
}

static STANDARD_Z: [(f64, f64); 6] = [
    (0.80, 0.842),
    (0.85, 1.036),
    (0.90, 1.282),
    (0.95, 1.645),
    (0.975, 1.96),
    (0.995, 2.576),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZLookup {
    pub quantile: f64,
    pub z: f64,
    pub fallback: bool,
}

impl ZTable {
    pub fn standard() -> Self {
        Self {
            entries: STANDARD_Z.to_vec(),
            fallback: 1.96,
        }
    }

    pub fn lookup(&self, quantile: f64) -> ZLookup {
        match self.entries.iter().find(|(q, _)| (q - quantile).abs() < 1e-9) {
            Some(&(_, z)) => ZLookup { quantile, z, fallback: false },
            None => {
                warn!(quantile, fallback = self.fallback, "quantile not in z table");
                ZLookup { quantile, z: self.fallback, fallback: true }
            }
        }
    }
}

impl Default for ZTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Study design and its effect-size inputs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "design", rename_all = "snake_case")]
pub enum StudyDesign {
    TwoProportions { p1: f64, p2: f64 },
    TwoMeans { sd: f64, delta: f64 },
    OneProportion { p0: f64, p1: f64 },
    Survival { hr: f64, event_rate: f64 },
}

impl StudyDesign {
    pub fn id(&self) -> &'static str {
        match self {
            StudyDesign::TwoProportions { .. } => "two_proportions",
            StudyDesign::TwoMeans { .. } => "two_means",
            StudyDesign::OneProportion { .. } => "one_proportion",
            StudyDesign::Survival { .. } => "survival",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Feasibility {
    Feasible,
    Challenging,
    #[serde(rename = "Large study")]
    LargeStudy,
}

impl Feasibility {
    pub fn for_total(n: u64) -> Self {
        if n < 500 {
            Feasibility::Feasible
        } else if n < 2000 {
            Feasibility::Challenging
        } else {
            Feasibility::LargeStudy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttritionAdjusted {
    pub rate: f64,
    pub n: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSizeResult {
    pub design: &'static str,
    pub alpha: f64,
    pub power: f64,
    pub z_alpha: ZLookup,
    pub z_beta: ZLookup,
    pub total_n: u64,
    pub per_group: u64,
    pub attrition: Vec<AttritionAdjusted>,
    pub feasibility: Feasibility,
    pub explanation: String,
}

fn check_probability(name: &str, p: f64) -> Result<(), NumericError> {
    if p > 0.0 && p < 1.0 {
        Ok(())
    } else {
        Err(NumericError::Domain(format!("{} must lie strictly between 0 and 1, got {}", name, p)))
    }
}

/// Largest integer an f64 holds exactly (2^53)
const MAX_COUNT: f64 = 9_007_199_254_740_992.0;

fn ceil_count(x: f64) -> Result<u64, NumericError> {
    if !x.is_finite() || x < 0.0 {
        return Err(NumericError::Domain(format!("required size is not a finite count ({})", x)));
    }
    let n = x.ceil();
    if n > MAX_COUNT {
        return Err(NumericError::Domain(format!(
            "required size {:e} is beyond any feasible study; the effect is too close to null",
            n
        )));
    }
    Ok(n as u64)
}

fn doubled(n: u64) -> Result<u64, NumericError> {
    n.checked_mul(2)
        .ok_or_else(|| NumericError::Domain(format!("required size 2×{} overflows", n)))
}

/// Per-group n for comparing two proportions
pub fn two_proportions(p1: f64, p2: f64, z_alpha: f64, z_beta: f64) -> Result<u64, NumericError> {
    check_probability("p1", p1)?;
    check_probability("p2", p2)?;
    if p1 == p2 {
        return Err(NumericError::DivisionByZero("p1 equals p2".to_string()));
    }
    let pbar = (p1 + p2) / 2.0;
    let numerator = z_alpha * (2.0 * pbar * (1.0 - pbar)).sqrt() + z_beta * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    ceil_count(numerator.powi(2) / (p1 - p2).powi(2))
}

/// Per-group n for comparing two means: 2·((zα+zβ)·sd/δ)²
pub fn two_means(sd: f64, delta: f64, z_alpha: f64, z_beta: f64) -> Result<u64, NumericError> {
    if !(sd > 0.0 && sd.is_finite()) {
        return Err(NumericError::Domain(format!("sd must be positive, got {}", sd)));
    }
    if delta == 0.0 {
        return Err(NumericError::DivisionByZero("delta is zero".to_string()));
    }
    ceil_count(2.0 * ((z_alpha + z_beta) * sd / delta).powi(2))
}

/// Total n for testing one proportion against a fixed value
pub fn one_proportion(p0: f64, p1: f64, z_alpha: f64, z_beta: f64) -> Result<u64, NumericError> {
    check_probability("p0", p0)?;
    check_probability("p1", p1)?;
    if p0 == p1 {
        return Err(NumericError::DivisionByZero("p1 equals p0".to_string()));
    }
    let numerator = z_alpha * (p0 * (1.0 - p0)).sqrt() + z_beta * (p1 * (1.0 - p1)).sqrt();
    ceil_count(numerator.powi(2) / (p1 - p0).powi(2))
}

/// Total n for a time-to-event design: 2·⌈events / event rate⌉
pub fn survival(hr: f64, event_rate: f64, z_alpha: f64, z_beta: f64) -> Result<u64, NumericError> {
    if !(hr > 0.0 && hr.is_finite()) {
        return Err(NumericError::Domain(format!("hazard ratio must be positive, got {}", hr)));
    }
    if hr == 1.0 {
        return Err(NumericError::DivisionByZero("hazard ratio of 1 has ln(hr) = 0".to_string()));
    }
    if !(event_rate > 0.0 && event_rate <= 1.0) {
        return Err(NumericError::Domain(format!("event rate must lie in (0, 1], got {}", event_rate)));
    }
    let events = (z_alpha + z_beta).powi(2) / hr.ln().powi(2);
    doubled(ceil_count(events / event_rate)?)
}

fn percent(p: f64) -> String {
    format!("{:.0}%", p * 100.0)
}

/// Required N for a design, with attrition inflation and a plain-language summary
pub fn calculate(
    design: StudyDesign,
    alpha: f64,
    power: f64,
    z_table: &ZTable,
    config: &EngineConfig,
) -> Result<SampleSizeResult, EpiError> {
    check_probability("alpha", alpha)?;
    check_probability("power", power)?;
    let z_alpha = z_table.lookup(1.0 - alpha / 2.0);
    let z_beta = z_table.lookup(power);
    let (za, zb) = (z_alpha.z, z_beta.z);
    let power_text = percent(power);

    let (total_n, per_group, explanation) = match design {
        StudyDesign::TwoProportions { p1, p2 } => {
            let per_group = two_proportions(p1, p2, za, zb)?;
            let text = format!(
                "To detect a difference between {} and {} with {} power at α={}, you need {} participants per group.",
                percent(p1), percent(p2), power_text, alpha, per_group
            );
            (doubled(per_group)?, per_group, text)
        }
        StudyDesign::TwoMeans { sd, delta } => {
            let per_group = two_means(sd, delta, za, zb)?;
            let text = format!(
                "To detect a mean difference of {} (SD={}) with {} power at α={}, you need {} participants per group.",
                delta, sd, power_text, alpha, per_group
            );
            (doubled(per_group)?, per_group, text)
        }
        StudyDesign::OneProportion { p0, p1 } => {
            let n = one_proportion(p0, p1, za, zb)?;
            let text = format!(
                "To detect a change from {} to {} with {} power at α={}, you need {} participants.",
                percent(p0), percent(p1), power_text, alpha, n
            );
            (n, n, text)
        }
        StudyDesign::Survival { hr, event_rate } => {
            let n = survival(hr, event_rate, za, zb)?;
            let per_group = n.div_ceil(2);
            let text = format!(
                "To detect a hazard ratio of {} with {} power at α={} and {} event rate, you need {} participants per group.",
                hr, power_text, alpha, percent(event_rate), per_group
            );
            (n, per_group, text)
        }
    };

    let attrition = config
        .attrition_rates
        .iter()
        .map(|&rate| Ok(AttritionAdjusted { rate, n: ceil_count(total_n as f64 * (1.0 + rate))? }))
        .collect::<Result<Vec<_>, NumericError>>()?;

    debug!(design = design.id(), total_n, per_group, "sample size");
    Ok(SampleSizeResult {
        design: design.id(),
        alpha,
        power,
        z_alpha,
        z_beta,
        total_n,
        per_group,
        attrition,
        feasibility: Feasibility::for_total(total_n),
        explanation,
    })
}

// ============ Plugin ============

fn default_alpha() -> f64 {
    0.05
}

fn default_power() -> f64 {
    0.80
}

#[derive(Deserialize)]
struct SampleSizeArgs {
    #[serde(flatten)]
    design: StudyDesign,
    #[serde(default = "default_alpha")]
    alpha: f64,
    #[serde(default = "default_power")]
    power: f64,
}

pub struct SampleSize;

static SAMPLE_SIZE_ARGS: [ArgMeta; 10] = [
    ArgMeta::required("design", "String", "two_proportions | two_means | one_proportion | survival"),
    ArgMeta::optional("p1", "Number", "Proportion in group 1 (two_proportions) or alternative (one_proportion)", "-"),
    ArgMeta::optional("p2", "Number", "Proportion in group 2 (two_proportions)", "-"),
    ArgMeta::optional("sd", "Number", "Common standard deviation (two_means)", "-"),
    ArgMeta::optional("delta", "Number", "Mean difference to detect (two_means)", "-"),
    ArgMeta::optional("p0", "Number", "Reference proportion (one_proportion)", "-"),
    ArgMeta::optional("hr", "Number", "Target hazard ratio (survival)", "-"),
    ArgMeta::optional("event_rate", "Number", "Expected proportion with the event (survival)", "-"),
    ArgMeta::optional("alpha", "Number", "Two-sided significance level: 0.01, 0.05 or 0.10", "0.05"),
    ArgMeta::optional("power", "Number", "Power: 0.80, 0.85, 0.90 or 0.95", "0.80"),
];

static SAMPLE_SIZE_EXAMPLES: [&str; 2] = [
    "sample_size(design=\"two_proportions\", p1=0.3, p2=0.5) → 94 per group",
    "sample_size(design=\"survival\", hr=0.7, event_rate=0.3) → 412 total",
];

static SAMPLE_SIZE_RELATED: [&str; 1] = ["effect_estimate"];

impl FunctionPlugin for SampleSize {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "sample_size",
            description: "Required sample size for two proportions, two means, one proportion or a survival design",
            usage: "sample_size(design, ..., [alpha], [power])",
            args: &SAMPLE_SIZE_ARGS,
            returns: "Object",
            examples: &SAMPLE_SIZE_EXAMPLES,
            category: "stats/sample_size",
            related: &SAMPLE_SIZE_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let a: SampleSizeArgs = decode_args("sample_size", args)?;
        let result = calculate(a.design, a.alpha, a.power, &ZTable::standard(), ctx.config())
            .map_err(|e| e.in_operation("sample_size"))?;
        encode_result(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(design: StudyDesign) -> SampleSizeResult {
        calculate(design, 0.05, 0.80, &ZTable::standard(), &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_z_table() {
        let t = ZTable::standard();
        assert_eq!(t.lookup(0.975).z, 1.96);
        assert_eq!(t.lookup(1.0 - 0.01 / 2.0).z, 2.576);
        assert_eq!(t.lookup(1.0 - 0.10 / 2.0).z, 1.645);
        assert_eq!(t.lookup(0.80).z, 0.842);
        let missing = t.lookup(0.70);
        assert!(missing.fallback);
        assert_eq!(missing.z, 1.96);
    }

    #[test]
    fn test_two_proportions_reference() {
        let r = run(StudyDesign::TwoProportions { p1: 0.30, p2: 0.50 });
        assert_eq!(r.per_group, 94);
        assert_eq!(r.total_n, 188);
        assert_eq!(
            r.attrition,
            vec![AttritionAdjusted { rate: 0.15, n: 217 }, AttritionAdjusted { rate: 0.20, n: 226 }]
        );
        assert_eq!(r.feasibility, Feasibility::Feasible);
        assert_eq!(
            r.explanation,
            "To detect a difference between 30% and 50% with 80% power at α=0.05, you need 94 participants per group."
        );
    }

    #[test]
    fn test_two_proportions_symmetric() {
        assert_eq!(two_proportions(0.3, 0.5, 1.96, 0.842), two_proportions(0.5, 0.3, 1.96, 0.842));
    }

    #[test]
    fn test_two_means_reference() {
        let r = run(StudyDesign::TwoMeans { sd: 10.0, delta: 5.0 });
        assert_eq!(r.per_group, 63);
        assert_eq!(r.total_n, 126);
        assert!(r.explanation.starts_with("To detect a mean difference of 5 (SD=10)"));
    }

    #[test]
    fn test_one_proportion_reference() {
        let r = run(StudyDesign::OneProportion { p0: 0.30, p1: 0.50 });
        assert_eq!(r.total_n, 44);
        assert_eq!(r.per_group, 44);
    }

    #[test]
    fn test_survival_reference() {
        let r = run(StudyDesign::Survival { hr: 0.70, event_rate: 0.30 });
        assert_eq!(r.total_n, 412);
        assert_eq!(r.per_group, 206);
        assert!(r.explanation.contains("hazard ratio of 0.7"));
        assert!(r.explanation.contains("30% event rate"));
    }

    #[test]
    fn test_degenerate_designs_raise() {
        assert!(matches!(survival(1.0, 0.3, 1.96, 0.842), Err(NumericError::DivisionByZero(_))));
        assert!(matches!(two_proportions(0.4, 0.4, 1.96, 0.842), Err(NumericError::DivisionByZero(_))));
        assert!(matches!(two_means(10.0, 0.0, 1.96, 0.842), Err(NumericError::DivisionByZero(_))));
        assert!(matches!(one_proportion(0.3, 0.3, 1.96, 0.842), Err(NumericError::DivisionByZero(_))));

        let err = calculate(
            StudyDesign::Survival { hr: 1.0, event_rate: 0.3 },
            0.05,
            0.8,
            &ZTable::standard(),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.code, codes::NUMERIC_DEGENERACY);
    }

    #[test]
    fn test_near_null_effects_do_not_overflow() {
        assert!(matches!(survival(1.0000000001, 0.3, 1.96, 0.842), Err(NumericError::Domain(_))));
        assert!(matches!(two_proportions(0.5, 0.5 + 1e-12, 1.96, 0.842), Err(NumericError::Domain(_))));
        assert!(matches!(two_means(1.0, 1e-12, 1.96, 0.842), Err(NumericError::Domain(_))));
        assert!(matches!(doubled(u64::MAX), Err(NumericError::Domain(_))));
        assert_eq!(ceil_count(MAX_COUNT), Ok(9_007_199_254_740_992));

        for design in [
            StudyDesign::Survival { hr: 1.0000000001, event_rate: 0.3 },
            StudyDesign::TwoProportions { p1: 0.5, p2: 0.5 + 1e-12 },
        ] {
            let err = calculate(design, 0.05, 0.8, &ZTable::standard(), &EngineConfig::default()).unwrap_err();
            assert_eq!(err.code, codes::DOMAIN_ERROR);
        }
    }

    #[test]
    fn test_domain_checks() {
        assert!(matches!(two_proportions(0.0, 0.5, 1.96, 0.842), Err(NumericError::Domain(_))));
        assert!(matches!(survival(0.7, 0.0, 1.96, 0.842), Err(NumericError::Domain(_))));
        assert!(matches!(two_means(-1.0, 2.0, 1.96, 0.842), Err(NumericError::Domain(_))));
    }

    #[test]
    fn test_unlisted_power_falls_back() {
        let r = calculate(
            StudyDesign::TwoProportions { p1: 0.3, p2: 0.5 },
            0.05,
            0.75,
            &ZTable::standard(),
            &EngineConfig::default(),
        )
        .unwrap();
        assert!(r.z_beta.fallback);
        assert_eq!(r.z_beta.z, 1.96);
    }

    #[test]
    fn test_feasibility_bands() {
        assert_eq!(Feasibility::for_total(499), Feasibility::Feasible);
        assert_eq!(Feasibility::for_total(500), Feasibility::Challenging);
        assert_eq!(Feasibility::for_total(2000), Feasibility::LargeStudy);
    }

    #[test]
    fn test_plugin() {
        let out = SampleSize
            .call(&json!({ "design": "two_proportions", "p1": 0.3, "p2": 0.5 }), &AnalysisContext::new())
            .unwrap();
        assert_eq!(out["per_group"], 94);
        assert_eq!(out["feasibility"], "Feasible");

        let err = SampleSize
            .call(&json!({ "design": "survival", "hr": 1.0, "event_rate": 0.3 }), &AnalysisContext::new())
            .unwrap_err();
        assert_eq!(err.code, codes::NUMERIC_DEGENERACY);
    }
}
