//! Sensitivity analysis: fixed scenario battery, E-value and fragility index

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::contingency::{estimate_effect, odds_ratio, EffectEstimate, Measure, TwoByTwo};
use crate::helpers::fraction_of;

/// The six scenarios, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Primary,
    ExcludeTop,
    ExcludeBottom,
    CompleteCases,
    BestCase,
    WorstCase,
}

impl Scenario {
    pub const ALL: [Scenario; 6] = [
        Scenario::Primary,
        Scenario::ExcludeTop,
        Scenario::ExcludeBottom,
        Scenario::CompleteCases,
        Scenario::BestCase,
        Scenario::WorstCase,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Scenario::Primary => "Primary analysis (full dataset)",
            Scenario::ExcludeTop => "Exclude top 5% (outlier sensitivity)",
            Scenario::ExcludeBottom => "Exclude bottom 5%",
            Scenario::CompleteCases => "Complete cases only",
            Scenario::BestCase => "Best case scenario",
            Scenario::WorstCase => "Worst case scenario",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub label: &'static str,
    pub n: usize,
    pub table: TwoByTwo,
    pub estimate: EffectEstimate,
    pub significant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EValue {
    pub e_value: f64,
    /// max(1, E − 0.1); a coarse stand-in for the CI-based E-value
    pub e_value_ci: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FragilityResult {
    pub index: u32,
    /// The final table is no longer significant
    pub reached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobustnessAnalysis {
    pub measure: Measure,
    pub outcome: String,
    pub exposure: String,
    pub scenarios: Vec<ScenarioResult>,
    pub robust: bool,
    pub direction_consistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e_value: Option<EValue>,
    pub fragility: FragilityResult,
}

impl RobustnessAnalysis {
    pub fn primary(&self) -> Option<&ScenarioResult> {
        self.scenarios.first()
    }
}

type CodedRow = (Option<bool>, Option<bool>);

fn tabulate(rows: &[CodedRow]) -> TwoByTwo {
    let mut table = TwoByTwo::default();
    for (event, exposed) in rows {
        if let (Some(event), Some(exposed)) = (event, exposed) {
            table.record(*event, *exposed);
        }
    }
    table
}

/// Run the six scenarios against `outcome` × `exposure`.
///
/// Rows missing either value are dropped first. The trimming scenarios cut
/// by row position, not by value.
pub fn run_scenarios(
    dataset: &Dataset,
    outcome: &str,
    exposure: &str,
    measure: Measure,
    config: &EngineConfig,
) -> Result<Vec<ScenarioResult>, EpiError> {
    dataset.validate_roles(&[("outcome", outcome), ("exposure", exposure)])?;

    let valid: Vec<&Record> = dataset
        .records()
        .iter()
        .filter(|r| !Dataset::value(r, outcome).is_missing() && !Dataset::value(r, exposure).is_missing())
        .collect();
    let code = |r: &Record| -> CodedRow {
        (Dataset::value(r, outcome).as_binary(), Dataset::value(r, exposure).as_binary())
    };
    let coded: Vec<CodedRow> = valid.iter().map(|r| code(*r)).collect();
    let complete: Vec<CodedRow> = valid.iter().filter(|r| Dataset::is_complete(r)).map(|r| code(*r)).collect();

    let n = coded.len();
    let keep_top = fraction_of(n, 1.0 - config.trim_fraction).min(n);
    let skip_bottom = fraction_of(n, config.trim_fraction).min(n);
    let imputed = fraction_of(n, config.imputation_fraction);

    let with_imputed = |event: bool, exposed: bool| -> Vec<CodedRow> {
        let mut rows = coded.clone();
        rows.extend(std::iter::repeat((Some(event), Some(exposed))).take(imputed));
        rows
    };

    let results: Vec<ScenarioResult> = Scenario::ALL
        .iter()
        .map(|&scenario| {
            let (n_used, table) = match scenario {
                Scenario::Primary => (n, tabulate(&coded)),
                Scenario::ExcludeTop => (keep_top, tabulate(&coded[..keep_top])),
                Scenario::ExcludeBottom => (n - skip_bottom, tabulate(&coded[skip_bottom..])),
                Scenario::CompleteCases => (complete.len(), tabulate(&complete)),
                Scenario::BestCase => (n + imputed, tabulate(&with_imputed(false, true))),
                Scenario::WorstCase => (n + imputed, tabulate(&with_imputed(true, false))),
            };
            let estimate = estimate_effect(&table, measure, config);
            ScenarioResult {
                scenario,
                label: scenario.label(),
                n: n_used,
                table,
                significant: estimate.is_significant(config.significance_level),
                estimate,
            }
        })
        .collect();

    debug!(n, keep_top, skip_bottom, imputed, complete = complete.len(), "sensitivity scenarios");
    Ok(results)
}

/// Every scenario agrees with the primary on significance
pub fn is_robust(scenarios: &[ScenarioResult]) -> bool {
    match scenarios.first() {
        Some(primary) => scenarios.iter().all(|s| s.significant == primary.significant),
        None => false,
    }
}

/// Every estimate sits strictly on the same side of the null
pub fn is_direction_consistent(scenarios: &[ScenarioResult], measure: Measure) -> bool {
    if scenarios.is_empty() {
        return false;
    }
    let null = measure.null_value();
    scenarios.iter().all(|s| s.estimate.estimate > null) || scenarios.iter().all(|s| s.estimate.estimate < null)
}

/// E-value of an odds ratio treated as a risk ratio
pub fn e_value(or: f64) -> Result<EValue, NumericError> {
    if !(or.is_finite() && or > 0.0) {
        return Err(NumericError::Domain(format!("E-value needs a positive finite ratio, got {}", or)));
    }
    let rr = if or >= 1.0 { or } else { 1.0 / or };
    let e = rr + (rr * (rr - 1.0)).sqrt();
    Ok(EValue { e_value: e, e_value_ci: (e - 0.1).max(1.0) })
}

/// Wald p-value of the continuity-corrected odds ratio, no sparse-data fallback
fn corrected_or_p(table: &TwoByTwo, config: &EngineConfig) -> f64 {
    let [a, b, c, d] = table.corrected(config.continuity_correction);
    let lor = (a * d / (b * c)).ln();
    let se = (1.0 / a + 1.0 / b + 1.0 / c + 1.0 / d).sqrt();
    crate::distributions::z_to_two_sided_p(lor / se)
}

/// Number of (a+1, d−1) steps until the odds ratio stops being significant
pub fn fragility_index(table: &TwoByTwo, config: &EngineConfig) -> FragilityResult {
    let alpha = config.significance_level;
    if odds_ratio(table, config).p_value >= alpha {
        return FragilityResult { index: 0, reached: true };
    }

    let mut t = *table;
    let mut steps = 0;
    while steps < config.fragility_max_iterations {
        if t.d == 0 {
            debug!(steps, "fragility search exhausted the d cell");
            return FragilityResult { index: steps, reached: false };
        }
        t.a = t.a.saturating_add(1);
        t.d -= 1;
        steps += 1;
        if corrected_or_p(&t, config) >= alpha {
            return FragilityResult { index: steps, reached: true };
        }
    }
    FragilityResult { index: steps, reached: false }
}

/// Scenario battery plus verdicts, E-value (odds ratio only) and fragility index
pub fn analyze_robustness(
    dataset: &Dataset,
    outcome: &str,
    exposure: &str,
    measure: Measure,
    config: &EngineConfig,
) -> Result<RobustnessAnalysis, EpiError> {
    let scenarios = run_scenarios(dataset, outcome, exposure, measure, config)?;
    let primary = &scenarios[0];

    let e_value = match measure {
        Measure::OddsRatio => Some(e_value(primary.estimate.estimate)?),
        Measure::RiskDifference => None,
    };
    let fragility = fragility_index(&primary.table, config);

    Ok(RobustnessAnalysis {
        measure,
        outcome: outcome.to_string(),
        exposure: exposure.to_string(),
        robust: is_robust(&scenarios),
        direction_consistent: is_direction_consistent(&scenarios, measure),
        e_value,
        fragility,
        scenarios,
    })
}

// ============ Plugins ============

#[derive(Deserialize)]
struct SensitivityArgs {
    data: Dataset,
    outcome: String,
    exposure: String,
    #[serde(default)]
    measure: Measure,
}

pub struct SensitivityAnalysis;

static SENSITIVITY_ARGS: [ArgMeta; 4] = [
    ArgMeta::required("data", "Dataset", "Records with outcome and exposure columns"),
    ArgMeta::required("outcome", "String", "Binary outcome column"),
    ArgMeta::required("exposure", "String", "Binary exposure column"),
    ArgMeta::optional("measure", "String", "OR or RD", "OR"),
];

static SENSITIVITY_EXAMPLES: [&str; 1] =
    ["sensitivity_analysis(data=[...], outcome=\"death\", exposure=\"smoker\")"];

static SENSITIVITY_RELATED: [&str; 3] = ["e_value", "fragility_index", "methods_text"];

impl FunctionPlugin for SensitivityAnalysis {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "sensitivity_analysis",
            description: "Six-scenario robustness battery with verdicts, E-value and fragility index",
            usage: "sensitivity_analysis(data, outcome, exposure, [measure])",
            args: &SENSITIVITY_ARGS,
            returns: "Object",
            examples: &SENSITIVITY_EXAMPLES,
            category: "stats/robustness",
            related: &SENSITIVITY_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let a: SensitivityArgs = decode_args("sensitivity_analysis", args)?;
        let analysis = analyze_robustness(&a.data, &a.outcome, &a.exposure, a.measure, ctx.config())?;
        encode_result(&analysis)
    }
}

#[derive(Deserialize)]
struct EValueArgs {
    or: f64,
}

pub struct EValueFn;

static E_VALUE_ARGS: [ArgMeta; 1] = [ArgMeta::required("or", "Number", "Odds ratio (> 0)")];

static E_VALUE_EXAMPLES: [&str; 2] = ["e_value(2) → 3.41", "e_value(0.5) → 3.41"];

static E_VALUE_RELATED: [&str; 1] = ["sensitivity_analysis"];

impl FunctionPlugin for EValueFn {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "e_value",
            description: "Confounding strength needed to explain away an odds ratio",
            usage: "e_value(or)",
            args: &E_VALUE_ARGS,
            returns: "Object",
            examples: &E_VALUE_EXAMPLES,
            category: "stats/robustness",
            related: &E_VALUE_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let EValueArgs { or } = decode_args("e_value", args)?;
        let ev = e_value(or).map_err(|e| EpiError::from(e).in_operation("e_value"))?;
        encode_result(&ev)
    }
}

pub struct FragilityIndexFn;

static FRAGILITY_ARGS: [ArgMeta; 4] = [
    ArgMeta::required("a", "Integer", "Exposed with event"),
    ArgMeta::required("b", "Integer", "Exposed without event"),
    ArgMeta::required("c", "Integer", "Unexposed with event"),
    ArgMeta::required("d", "Integer", "Unexposed without event"),
];

static FRAGILITY_EXAMPLES: [&str; 1] = ["fragility_index(20, 10, 10, 20) → 10"];

static FRAGILITY_RELATED: [&str; 2] = ["sensitivity_analysis", "effect_estimate"];

impl FunctionPlugin for FragilityIndexFn {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "fragility_index",
            description: "Event reclassifications needed to lose significance of the odds ratio",
            usage: "fragility_index(a, b, c, d)",
            args: &FRAGILITY_ARGS,
            returns: "Object",
            examples: &FRAGILITY_EXAMPLES,
            category: "stats/robustness",
            related: &FRAGILITY_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let table: TwoByTwo = decode_args("fragility_index", args)?;
        let result = fragility_index(&table, ctx.config());
        Ok(json!({ "table": table, "index": result.index, "reached": result.reached }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    /// Rows in a, b, c, d order, with an optional extra column left empty on the first `gaps` rows
    fn ordered_dataset((a, b, c, d): (usize, usize, usize, usize), gaps: usize) -> Dataset {
        let mut rows: Vec<Vec<&str>> = Vec::new();
        for (count, event, exposed) in [(a, "1", "1"), (b, "0", "1"), (c, "1", "0"), (d, "0", "0")] {
            for _ in 0..count {
                rows.push(vec![event, exposed, "x"]);
            }
        }
        for row in rows.iter_mut().take(gaps) {
            row[2] = "NA";
        }
        Dataset::from_rows(&["death", "smoker", "note"], &rows)
    }

    #[test]
    fn test_six_scenarios_in_order() {
        let ds = ordered_dataset((20, 10, 10, 20), 2);
        let scenarios = run_scenarios(&ds, "death", "smoker", Measure::OddsRatio, &cfg()).unwrap();
        let kinds: Vec<Scenario> = scenarios.iter().map(|s| s.scenario).collect();
        assert_eq!(kinds, Scenario::ALL.to_vec());

        let ns: Vec<usize> = scenarios.iter().map(|s| s.n).collect();
        assert_eq!(ns, vec![60, 57, 57, 58, 63, 63]);
        assert_eq!(scenarios[0].label, "Primary analysis (full dataset)");
        assert!((scenarios[0].estimate.estimate - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_positional_trimming() {
        let ds = ordered_dataset((20, 10, 10, 20), 0);
        let s = run_scenarios(&ds, "death", "smoker", Measure::OddsRatio, &cfg()).unwrap();
        // last three rows are unexposed non-events, first three exposed events
        assert_eq!(s[1].table, TwoByTwo::new(20, 10, 10, 17));
        assert_eq!(s[2].table, TwoByTwo::new(17, 10, 10, 20));
        assert_eq!(s[4].table, TwoByTwo::new(20, 13, 10, 20));
        assert_eq!(s[5].table, TwoByTwo::new(20, 10, 13, 20));
    }

    #[test]
    fn test_rows_missing_roles_are_dropped() {
        let mut rows = vec![vec!["1", "1"]; 10];
        rows.push(vec!["NA", "1"]);
        rows.push(vec!["0", ""]);
        let ds = Dataset::from_rows(&["death", "smoker"], &rows);
        let s = run_scenarios(&ds, "death", "smoker", Measure::OddsRatio, &cfg()).unwrap();
        assert_eq!(s[0].n, 10);
    }

    #[test]
    fn test_strong_effect_is_robust() {
        let ds = ordered_dataset((40, 10, 10, 40), 0);
        let r = analyze_robustness(&ds, "death", "smoker", Measure::OddsRatio, &cfg()).unwrap();
        assert_eq!(r.scenarios.len(), 6);
        assert!(r.robust);
        assert!(r.direction_consistent);
        assert_eq!(r.fragility, FragilityResult { index: 36, reached: true });
        assert!((r.e_value.unwrap().e_value - e_value(16.0).unwrap().e_value).abs() < 1e-12);
    }

    #[test]
    fn test_verdicts_follow_primary_flag() {
        let config = cfg();
        let make = |table: TwoByTwo| {
            let estimate = odds_ratio(&table, &config);
            ScenarioResult {
                scenario: Scenario::Primary,
                label: Scenario::Primary.label(),
                n: table.total() as usize,
                table,
                significant: estimate.is_significant(0.05),
                estimate,
            }
        };
        let sig = make(TwoByTwo::new(20, 10, 10, 20));
        let null = make(TwoByTwo::new(10, 10, 10, 10));
        let protective = make(TwoByTwo::new(10, 20, 20, 10));

        assert!(is_robust(&[sig.clone(), sig.clone()]));
        assert!(!is_robust(&[sig.clone(), null.clone()]));
        assert!(is_robust(&[null.clone(), null.clone()]));
        assert!(!is_robust(&[]));

        assert!(is_direction_consistent(&[sig.clone(), sig.clone()], Measure::OddsRatio));
        assert!(!is_direction_consistent(&[sig.clone(), protective], Measure::OddsRatio));
        assert!(!is_direction_consistent(&[sig, null], Measure::OddsRatio));
    }

    #[test]
    fn test_e_value() {
        assert_eq!(e_value(1.0).unwrap(), EValue { e_value: 1.0, e_value_ci: 1.0 });
        let ev = e_value(2.0).unwrap();
        assert!((ev.e_value - 3.414213562373095).abs() < 1e-12);
        assert!((ev.e_value_ci - 3.314213562373095).abs() < 1e-12);
        assert_eq!(e_value(0.5).unwrap(), ev);
        assert!(e_value(0.0).is_err());
        assert!(e_value(f64::NAN).is_err());
    }

    #[test]
    fn test_fragility_reference_tables() {
        let cases = [
            ((20, 10, 10, 20), 10, true),
            ((30, 10, 10, 30), 24, true),
            ((5, 20, 20, 5), 5, false),
            ((10, 40, 25, 25), 25, false),
            ((12, 30, 30, 12), 12, false),
            ((2, 30, 30, 2), 2, false),
        ];
        for ((a, b, c, d), index, reached) in cases {
            let r = fragility_index(&TwoByTwo::new(a, b, c, d), &cfg());
            assert_eq!(r, FragilityResult { index, reached }, "table ({}, {}, {}, {})", a, b, c, d);
        }
    }

    #[test]
    fn test_fragility_non_significant_is_zero() {
        let r = fragility_index(&TwoByTwo::new(10, 10, 10, 10), &cfg());
        assert_eq!(r.index, 0);
    }

    #[test]
    fn test_fragility_at_the_significance_boundary() {
        // p ≈ 0.0495: one shifted event crosses alpha
        let table = TwoByTwo::new(20, 6, 8, 9);
        assert!(odds_ratio(&table, &cfg()).p_value < 0.05);
        let r = fragility_index(&table, &cfg());
        assert_eq!(r, FragilityResult { index: 1, reached: true });

        // p ≈ 0.060: already non-significant
        let r = fragility_index(&TwoByTwo::new(19, 6, 8, 9), &cfg());
        assert_eq!(r, FragilityResult { index: 0, reached: true });
    }

    #[test]
    fn test_fragility_saturates_huge_cells() {
        let r = fragility_index(&TwoByTwo::new(u64::MAX, 1, 1, 3), &cfg());
        assert_eq!(r, FragilityResult { index: 3, reached: false });
    }

    #[test]
    fn test_fragility_respects_cap() {
        let config = EngineConfig { fragility_max_iterations: 3, ..EngineConfig::default() };
        let r = fragility_index(&TwoByTwo::new(20, 10, 10, 20), &config);
        assert_eq!(r, FragilityResult { index: 3, reached: false });
    }

    #[test]
    fn test_risk_difference_has_no_e_value() {
        let ds = ordered_dataset((20, 10, 10, 20), 0);
        let r = analyze_robustness(&ds, "death", "smoker", Measure::RiskDifference, &cfg()).unwrap();
        assert!(r.e_value.is_none());
        assert!(r.direction_consistent);
    }

    #[test]
    fn test_plugins() {
        let ctx = AnalysisContext::new();
        let out = FragilityIndexFn.call(&json!({ "a": 20, "b": 10, "c": 10, "d": 20 }), &ctx).unwrap();
        assert_eq!(out["index"], 10);
        assert_eq!(out["reached"], true);

        let err = EValueFn.call(&json!({ "or": -1.0 }), &ctx).unwrap_err();
        assert_eq!(err.code, codes::DOMAIN_ERROR);

        let ds = ordered_dataset((20, 10, 10, 20), 0);
        let out = SensitivityAnalysis
            .call(&json!({ "data": ds, "outcome": "death", "exposure": "smoker" }), &ctx)
            .unwrap();
        assert_eq!(out["scenarios"].as_array().unwrap().len(), 6);
        assert_eq!(out["scenarios"][3]["scenario"], "complete_cases");
    }
}
