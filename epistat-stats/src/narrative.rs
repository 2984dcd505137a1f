//! Methods paragraphs for reports

use epistat_plugin::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::contingency::Measure;
use crate::robustness::{analyze_robustness, RobustnessAnalysis};
use crate::subgroup::{analyze_subgroups, SubgroupAnalysis};

/// Round to `places` decimals, normalising negative zero
fn rounded(x: f64, places: i32) -> f64 {
    let f = 10f64.powi(places);
    (x * f).round() / f + 0.0
}

/// `< 0.001` or `= 0.12`, trailing zeros dropped
fn p_clause(p: f64) -> String {
    if p < 0.001 {
        "< 0.001".to_string()
    } else {
        format!("= {}", rounded(p, 3))
    }
}

/// `< 0.001` or `= 0.120`, always three places
fn p_clause_fixed(p: f64) -> String {
    if p < 0.001 {
        "< 0.001".to_string()
    } else {
        format!("= {:.3}", p)
    }
}

/// Subgroup methods paragraph with the interaction test and its verdict.
///
/// Empty when the analysis produced no subgroups.
pub fn subgroup_methods_text(analysis: &SubgroupAnalysis, alpha: f64) -> String {
    if analysis.subgroups.is_empty() {
        return String::new();
    }
    let (exposure, outcome, subgroup) = (&analysis.exposure, &analysis.outcome, &analysis.subgroup);
    let h = &analysis.heterogeneity;

    let mut text = format!(
        "Subgroup analyses were conducted to assess whether the effect of {} on {} differed by {}. ",
        exposure, outcome, subgroup
    );
    text.push_str(match analysis.measure {
        Measure::OddsRatio => {
            "Odds ratios (OR) with 95% confidence intervals were calculated for each subgroup using logistic regression."
        }
        Measure::RiskDifference => {
            "Risk differences (RD) with 95% confidence intervals were calculated for each subgroup."
        }
    });
    text.push_str(&format!(
        " A test for interaction was performed to assess heterogeneity across subgroups (Q = {}, df = {}, p {}, I² = {}%). ",
        rounded(h.q, 2),
        h.df,
        p_clause(h.p_value),
        rounded(h.i_squared, 1)
    ));
    if h.is_significant(alpha) {
        text.push_str(&format!(
            "There was statistically significant heterogeneity across subgroups (p {}), suggesting that the effect of {} on {} varied by {}.",
            p_clause(h.p_value),
            exposure,
            outcome,
            subgroup
        ));
    } else {
        text.push_str(&format!(
            "There was no statistically significant heterogeneity across subgroups, suggesting a consistent effect of {} on {} across all {} categories.",
            exposure, outcome, subgroup
        ));
    }
    text
}

/// Sensitivity methods paragraph with robustness verdict, E-value and fragility index
pub fn sensitivity_methods_text(analysis: &RobustnessAnalysis) -> String {
    let Some(primary) = analysis.primary() else {
        return String::new();
    };

    let mut text = format!(
        "Several sensitivity analyses were conducted to assess the robustness of the primary findings. \
         The primary analysis (n = {}) yielded an {} of {:.2} (p {}). \
         Sensitivity analyses included exclusion of outliers (top and bottom 5%), complete case analysis, \
         and best/worst case scenarios for missing data. ",
        primary.n,
        analysis.measure.label(),
        primary.estimate.estimate,
        p_clause_fixed(primary.estimate.p_value)
    );
    text.push_str(if analysis.robust {
        "Results were consistent across all sensitivity analyses, supporting the robustness of the primary findings."
    } else {
        "Some variability was observed across sensitivity analyses, suggesting that results should be interpreted with caution."
    });
    if let Some(e) = &analysis.e_value {
        let e_value = rounded(e.e_value, 2);
        text.push_str(&format!(
            " The E-value for the primary estimate was {}, indicating that unmeasured confounding would need to \
             produce an association of at least {}-fold with both the exposure and outcome to fully explain the \
             observed association.",
            e_value, e_value
        ));
    }
    text.push_str(&format!(
        " The fragility index was {}, meaning that {} event(s) would need to change to alter the statistical \
         significance of the primary result.",
        analysis.fragility.index, analysis.fragility.index
    ));
    text
}

// ============ Plugin ============

#[derive(Deserialize)]
#[serde(tag = "analysis", rename_all = "snake_case")]
enum MethodsArgs {
    Subgroup {
        data: Dataset,
        outcome: String,
        exposure: String,
        subgroup: String,
        #[serde(default)]
        measure: Measure,
    },
    Sensitivity {
        data: Dataset,
        outcome: String,
        exposure: String,
        #[serde(default)]
        measure: Measure,
    },
}

pub struct MethodsText;

static METHODS_ARGS: [ArgMeta; 6] = [
    ArgMeta::required("analysis", "String", "subgroup or sensitivity"),
    ArgMeta::required("data", "Dataset", "Records with outcome and exposure columns"),
    ArgMeta::required("outcome", "String", "Binary outcome column"),
    ArgMeta::required("exposure", "String", "Binary exposure column"),
    ArgMeta::optional("subgroup", "String", "Grouping column (subgroup analysis only)", "none"),
    ArgMeta::optional("measure", "String", "OR or RD", "OR"),
];

static METHODS_EXAMPLES: [&str; 2] = [
    "methods_text(analysis=\"subgroup\", data=[...], outcome=\"death\", exposure=\"smoker\", subgroup=\"sex\")",
    "methods_text(analysis=\"sensitivity\", data=[...], outcome=\"death\", exposure=\"smoker\")",
];

static METHODS_RELATED: [&str; 2] = ["subgroup_analysis", "sensitivity_analysis"];

impl FunctionPlugin for MethodsText {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "methods_text",
            description: "Methods paragraph describing a subgroup or sensitivity analysis",
            usage: "methods_text(analysis, data, outcome, exposure, [subgroup], [measure])",
            args: &METHODS_ARGS,
            returns: "Object",
            examples: &METHODS_EXAMPLES,
            category: "stats/report",
            related: &METHODS_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let config = ctx.config();
        let text = match decode_args("methods_text", args)? {
            MethodsArgs::Subgroup { data, outcome, exposure, subgroup, measure } => {
                let analysis = analyze_subgroups(&data, &outcome, &exposure, &subgroup, measure, config)?;
                subgroup_methods_text(&analysis, config.significance_level)
            }
            MethodsArgs::Sensitivity { data, outcome, exposure, measure } => {
                let analysis = analyze_robustness(&data, &outcome, &exposure, measure, config)?;
                sensitivity_methods_text(&analysis)
            }
        };
        Ok(json!({ "text": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(tables: &[(&str, (usize, usize, usize, usize))]) -> Dataset {
        let mut rows: Vec<Vec<&str>> = Vec::new();
        for (group, (a, b, c, d)) in tables {
            for (count, event, exposed) in [(*a, "1", "1"), (*b, "0", "1"), (*c, "1", "0"), (*d, "0", "0")] {
                for _ in 0..count {
                    rows.push(vec![*group, event, exposed]);
                }
            }
        }
        Dataset::from_rows(&["sex", "death", "smoker"], &rows)
    }

    fn subgroup_text(ds: &Dataset) -> String {
        let cfg = EngineConfig::default();
        let analysis = analyze_subgroups(ds, "death", "smoker", "sex", Measure::OddsRatio, &cfg).unwrap();
        subgroup_methods_text(&analysis, cfg.significance_level)
    }

    #[test]
    fn test_rounding_helpers() {
        assert_eq!(rounded(-1e-20, 2).to_string(), "0");
        assert_eq!(rounded(12.3456, 2).to_string(), "12.35");
        assert_eq!(p_clause(0.0004), "< 0.001");
        assert_eq!(p_clause(0.01137), "= 0.011");
        assert_eq!(p_clause(0.05), "= 0.05");
        assert_eq!(p_clause_fixed(0.05), "= 0.050");
        assert_eq!(p_clause_fixed(0.0004), "< 0.001");
        assert_eq!(p_clause_fixed(1.0), "= 1.000");
    }

    #[test]
    fn test_consistent_subgroups() {
        let text = subgroup_text(&rows(&[("F", (20, 10, 10, 20)), ("M", (20, 10, 10, 20))]));
        assert!(text.starts_with(
            "Subgroup analyses were conducted to assess whether the effect of smoker on death differed by sex. "
        ));
        assert!(text.contains("using logistic regression."));
        assert!(text.contains("(Q = 0, df = 1, p = 1, I² = 0%)"));
        assert!(text.ends_with("suggesting a consistent effect of smoker on death across all sex categories."));
    }

    #[test]
    fn test_heterogeneous_subgroups() {
        let text = subgroup_text(&rows(&[("F", (20, 10, 10, 20)), ("M", (10, 20, 20, 10))]));
        assert!(text.contains("p < 0.001"));
        assert!(text.contains("There was statistically significant heterogeneity across subgroups (p < 0.001)"));
        assert!(text.ends_with("varied by sex."));
    }

    #[test]
    fn test_sensitivity_text() {
        let ds = rows(&[("F", (20, 10, 10, 20))]);
        let analysis =
            analyze_robustness(&ds, "death", "smoker", Measure::OddsRatio, &EngineConfig::default()).unwrap();
        let text = sensitivity_methods_text(&analysis);
        assert!(text.contains("The primary analysis (n = 60) yielded an OR of 4.00 (p = 0.011)."));
        assert!(text.contains("The E-value for the primary estimate was 7.46,"));
        assert!(text.contains("at least 7.46-fold"));
        assert!(text.ends_with(
            "The fragility index was 10, meaning that 10 event(s) would need to change to alter the statistical significance of the primary result."
        ));
    }

    #[test]
    fn test_sensitivity_text_at_the_null() {
        let ds = rows(&[("F", (10, 10, 10, 10))]);
        let analysis =
            analyze_robustness(&ds, "death", "smoker", Measure::OddsRatio, &EngineConfig::default()).unwrap();
        let text = sensitivity_methods_text(&analysis);
        assert!(text.contains("yielded an OR of 1.00 (p = 1.000)."));
        assert!(text.contains("The E-value for the primary estimate was 1,"));
        assert!(text.contains("at least 1-fold"));
        assert!(text.contains("The fragility index was 0,"));
    }

    #[test]
    fn test_risk_difference_omits_e_value() {
        let ds = rows(&[("F", (20, 10, 10, 20))]);
        let analysis =
            analyze_robustness(&ds, "death", "smoker", Measure::RiskDifference, &EngineConfig::default()).unwrap();
        let text = sensitivity_methods_text(&analysis);
        assert!(text.contains("yielded an RD of 0.33"));
        assert!(!text.contains("E-value"));
    }

    #[test]
    fn test_plugin_dispatch() {
        let ds = rows(&[("F", (20, 10, 10, 20)), ("M", (20, 10, 10, 20))]);
        let ctx = AnalysisContext::new();
        let out = MethodsText
            .call(
                &json!({ "analysis": "subgroup", "data": ds, "outcome": "death", "exposure": "smoker", "subgroup": "sex" }),
                &ctx,
            )
            .unwrap();
        assert!(out["text"].as_str().unwrap().starts_with("Subgroup analyses"));

        let err = MethodsText.call(&json!({ "analysis": "meta", "data": [] }), &ctx).unwrap_err();
        assert_eq!(err.code, codes::ARG_TYPE);
    }
}
