//! Baseline characteristics table ("Table 1")

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::helpers::{mean, median, numeric_values, population_sd, quartiles};
use crate::hypothesis::{compare_categorical, compare_continuous, ComparisonMethod, ContingencyTable};

/// Share of parseable values above which a column is continuous
const NUMERIC_SHARE: f64 = 0.85;

/// How continuous variables are summarised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Summary {
    #[default]
    MeanSd,
    MedianIqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Continuous,
    Categorical,
    /// One level under a categorical header row
    Level,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineRow {
    pub variable: String,
    pub kind: RowKind,
    pub overall: String,
    pub groups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_value: Option<f64>,
    pub p_text: String,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaselineTable {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stratify: Option<String>,
    pub summary: Summary,
    pub n_overall: usize,
    pub groups: Vec<String>,
    pub n_groups: Vec<usize>,
    pub rows: Vec<BaselineRow>,
}

/// `<0.001`, three decimals below 0.01, two otherwise
pub fn format_p(p: f64) -> String {
    if p < 0.001 {
        "<0.001".to_string()
    } else if p < 0.01 {
        format!("{:.3}", p)
    } else {
        format!("{:.2}", p)
    }
}

fn summarise(values: &[f64], summary: Summary) -> String {
    let stats = match summary {
        Summary::MeanSd => mean(values).zip(population_sd(values)).map(|(m, s)| format!("{:.1} ± {:.1}", m, s)),
        Summary::MedianIqr => median(values)
            .zip(quartiles(values))
            .map(|(m, (q1, q3))| format!("{:.1} ({:.1}–{:.1})", m, q1, q3)),
    };
    stats.unwrap_or_else(|| "—".to_string())
}

fn is_numeric(values: &[&RawValue]) -> bool {
    if values.is_empty() {
        return false;
    }
    let parsed = values.iter().filter(|v| v.as_f64().is_some()).count();
    parsed as f64 / values.len() as f64 > NUMERIC_SHARE
}

fn n_pct(n: usize, of: usize) -> String {
    let pct = if of > 0 { (n as f64 / of as f64 * 100.0).round() } else { 0.0 };
    format!("{} ({}%)", n, pct as u64)
}

/// Build the table for every column except `stratify`.
///
/// Columns whose non-missing values are more than 85% numeric are
/// continuous; the rest are categorical with one row per level.
pub fn baseline_table(dataset: &Dataset, stratify: Option<&str>, summary: Summary) -> Result<BaselineTable, EpiError> {
    if let Some(column) = stratify {
        dataset.validate_roles(&[("stratify", column)])?;
    }

    let groups = stratify.map(|s| dataset.levels(s)).unwrap_or_default();
    let strata: Vec<Dataset> = match stratify {
        Some(s) => groups.iter().map(|g| dataset.subset(s, g)).collect(),
        None => Vec::new(),
    };

    let mut rows = Vec::new();
    for column in dataset.columns() {
        if Some(column.as_str()) == stratify {
            continue;
        }
        let cells = dataset.column(&column);
        let missing = cells.iter().filter(|v| v.is_missing()).count();
        let present: Vec<&RawValue> = cells.into_iter().filter(|v| !v.is_missing()).collect();

        if is_numeric(&present) {
            let per_group: Vec<Vec<f64>> = strata.iter().map(|s| numeric_values(s, &column)).collect();
            let p_value = match per_group.as_slice() {
                [a, b] if a.len() > 1 && b.len() > 1 => {
                    Some(compare_continuous(a, b, ComparisonMethod::NormalApprox).p_value)
                }
                _ => None,
            };
            rows.push(BaselineRow {
                overall: summarise(&numeric_values(dataset, &column), summary),
                groups: per_group.iter().map(|v| summarise(v, summary)).collect(),
                p_text: p_value.map(format_p).unwrap_or_default(),
                p_value,
                missing,
                kind: RowKind::Continuous,
                variable: column,
            });
        } else {
            rows.extend(categorical_rows(&column, &present, &strata, &groups, missing));
        }
    }

    debug!(variables = rows.len(), groups = groups.len(), "baseline table");
    Ok(BaselineTable {
        stratify: stratify.map(String::from),
        summary,
        n_overall: dataset.len(),
        n_groups: strata.iter().map(Dataset::len).collect(),
        groups,
        rows,
    })
}

fn categorical_rows(
    column: &str,
    present: &[&RawValue],
    strata: &[Dataset],
    groups: &[String],
    missing: usize,
) -> Vec<BaselineRow> {
    let levels: Vec<String> = {
        let set: std::collections::BTreeSet<String> = present.iter().filter_map(|v| v.label()).collect();
        set.into_iter().collect()
    };
    // Per stratum: non-missing labels of this column
    let stratum_labels: Vec<Vec<String>> = strata
        .iter()
        .map(|s| s.column(column).into_iter().filter_map(RawValue::label).collect())
        .collect();

    let counts: Vec<Vec<u64>> = levels
        .iter()
        .map(|level| {
            stratum_labels
                .iter()
                .map(|labels| labels.iter().filter(|l| *l == level).count() as u64)
                .collect()
        })
        .collect();

    let p_value = if groups.len() >= 2 && levels.len() >= 2 {
        let table = ContingencyTable {
            row_levels: levels.clone(),
            col_levels: groups.to_vec(),
            counts: counts.clone(),
        };
        Some(compare_categorical(table).p_value)
    } else {
        None
    };

    let mut rows = vec![BaselineRow {
        variable: column.to_string(),
        kind: RowKind::Categorical,
        overall: format!("n = {}", present.len()),
        groups: stratum_labels.iter().map(|l| format!("n = {}", l.len())).collect(),
        p_text: p_value.map(format_p).unwrap_or_default(),
        p_value,
        missing,
    }];

    for (i, level) in levels.iter().enumerate() {
        let n = present.iter().filter(|v| v.label().as_deref() == Some(level.as_str())).count();
        rows.push(BaselineRow {
            variable: format!("  {}", level),
            kind: RowKind::Level,
            overall: n_pct(n, present.len()),
            groups: counts[i]
                .iter()
                .zip(&stratum_labels)
                .map(|(&k, labels)| n_pct(k as usize, labels.len()))
                .collect(),
            p_value: None,
            p_text: String::new(),
            missing: 0,
        });
    }
    rows
}

impl BaselineTable {
    /// Tab-separated publication text with title and footnote
    pub fn to_text(&self) -> String {
        let mut out = match &self.stratify {
            Some(s) => format!(
                "Table 1. Baseline characteristics of participants stratified by {} (N={})\n",
                s, self.n_overall
            ),
            None => format!("Table 1. Baseline characteristics of participants (N={})\n", self.n_overall),
        };

        out.push_str(&format!("Variable\tOverall (N={})", self.n_overall));
        if self.stratify.is_some() {
            for (g, n) in self.groups.iter().zip(&self.n_groups) {
                out.push_str(&format!("\t{} (n={})", g, n));
            }
            out.push_str("\tp-value");
        }
        out.push('\n');

        let lines: Vec<String> = self
            .rows
            .iter()
            .map(|r| {
                let mut cells = vec![r.variable.clone()];
                if r.kind == RowKind::Categorical {
                    cells.push(String::new());
                    if self.stratify.is_some() {
                        cells.extend(self.groups.iter().map(|_| String::new()));
                        cells.push(String::new());
                    }
                } else {
                    cells.push(r.overall.clone());
                    if self.stratify.is_some() {
                        cells.extend(r.groups.iter().cloned());
                        cells.push(r.p_text.clone());
                    }
                }
                cells.join("\t")
            })
            .collect();
        out.push_str(&lines.join("\n"));

        out.push_str(match self.summary {
            Summary::MeanSd => {
                "\n\nData presented as mean ± SD for continuous variables and n (%) for categorical variables. \
                 P-values from independent t-test for continuous variables and chi-square test for categorical variables."
            }
            Summary::MedianIqr => {
                "\n\nData presented as median (IQR) for continuous variables and n (%) for categorical variables. \
                 P-values from independent t-test for continuous variables and chi-square test for categorical variables."
            }
        });
        out
    }
}

// ============ Plugin ============

#[derive(Deserialize)]
struct BaselineArgs {
    data: Dataset,
    #[serde(default)]
    stratify: Option<String>,
    #[serde(default)]
    summary: Summary,
}

pub struct BaselineTableFn;

static BASELINE_ARGS: [ArgMeta; 3] = [
    ArgMeta::required("data", "Dataset", "Records to describe"),
    ArgMeta::optional("stratify", "String", "Grouping column for per-stratum columns and p-values", "none"),
    ArgMeta::optional("summary", "String", "mean_sd or median_iqr", "mean_sd"),
];

static BASELINE_EXAMPLES: [&str; 1] = ["baseline_table(data=[...], stratify=\"arm\")"];

static BASELINE_RELATED: [&str; 2] = ["compare_continuous", "compare_categorical"];

impl FunctionPlugin for BaselineTableFn {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "baseline_table",
            description: "Baseline characteristics table with per-stratum summaries and p-values",
            usage: "baseline_table(data, [stratify], [summary])",
            args: &BASELINE_ARGS,
            returns: "Object",
            examples: &BASELINE_EXAMPLES,
            category: "stats/descriptive",
            related: &BASELINE_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let a: BaselineArgs = decode_args("baseline_table", args)?;
        let table = baseline_table(&a.data, a.stratify.as_deref(), a.summary)?;
        let text = table.to_text();
        Ok(json!({ "table": encode_result(&table)?, "text": text }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial() -> Dataset {
        Dataset::from_rows(
            &["arm", "age", "sex"],
            &[
                vec!["A", "1", "F"],
                vec!["A", "2", "F"],
                vec!["A", "3", "M"],
                vec!["A", "4", "F"],
                vec!["A", "5", ""],
                vec!["B", "3", "M"],
                vec!["B", "4", "M"],
                vec!["B", "5", "F"],
                vec!["B", "6", "M"],
                vec!["B", "7", "NA"],
            ],
        )
    }

    #[test]
    fn test_format_p() {
        assert_eq!(format_p(0.0004), "<0.001");
        assert_eq!(format_p(0.0042), "0.004");
        assert_eq!(format_p(0.136), "0.14");
        assert_eq!(format_p(1.0), "1.00");
    }

    #[test]
    fn test_continuous_row() {
        let t = baseline_table(&trial(), Some("arm"), Summary::MeanSd).unwrap();
        assert_eq!(t.groups, vec!["A", "B"]);
        assert_eq!(t.n_groups, vec![5, 5]);
        let age = &t.rows[0];
        assert_eq!(age.variable, "age");
        assert_eq!(age.kind, RowKind::Continuous);
        assert_eq!(age.groups, vec!["3.0 ± 1.4", "5.0 ± 1.4"]);
        assert!((age.p_value.unwrap() - 0.1360371927924251).abs() < 1e-6);
        assert_eq!(age.p_text, "0.14");
    }

    #[test]
    fn test_median_summary() {
        let t = baseline_table(&trial(), Some("arm"), Summary::MedianIqr).unwrap();
        assert_eq!(t.rows[0].groups[0], "3.0 (2.0–4.0)");
    }

    #[test]
    fn test_categorical_rows() {
        let t = baseline_table(&trial(), Some("arm"), Summary::MeanSd).unwrap();
        let sex: Vec<&BaselineRow> = t.rows.iter().skip(1).collect();
        assert_eq!(sex.len(), 3);
        assert_eq!(sex[0].variable, "sex");
        assert_eq!(sex[0].overall, "n = 8");
        assert_eq!(sex[0].groups, vec!["n = 4", "n = 4"]);
        assert_eq!(sex[0].missing, 2);
        assert!(sex[0].p_value.is_some());

        assert_eq!(sex[1].variable, "  F");
        assert_eq!(sex[1].overall, "4 (50%)");
        assert_eq!(sex[1].groups, vec!["3 (75%)", "1 (25%)"]);
        assert_eq!(sex[2].groups, vec!["1 (25%)", "3 (75%)"]);
    }

    #[test]
    fn test_unstratified() {
        let t = baseline_table(&trial(), None, Summary::MeanSd).unwrap();
        assert!(t.groups.is_empty());
        assert!(t.rows.iter().all(|r| r.p_value.is_none()));
        // arm is a categorical variable when not used for stratification
        assert!(t.rows.iter().any(|r| r.variable == "arm"));
    }

    #[test]
    fn test_text_layout() {
        let text = baseline_table(&trial(), Some("arm"), Summary::MeanSd).unwrap().to_text();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Table 1. Baseline characteristics of participants stratified by arm (N=10)");
        assert_eq!(lines[1], "Variable\tOverall (N=10)\tA (n=5)\tB (n=5)\tp-value");
        assert_eq!(lines[2], "age\t4.0 ± 1.7\t3.0 ± 1.4\t5.0 ± 1.4\t0.14");
        assert_eq!(lines[3], "sex\t\t\t\t");
    }

    #[test]
    fn test_unknown_stratify_column() {
        let err = baseline_table(&trial(), Some("site"), Summary::MeanSd).unwrap_err();
        assert_eq!(err.code, codes::VALIDATION_ERROR);
    }
}
