//! Two-group comparisons: continuous (Welch-style t) and categorical (Pearson chi-square)

use epistat_plugin::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::distributions::{chi2_p_value, normal_cdf, t_two_sided_p};
use crate::helpers::{mean, numeric_values, population_sd};

/// How the t statistic is turned into a p-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMethod {
    /// Normal CDF of t/√(1+t²/df); reproduces existing report output
    #[default]
    NormalApprox,
    /// Exact Student-t CDF with the same df
    StudentT,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContinuousComparison {
    /// Group labels when split from a dataset
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    pub n_a: usize,
    pub n_b: usize,
    pub mean_a: Option<f64>,
    pub mean_b: Option<f64>,
    pub sd_a: Option<f64>,
    pub sd_b: Option<f64>,
    pub se: f64,
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
    pub method: ComparisonMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<EpiError>,
}

/// Compare two numeric samples.
///
/// Uses population SDs and `df = min(nA, nB) − 1`. Fewer than two values in
/// an arm, or a zero standard error, yields p = 1.
pub fn compare_continuous(a: &[f64], b: &[f64], method: ComparisonMethod) -> ContinuousComparison {
    let (n_a, n_b) = (a.len(), b.len());
    let mut result = ContinuousComparison {
        groups: Vec::new(),
        n_a,
        n_b,
        mean_a: mean(a),
        mean_b: mean(b),
        sd_a: population_sd(a),
        sd_b: population_sd(b),
        se: 0.0,
        t: 0.0,
        df: 0.0,
        p_value: 1.0,
        method,
        warning: None,
    };

    if n_a < 2 || n_b < 2 {
        warn!(n_a, n_b, "continuous comparison needs two values per arm");
        result.warning = Some(
            EpiError::insufficient_data(format!("arms have {} and {} values; at least 2 each are needed", n_a, n_b))
                .in_operation("compare_continuous"),
        );
        return result;
    }

    let (ma, mb) = (result.mean_a.unwrap_or(0.0), result.mean_b.unwrap_or(0.0));
    let (sa, sb) = (result.sd_a.unwrap_or(0.0), result.sd_b.unwrap_or(0.0));
    let se = (sa * sa / n_a as f64 + sb * sb / n_b as f64).sqrt();
    let df = (n_a.min(n_b) - 1) as f64;
    result.se = se;
    result.df = df;

    if se == 0.0 {
        result.warning = Some(
            EpiError::insufficient_data("both arms have zero variance").in_operation("compare_continuous"),
        );
        return result;
    }

    let t = (ma - mb) / se;
    result.t = t;
    result.p_value = match method {
        ComparisonMethod::NormalApprox => {
            let z = t.abs() / (1.0 + t * t / df).sqrt();
            (2.0 * (1.0 - normal_cdf(z))).clamp(0.0, 1.0)
        }
        ComparisonMethod::StudentT => t_two_sided_p(t, df),
    };
    debug!(t, df, p = result.p_value, ?method, "continuous comparison");
    result
}

/// Split `value_column` by the two levels of `group_column` and compare
pub fn compare_continuous_columns(
    dataset: &Dataset,
    value_column: &str,
    group_column: &str,
    method: ComparisonMethod,
) -> Result<ContinuousComparison, EpiError> {
    dataset.validate_roles(&[("variable", value_column), ("group", group_column)])?;
    let levels = dataset.levels(group_column);
    if levels.len() > 2 {
        return Err(EpiError::validation(format!(
            "continuous comparison needs exactly two groups, '{}' has {}",
            group_column,
            levels.len()
        ))
        .with_column(group_column));
    }

    let arm = |i: usize| {
        levels
            .get(i)
            .map(|level| numeric_values(&dataset.subset(group_column, level), value_column))
            .unwrap_or_default()
    };
    let mut result = compare_continuous(&arm(0), &arm(1), method);
    result.groups = levels;
    Ok(result)
}

/// r×c table of counts with labelled margins
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContingencyTable {
    pub row_levels: Vec<String>,
    pub col_levels: Vec<String>,
    pub counts: Vec<Vec<u64>>,
}

impl ContingencyTable {
    /// Cross-tabulate label pairs; levels come out in lexicographic order
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)> + Clone,
    {
        let rows: BTreeSet<&str> = pairs.clone().into_iter().map(|(r, _)| r).collect();
        let cols: BTreeSet<&str> = pairs.clone().into_iter().map(|(_, c)| c).collect();
        let row_levels: Vec<String> = rows.into_iter().map(String::from).collect();
        let col_levels: Vec<String> = cols.into_iter().map(String::from).collect();

        let mut counts = vec![vec![0u64; col_levels.len()]; row_levels.len()];
        for (r, c) in pairs {
            let i = row_levels.iter().position(|l| l == r);
            let j = col_levels.iter().position(|l| l == c);
            if let (Some(i), Some(j)) = (i, j) {
                counts[i][j] += 1;
            }
        }
        Self { row_levels, col_levels, counts }
    }

    /// Cross-tabulate two label vectors, skipping pairs with a missing side
    pub fn from_vectors(rows: &[RawValue], cols: &[RawValue]) -> Result<Self, EpiError> {
        if rows.len() != cols.len() {
            return Err(EpiError::validation(format!(
                "category vectors differ in length ({} vs {})",
                rows.len(),
                cols.len()
            )));
        }
        let labels: Vec<(String, String)> = rows
            .iter()
            .zip(cols)
            .filter_map(|(r, c)| Some((r.label()?, c.label()?)))
            .collect();
        Ok(Self::from_pairs(labels.iter().map(|(r, c)| (r.as_str(), c.as_str()))))
    }

    /// Rows are levels of `variable`, columns are levels of `group`
    pub fn from_dataset(dataset: &Dataset, variable: &str, group: &str) -> Result<Self, EpiError> {
        dataset.validate_roles(&[("variable", variable), ("group", group)])?;
        let rows: Vec<RawValue> = dataset.column(variable).into_iter().cloned().collect();
        let cols: Vec<RawValue> = dataset.column(group).into_iter().cloned().collect();
        Self::from_vectors(&rows, &cols)
    }

    /// Unlabelled counts; levels are numbered from 1
    pub fn from_counts(counts: Vec<Vec<u64>>) -> Result<Self, EpiError> {
        let width = counts.first().map_or(0, Vec::len);
        if counts.iter().any(|row| row.len() != width) {
            return Err(EpiError::validation("every row of the count table must have the same length"));
        }
        Ok(Self {
            row_levels: (1..=counts.len()).map(|i| i.to_string()).collect(),
            col_levels: (1..=width).map(|j| j.to_string()).collect(),
            counts,
        })
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    pub fn row_totals(&self) -> Vec<u64> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn col_totals(&self) -> Vec<u64> {
        (0..self.col_levels.len())
            .map(|j| self.counts.iter().map(|row| row[j]).sum())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoricalComparison {
    pub statistic: f64,
    pub df: u32,
    pub p_value: f64,
    pub table: ContingencyTable,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<EpiError>,
}

/// Pearson chi-square test of independence
pub fn compare_categorical(table: ContingencyTable) -> CategoricalComparison {
    let (r, c) = (table.row_levels.len(), table.col_levels.len());
    let degenerate = |table: ContingencyTable, reason: String| {
        warn!(%reason, "categorical comparison degenerate, p set to 1");
        CategoricalComparison {
            statistic: 0.0,
            df: 0,
            p_value: 1.0,
            table,
            warning: Some(EpiError::insufficient_data(reason).in_operation("compare_categorical")),
        }
    };

    if r < 2 || c < 2 {
        return degenerate(table, format!("table is {}×{}; both axes need at least 2 levels", r, c));
    }

    let total = table.total() as f64;
    let row_totals = table.row_totals();
    let col_totals = table.col_totals();

    let expected = |i: usize, j: usize| row_totals[i] as f64 * col_totals[j] as f64 / total;
    let empty_cell = (0..r)
        .flat_map(|i| (0..c).map(move |j| (i, j)))
        .find(|&(i, j)| !(expected(i, j) > 0.0 && expected(i, j).is_finite()));
    if let Some((i, j)) = empty_cell {
        let reason = format!(
            "expected count is zero for ({}, {})",
            table.row_levels[i], table.col_levels[j]
        );
        return degenerate(table, reason);
    }

    let mut statistic = 0.0;
    for (i, row) in table.counts.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let e = expected(i, j);
            statistic += (observed as f64 - e).powi(2) / e;
        }
    }

    let df = ((r - 1) * (c - 1)) as u32;
    let p_value = chi2_p_value(statistic, df);
    debug!(statistic, df, p_value, "categorical comparison");
    CategoricalComparison { statistic, df, p_value, table, warning: None }
}

/// Cross-tabulate `variable` against `group` and test independence
pub fn compare_categorical_columns(
    dataset: &Dataset,
    variable: &str,
    group: &str,
) -> Result<CategoricalComparison, EpiError> {
    Ok(compare_categorical(ContingencyTable::from_dataset(dataset, variable, group)?))
}

// ============ Plugins ============

#[derive(Deserialize)]
#[serde(untagged)]
enum ContinuousInput {
    Samples { a: Vec<f64>, b: Vec<f64> },
    Columns { data: Dataset, variable: String, group: String },
}

#[derive(Deserialize)]
struct ContinuousArgs {
    #[serde(flatten)]
    input: ContinuousInput,
    #[serde(default)]
    method: ComparisonMethod,
}

pub struct CompareContinuous;

static COMPARE_CONTINUOUS_ARGS: [ArgMeta; 6] = [
    ArgMeta::optional("a", "List<Number>", "First sample", "-"),
    ArgMeta::optional("b", "List<Number>", "Second sample", "-"),
    ArgMeta::optional("data", "Dataset", "Records to split instead of samples", "-"),
    ArgMeta::optional("variable", "String", "Numeric column (with data)", "-"),
    ArgMeta::optional("group", "String", "Two-level grouping column (with data)", "-"),
    ArgMeta::optional("method", "String", "normal_approx or student_t", "normal_approx"),
];

static COMPARE_CONTINUOUS_EXAMPLES: [&str; 2] = [
    "compare_continuous(a=[1,2,3,4,5], b=[3,4,5,6,7]) → t -2.236, p 0.136",
    "compare_continuous(data=[...], variable=\"age\", group=\"arm\", method=\"student_t\")",
];

static COMPARE_CONTINUOUS_RELATED: [&str; 3] = ["compare_categorical", "t_cdf", "baseline_table"];

impl FunctionPlugin for CompareContinuous {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "compare_continuous",
            description: "Two-sample comparison of means (Welch-style standard error)",
            usage: "compare_continuous(a, b, [method]) | compare_continuous(data, variable, group, [method])",
            args: &COMPARE_CONTINUOUS_ARGS,
            returns: "Object",
            examples: &COMPARE_CONTINUOUS_EXAMPLES,
            category: "stats/hypothesis",
            related: &COMPARE_CONTINUOUS_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let ContinuousArgs { input, method } = decode_args("compare_continuous", args)?;
        let result = match input {
            ContinuousInput::Samples { a, b } => compare_continuous(&a, &b, method),
            ContinuousInput::Columns { data, variable, group } => {
                compare_continuous_columns(&data, &variable, &group, method)?
            }
        };
        encode_result(&result)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CategoricalInput {
    Counts { counts: Vec<Vec<u64>> },
    Columns { data: Dataset, variable: String, group: String },
    Vectors { rows: Vec<RawValue>, cols: Vec<RawValue> },
}

pub struct CompareCategorical;

static COMPARE_CATEGORICAL_ARGS: [ArgMeta; 6] = [
    ArgMeta::optional("counts", "Object", "r×c count matrix", "-"),
    ArgMeta::optional("data", "Dataset", "Records to cross-tabulate", "-"),
    ArgMeta::optional("variable", "String", "Categorical column (with data)", "-"),
    ArgMeta::optional("group", "String", "Grouping column (with data)", "-"),
    ArgMeta::optional("rows", "List<Text>", "Row labels, paired with cols", "-"),
    ArgMeta::optional("cols", "List<Text>", "Column labels, paired with rows", "-"),
];

static COMPARE_CATEGORICAL_EXAMPLES: [&str; 2] = [
    "compare_categorical(counts=[[10,20],[20,10]]) → χ² 6.67, p 0.0098",
    "compare_categorical(data=[...], variable=\"sex\", group=\"arm\")",
];

static COMPARE_CATEGORICAL_RELATED: [&str; 3] = ["compare_continuous", "chi_cdf", "baseline_table"];

impl FunctionPlugin for CompareCategorical {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "compare_categorical",
            description: "Pearson chi-square test of independence on an r×c table",
            usage: "compare_categorical(counts) | compare_categorical(data, variable, group) | compare_categorical(rows, cols)",
            args: &COMPARE_CATEGORICAL_ARGS,
            returns: "Object",
            examples: &COMPARE_CATEGORICAL_EXAMPLES,
            category: "stats/hypothesis",
            related: &COMPARE_CATEGORICAL_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let input: CategoricalInput = decode_args("compare_categorical", args)?;
        let table = match input {
            CategoricalInput::Counts { counts } => ContingencyTable::from_counts(counts)?,
            CategoricalInput::Columns { data, variable, group } => {
                ContingencyTable::from_dataset(&data, &variable, &group)?
            }
            CategoricalInput::Vectors { rows, cols } => ContingencyTable::from_vectors(&rows, &cols)?,
        };
        encode_result(&compare_categorical(table))
    }
}
