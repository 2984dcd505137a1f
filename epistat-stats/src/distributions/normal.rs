//! Normal distribution functions

use epistat_plugin::prelude::*;
use serde::Deserialize;
use serde_json::json;

// Abramowitz & Stegun 7.1.26, |error| ≤ 1.5e-7
const A1: f64 = 0.254829592;
const A2: f64 = -0.284496736;
const A3: f64 = 1.421413741;
const A4: f64 = -1.453152027;
const A5: f64 = 1.061405429;
const P: f64 = 0.3275911;

/// Error function (rational approximation)
///
/// Odd by construction; `erf(0)` is pinned to 0 because the rational form
/// leaves a 1e-9 residue there.
pub fn erf(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let ax = x.abs();
    let t = 1.0 / (1.0 + P * ax);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-ax * ax).exp();
    if x > 0.0 { y } else { -y }
}

/// Standard normal CDF Φ(z) = ½(1 + erf(z/√2))
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Two-sided p-value of a Wald z statistic
pub fn z_to_two_sided_p(z: f64) -> f64 {
    if z.is_nan() {
        return 1.0;
    }
    (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0)
}

// ============ Plugins ============

#[derive(Deserialize)]
struct XArgs {
    x: f64,
}

#[derive(Deserialize)]
struct ZArgs {
    z: f64,
}

pub struct Erf;

static ERF_ARGS: [ArgMeta; 1] = [ArgMeta::required("x", "Number", "Value")];

static ERF_EXAMPLES: [&str; 1] = ["erf(1) → 0.8427..."];

static ERF_RELATED: [&str; 1] = ["normal_cdf"];

impl FunctionPlugin for Erf {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "erf",
            description: "Error function (Abramowitz–Stegun approximation, ~1.5e-7)",
            usage: "erf(x)",
            args: &ERF_ARGS,
            returns: "Number",
            examples: &ERF_EXAMPLES,
            category: "stats/distribution",
            related: &ERF_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let XArgs { x } = decode_args("erf", args)?;
        Ok(json!(erf(x)))
    }
}

pub struct NormalCdf;

static NORMAL_CDF_ARGS: [ArgMeta; 1] = [ArgMeta::required("z", "Number", "Standard normal deviate")];

static NORMAL_CDF_EXAMPLES: [&str; 2] = ["normal_cdf(0) → 0.5", "normal_cdf(1.96) → 0.975"];

static NORMAL_CDF_RELATED: [&str; 2] = ["erf", "z_to_p"];

impl FunctionPlugin for NormalCdf {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "normal_cdf",
            description: "Standard normal CDF P(Z ≤ z)",
            usage: "normal_cdf(z)",
            args: &NORMAL_CDF_ARGS,
            returns: "Number",
            examples: &NORMAL_CDF_EXAMPLES,
            category: "stats/distribution",
            related: &NORMAL_CDF_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let ZArgs { z } = decode_args("normal_cdf", args)?;
        Ok(json!(normal_cdf(z)))
    }
}

pub struct ZToP;

static Z_TO_P_ARGS: [ArgMeta; 1] = [ArgMeta::required("z", "Number", "Wald z statistic")];

static Z_TO_P_EXAMPLES: [&str; 1] = ["z_to_p(1.96) → 0.05"];

static Z_TO_P_RELATED: [&str; 1] = ["normal_cdf"];

impl FunctionPlugin for ZToP {
    fn meta(&self) -> FunctionMeta {
        FunctionMeta {
            name: "z_to_p",
            description: "Two-sided p-value for a z statistic",
            usage: "z_to_p(z)",
            args: &Z_TO_P_ARGS,
            returns: "Number",
            examples: &Z_TO_P_EXAMPLES,
            category: "stats/distribution",
            related: &Z_TO_P_RELATED,
        }
    }

    fn call(&self, args: &JsonValue, _ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        let ZArgs { z } = decode_args("z_to_p", args)?;
        Ok(json!(z_to_two_sided_p(z)))
    }
}
