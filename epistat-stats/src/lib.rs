//! Epistat Statistics Plugin
//!
//! Inference engine for 2×2 epidemiological data: effect estimates,
//! comparative tests, subgroup heterogeneity, robustness checks and
//! sample-size planning. Every analysis is a pure function; sparse data
//! produces a neutral estimate with a warning instead of an error.

mod helpers;
pub mod distributions;
pub mod contingency;
pub mod hypothesis;
pub mod subgroup;
pub mod robustness;
pub mod sample_size;
pub mod baseline;
pub mod narrative;

use epistat_plugin::PluginRegistry;

pub use contingency::{estimate_effect, odds_ratio, risk_difference, EffectEstimate, Measure, TwoByTwo};
pub use hypothesis::{compare_categorical, compare_continuous, ComparisonMethod, ContingencyTable};
pub use robustness::{analyze_robustness, RobustnessAnalysis};
pub use sample_size::{StudyDesign, ZTable};
pub use subgroup::{analyze_subgroups, SubgroupAnalysis};

/// Load statistics functions into registry
pub fn load_stats_library(registry: PluginRegistry) -> PluginRegistry {
    registry
        // Distributions
        .with_function(distributions::Erf)
        .with_function(distributions::NormalCdf)
        .with_function(distributions::ZToP)
        .with_function(distributions::TCdf)
        .with_function(distributions::Gamma)
        .with_function(distributions::ChiCdf)

        // Effect estimates
        .with_function(contingency::EffectEstimateFn)

        // Comparative tests
        .with_function(hypothesis::CompareContinuous)
        .with_function(hypothesis::CompareCategorical)

        // Subgroups
        .with_function(subgroup::SubgroupAnalysisFn)

        // Robustness
        .with_function(robustness::SensitivityAnalysis)
        .with_function(robustness::EValueFn)
        .with_function(robustness::FragilityIndexFn)

        // Planning
        .with_function(sample_size::SampleSize)

        // Reporting
        .with_function(baseline::BaselineTableFn)
        .with_function(narrative::MethodsText)
}

/// Registry with every engine function loaded
pub fn standard_registry() -> PluginRegistry {
    load_stats_library(PluginRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use epistat_plugin::AnalysisContext;
    use serde_json::json;

    #[test]
    fn test_every_function_registered_once() {
        let registry = standard_registry();
        assert_eq!(registry.len(), 16);
        let mut names: Vec<&str> = registry.metas().iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 16);
    }

    #[test]
    fn test_related_names_resolve() {
        let registry = standard_registry();
        for meta in registry.metas() {
            for related in meta.related {
                assert!(registry.get_function(related).is_some(), "{} -> {}", meta.name, related);
            }
        }
    }

    #[test]
    fn test_call_is_deterministic() {
        let registry = standard_registry();
        let ctx = AnalysisContext::new();
        let args = json!({ "a": 20, "b": 10, "c": 10, "d": 20, "measure": "OR" });
        let first = registry.call_function("effect_estimate", &args, &ctx).unwrap();
        let second = registry.call_function("effect_estimate", &args, &ctx).unwrap();
        assert_eq!(first, second);
    }
}
