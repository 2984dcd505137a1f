//! Plugin Registry

use crate::{AnalysisContext, FunctionMeta, FunctionPlugin};
use epistat_core::EpiError;
use serde_json::{json, Value as JsonValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Central plugin registry
pub struct PluginRegistry {
    functions: HashMap<String, Arc<dyn FunctionPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn with_function<F: FunctionPlugin + 'static>(mut self, f: F) -> Self {
        let name = f.meta().name.to_lowercase();
        self.functions.insert(name, Arc::new(f));
        self
    }

    pub fn get_function(&self, name: &str) -> Option<&dyn FunctionPlugin> {
        self.functions.get(&name.to_lowercase()).map(|f| f.as_ref())
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Metadata of every function, sorted by name
    pub fn metas(&self) -> Vec<FunctionMeta> {
        let mut metas: Vec<FunctionMeta> = self.functions.values().map(|f| f.meta()).collect();
        metas.sort_by(|a, b| a.name.cmp(b.name));
        metas
    }

    pub fn call_function(&self, name: &str, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError> {
        match self.get_function(name) {
            Some(f) => f.call(args, ctx),
            None => {
                // Find similar function names for better error message
                let similar = self.find_similar_functions(name);
                let mut err = EpiError::unknown_function(name);
                if !similar.is_empty() {
                    let suggestions: Vec<&str> = similar.iter().take(5).map(|s| s.as_str()).collect();
                    err = err.with_suggestion(format!(
                        "Similar: {}. Use list_functions for the full list.",
                        suggestions.join(", ")
                    ));
                }
                Err(err)
            }
        }
    }

    /// Find function names similar to the given name (for error suggestions)
    fn find_similar_functions(&self, name: &str) -> Vec<String> {
        let name_lower = name.to_lowercase();
        let mut matches: Vec<(String, usize)> = self.functions.keys()
            .filter_map(|func_name| {
                let score = Self::similarity_score(&name_lower, func_name);
                if score > 0 {
                    Some((func_name.clone(), score))
                } else {
                    None
                }
            })
            .collect();

        // Higher score first, then name for a stable order
        matches.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        matches.into_iter().map(|(name, _)| name).collect()
    }

    /// Calculate similarity score between two strings
    fn similarity_score(query: &str, candidate: &str) -> usize {
        let mut score = 0;

        if candidate.starts_with(query) {
            score += 100;
        } else if candidate.contains(query) {
            score += 50;
        } else if query.contains(candidate) {
            score += 30;
        }

        // Shared word fragments ("odds" in "odds_ratio")
        let shared = query
            .split('_')
            .filter(|part| part.len() > 2 && candidate.contains(part))
            .count();
        score += shared * 20;

        score
    }

    pub fn help(&self, name: Option<&str>) -> Result<JsonValue, EpiError> {
        match name {
            Some(n) => self.help_for(n),
            None => Ok(self.general_help()),
        }
    }

    fn help_for(&self, name: &str) -> Result<JsonValue, EpiError> {
        let f = self.get_function(name).ok_or_else(|| EpiError::not_found(name))?;
        let meta = f.meta();
        Ok(json!({
            "name": meta.name,
            "type": "function",
            "description": meta.description,
            "usage": meta.usage,
            "returns": meta.returns,
            "category": meta.category,
            "args": meta.args,
            "examples": meta.examples,
            "related": meta.related,
        }))
    }

    fn general_help(&self) -> JsonValue {
        let mut funcs_by_cat: BTreeMap<&'static str, Vec<&'static str>> = BTreeMap::new();
        for meta in self.metas() {
            funcs_by_cat.entry(meta.category).or_default().push(meta.name);
        }
        json!({
            "functions": funcs_by_cat,
            "usage": "Call help with a function name for detailed help.",
        })
    }

    pub fn list_functions(&self, category: Option<&str>) -> JsonValue {
        let funcs: Vec<JsonValue> = self.metas()
            .into_iter()
            .filter(|m| category.map_or(true, |c| m.category == c || m.category.starts_with(&format!("{}/", c))))
            .map(|m| json!({
                "name": m.name,
                "description": m.description,
                "usage": m.usage,
                "category": m.category,
            }))
            .collect();
        JsonValue::Array(funcs)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
