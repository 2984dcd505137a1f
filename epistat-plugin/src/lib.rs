//! Epistat Plugin System
//!
//! Every analysis is exposed as a named `FunctionPlugin` so callers can
//! discover, document and invoke it without linking to its concrete types.

mod traits;
mod registry;
mod context;

pub use traits::{FunctionPlugin, FunctionMeta, ArgMeta, decode_args, encode_result};
pub use registry::PluginRegistry;
pub use context::AnalysisContext;

/// Re-export core types for plugin authors
pub mod prelude {
    pub use crate::{
        FunctionPlugin, FunctionMeta, ArgMeta,
        PluginRegistry, AnalysisContext,
        decode_args, encode_result,
    };
    pub use epistat_core::prelude::*;
    pub use serde_json::Value as JsonValue;
}
