//! Epistat MCP Server
//!
//! Line-delimited JSON-RPC over stdio. Every function in the standard
//! registry is exposed as a tool, plus:
//! - help: Documentation for one function or an index by category
//! - list_functions: Functions, optionally filtered by category
//!
//! Logs go to stderr; stdout carries protocol messages only.

use epistat_core::{EngineConfig, EpiError};
use epistat_plugin::{AnalysisContext, PluginRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::env;
use std::fs;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const PROTOCOL_VERSION: &str = "2025-11-25";
const SERVER_NAME: &str = "epistat";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming an optional JSON config file
const CONFIG_ENV: &str = "EPISTAT_CONFIG";

// MCP Protocol types
#[derive(Debug, Deserialize)]
struct McpRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<JsonValue>,
    method: String,
    #[serde(default)]
    params: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
struct McpResponse {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<McpError>,
}

#[derive(Debug, Serialize)]
struct McpError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<JsonValue>,
}

impl McpError {
    fn parse(details: impl std::fmt::Display) -> Self {
        Self { code: -32700, message: format!("Parse error: {}", details), data: None }
    }

    fn method_not_found(method: &str) -> Self {
        Self { code: -32601, message: format!("Method not found: {}", method), data: None }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self { code: -32602, message: message.into(), data: None }
    }
}

impl McpResponse {
    fn new(id: Option<JsonValue>, result: Result<JsonValue, McpError>) -> Self {
        let (result, error) = match result {
            Ok(r) => (Some(r), None),
            Err(e) => (None, Some(e)),
        };
        Self { jsonrpc: "2.0".to_string(), id, result, error }
    }
}

/// Engine config from `EPISTAT_CONFIG`; defaults when unset, unreadable or invalid
fn load_config() -> EngineConfig {
    let Ok(path) = env::var(CONFIG_ENV) else {
        return EngineConfig::default();
    };
    let parsed = fs::read_to_string(&path)
        .map_err(|e| EpiError::validation(format!("cannot read {}: {}", path, e)))
        .and_then(|text| EngineConfig::from_json(&text));
    match parsed {
        Ok(config) => {
            info!(path = %path, "loaded engine config");
            config
        }
        Err(e) => {
            warn!(path = %path, error = %e, "ignoring engine config, using defaults");
            EngineConfig::default()
        }
    }
}

struct Server {
    registry: PluginRegistry,
    ctx: AnalysisContext,
}

impl Server {
    fn new(config: EngineConfig) -> Self {
        Self {
            registry: epistat_stats::standard_registry(),
            ctx: AnalysisContext::new().with_config(config),
        }
    }

    /// Response for one input line; `None` for notifications
    fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let request: McpRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "unparseable request");
                return Some(McpResponse::new(None, Err(McpError::parse(e))));
            }
        };
        debug!(method = %request.method, "processing");
        let response = self.handle_request(&request);
        // Notifications (no id) receive no response
        request.id.is_some().then_some(response)
    }

    fn handle_request(&self, request: &McpRequest) -> McpResponse {
        let result = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize(&request.params)),
            "initialized" | "notifications/initialized" | "ping" => Ok(json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tool_call(&request.params),
            _ => Err(McpError::method_not_found(&request.method)),
        };
        McpResponse::new(request.id.clone(), result)
    }

    fn handle_initialize(&self, params: &Option<JsonValue>) -> JsonValue {
        let client = params
            .as_ref()
            .and_then(|p| p.get("clientInfo"))
            .and_then(|c| c.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("unknown");

        // Use client's protocol version for compatibility
        let protocol = params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(PROTOCOL_VERSION);

        info!(client, protocol, "client connected");

        json!({
            "protocolVersion": protocol,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION,
                "description": "Epidemiological inference engine"
            },
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "instructions": "Epistat computes effect estimates, comparative tests, subgroup heterogeneity, \
                robustness checks and sample sizes from uploaded records. Use 'list_functions' to browse and \
                'help' for the arguments of one function."
        })
    }

    fn handle_tools_list(&self) -> JsonValue {
        let mut tools: Vec<JsonValue> = self
            .registry
            .metas()
            .into_iter()
            .map(|m| {
                json!({
                    "name": m.name,
                    "description": format!("{}\n\nUsage: {}", m.description, m.usage),
                    "inputSchema": m.input_schema(),
                })
            })
            .collect();

        tools.push(json!({
            "name": "help",
            "description": "Documentation for a function, or an index of all functions by category",
            "inputSchema": {
                "type": "object",
                "properties": { "name": { "type": "string", "description": "Function name" } }
            }
        }));
        tools.push(json!({
            "name": "list_functions",
            "description": "List available functions, optionally filtered by category (e.g. 'stats/robustness')",
            "inputSchema": {
                "type": "object",
                "properties": { "category": { "type": "string", "description": "Category or category prefix" } }
            }
        }));

        json!({ "tools": tools })
    }

    fn handle_tool_call(&self, params: &Option<JsonValue>) -> Result<JsonValue, McpError> {
        let params = params.as_ref().ok_or_else(|| McpError::invalid_params("Missing params"))?;
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::invalid_params("Missing tool name"))?;
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let outcome = match name {
            "help" => self.registry.help(args.get("name").and_then(|v| v.as_str())),
            "list_functions" => Ok(self.registry.list_functions(args.get("category").and_then(|v| v.as_str()))),
            _ if self.registry.get_function(name).is_none() => {
                return Err(McpError::invalid_params(format!("Unknown tool: {}", name)));
            }
            _ => self.registry.call_function(name, &args, &self.ctx),
        };

        Ok(tool_result(outcome))
    }
}

/// Engine errors become tool results flagged `isError` so the caller sees the structured error
fn tool_result(outcome: Result<JsonValue, EpiError>) -> JsonValue {
    match outcome {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value).unwrap_or_default();
            json!({
                "content": [{ "type": "text", "text": text }],
                "structuredContent": value,
                "isError": false
            })
        }
        Err(e) => {
            warn!(code = %e.code, error = %e, "tool call failed");
            json!({
                "content": [{ "type": "text", "text": e.to_string() }],
                "structuredContent": { "error": e },
                "isError": true
            })
        }
    }
}

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = Server::new(load_config());
    info!(
        version = SERVER_VERSION,
        protocol = PROTOCOL_VERSION,
        functions = server.registry.len(),
        "epistat MCP server ready"
    );

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(response) = server.handle_line(line) else {
            continue;
        };
        let mut out = match serde_json::to_string(&response) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "cannot serialize response");
                continue;
            }
        };
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("client disconnected, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server::new(EngineConfig::default())
    }

    fn call(server: &Server, line: &str) -> JsonValue {
        let response = server.handle_line(line).unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[test]
    fn test_parse_error() {
        let out = call(&server(), "{not json");
        assert_eq!(out["error"]["code"], -32700);
    }

    #[test]
    fn test_unknown_method() {
        let out = call(&server(), r#"{"jsonrpc":"2.0","id":1,"method":"resources/list"}"#);
        assert_eq!(out["error"]["code"], -32601);
    }

    #[test]
    fn test_notification_has_no_response() {
        assert!(server().handle_line(r#"{"jsonrpc":"2.0","method":"initialized"}"#).is_none());
    }

    #[test]
    fn test_initialize_echoes_protocol() {
        let out = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18"}}"#,
        );
        assert_eq!(out["result"]["protocolVersion"], "2025-06-18");
        assert_eq!(out["result"]["serverInfo"]["name"], "epistat");
    }

    #[test]
    fn test_tools_list_has_registry_and_builtins() {
        let s = server();
        let out = call(&s, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#);
        let tools = out["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), s.registry.len() + 2);
        let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
        assert!(names.contains(&"effect_estimate"));
        assert!(names.contains(&"help"));
        let fragility = tools.iter().find(|t| t["name"] == "fragility_index").unwrap();
        assert_eq!(fragility["inputSchema"]["type"], "object");
    }

    #[test]
    fn test_tool_call_success() {
        let out = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"effect_estimate","arguments":{"a":20,"b":10,"c":10,"d":20}}}"#,
        );
        let result = &out["result"];
        assert_eq!(result["isError"], false);
        let or = result["structuredContent"]["estimate"]["estimate"].as_f64().unwrap();
        assert!((or - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_tool_call_engine_error_is_flagged() {
        let out = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"gamma","arguments":{"n":0.3}}}"#,
        );
        assert_eq!(out["result"]["isError"], true);
        assert_eq!(out["result"]["structuredContent"]["error"]["code"], "NUMERIC_DEGENERACY");
    }

    #[test]
    fn test_unknown_tool() {
        let out = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"logistic","arguments":{}}}"#,
        );
        assert_eq!(out["error"]["code"], -32602);
    }

    #[test]
    fn test_help_tool() {
        let out = call(
            &server(),
            r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{"name":"help","arguments":{"name":"e_value"}}}"#,
        );
        assert_eq!(out["result"]["structuredContent"]["name"], "e_value");
    }

    #[test]
    fn test_config_from_context() {
        let mut config = EngineConfig::default();
        config.fragility_max_iterations = 3;
        let s = Server::new(config);
        let out = call(
            &s,
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"fragility_index","arguments":{"a":30,"b":10,"c":10,"d":30}}}"#,
        );
        let fragility = &out["result"]["structuredContent"];
        assert_eq!(fragility["reached"], false);
    }
}
