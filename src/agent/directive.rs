//! Decoding model output into directives
//!
//! Every reply is turned into a closed set of [`Directive`]s before the
//! dispatcher decides anything. Native `tool_calls` win; models that print the
//! call as JSON in their text instead are handled by scanning the content for
//! balanced `{...}` objects shaped like `{"name": .., "arguments": {..}}`.

use serde_json::Value;

use crate::ollama::{FunctionCall, ModelReply, ToolCall};
use crate::tools::ToolKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Call a known tool
    Invoke { tool: ToolKind, params: Value },
    /// Final answer
    Text(String),
    /// Tool-call-shaped output that cannot be honoured
    Rejected { name: String, reason: String },
}

impl Directive {
    pub fn is_tool_request(&self) -> bool {
        !matches!(self, Directive::Text(_))
    }
}

/// Decode a model reply. Returns either exactly one `Text`, or one
/// `Invoke`/`Rejected` per requested call.
pub fn decode(reply: &ModelReply) -> Vec<Directive> {
    let calls = if reply.tool_calls.is_empty() {
        parse_tool_calls_from_text(&reply.content)
    } else {
        reply.tool_calls.clone()
    };

    if calls.is_empty() {
        return vec![Directive::Text(reply.content.trim().to_string())];
    }
    calls.into_iter().map(classify).collect()
}

fn classify(call: ToolCall) -> Directive {
    let FunctionCall { name, arguments } = call.function;

    let tool = match name.parse::<ToolKind>() {
        Ok(tool) => tool,
        Err(e) => {
            return Directive::Rejected {
                name,
                reason: e.to_string(),
            }
        }
    };

    // Some models send arguments as a JSON-encoded string
    let params = match arguments {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(v @ Value::Object(_)) => v,
            _ => {
                return Directive::Rejected {
                    name,
                    reason: "arguments are not a JSON object".to_string(),
                }
            }
        },
        Value::Null => Value::Object(Default::default()),
        v @ Value::Object(_) => v,
        _ => {
            return Directive::Rejected {
                name,
                reason: "arguments are not a JSON object".to_string(),
            }
        }
    };

    Directive::Invoke { tool, params }
}

/// Recover tool calls a model wrote into its reply as JSON rather than
/// through the structured `tool_calls` field.
pub fn parse_tool_calls_from_text(content: &str) -> Vec<ToolCall> {
    let content = content.trim();

    if let Some(call) = try_parse_tool_call(content) {
        return vec![call];
    }

    let mut calls = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in content.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(call) = start.and_then(|s| try_parse_tool_call(&content[s..=i])) {
                        calls.push(call);
                    }
                    start = None;
                }
            }
            _ => {}
        }
    }

    calls
}

fn try_parse_tool_call(json_str: &str) -> Option<ToolCall> {
    let value = serde_json::from_str::<Value>(json_str).ok()?;
    let name = value.get("name").and_then(Value::as_str)?;

    // Some models use "parameters" instead of "arguments"
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))
        .cloned()?;

    Some(ToolCall {
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn native(name: &str, args: Value) -> ModelReply {
        ModelReply {
            content: String::new(),
            tool_calls: vec![ToolCall {
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: args,
                },
            }],
            tokens_used: 0,
        }
    }

    #[test]
    fn test_plain_text_is_text() {
        let d = decode(&ModelReply::text("  Port 22 is open.  "));
        assert_eq!(d, vec![Directive::Text("Port 22 is open.".to_string())]);
    }

    #[test]
    fn test_native_tool_call() {
        let d = decode(&native("nmap", json!({"target": "10.0.0.1"})));
        assert_eq!(
            d,
            vec![Directive::Invoke {
                tool: ToolKind::Nmap,
                params: json!({"target": "10.0.0.1"})
            }]
        );
    }

    #[test]
    fn test_unknown_tool_is_rejected() {
        let d = decode(&native("hydra", json!({})));
        assert!(matches!(&d[0], Directive::Rejected { name, .. } if name == "hydra"));
    }

    #[test]
    fn test_string_arguments_are_decoded() {
        let d = decode(&native("gobuster", Value::String("{\"url\":\"http://t/\"}".into())));
        assert!(matches!(&d[0], Directive::Invoke { tool: ToolKind::Gobuster, params } if params["url"] == "http://t/"));

        let d = decode(&native("gobuster", Value::String("not json".into())));
        assert!(matches!(d[0], Directive::Rejected { .. }));
    }

    #[test]
    fn test_tool_call_embedded_in_text() {
        let reply = ModelReply::text(
            "I'll scan it first.\n{\"name\": \"nmap\", \"arguments\": {\"target\": \"10.0.0.5\", \"flags\": \"-p {80}\"}}\nthen report.",
        );
        let d = decode(&reply);
        assert_eq!(d.len(), 1);
        assert!(matches!(&d[0], Directive::Invoke { tool: ToolKind::Nmap, params } if params["flags"] == "-p {80}"));
    }

    #[test]
    fn test_parameters_alias() {
        let calls = parse_tool_calls_from_text(r#"{"name": "browser", "parameters": {"url": "http://x/"}}"#);
        assert_eq!(calls[0].function.name, "browser");
    }

    #[test]
    fn test_non_tool_json_is_text() {
        let d = decode(&ModelReply::text(r#"Findings: {"port": 22, "service": "ssh"}"#));
        assert!(matches!(d[0], Directive::Text(_)));
    }

    #[test]
    fn test_malformed_json_is_text() {
        let d = decode(&ModelReply::text(r#"{"name": "nmap", "arguments": {"target": "#));
        assert!(matches!(d[0], Directive::Text(_)));
    }
}
