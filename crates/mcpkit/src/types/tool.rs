//! Tool definitions and call results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::content::Content;

/// A tool advertised through `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema (`type: object`) describing the arguments.
    pub input_schema: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<ToolAnnotations>,
}

impl Tool {
    /// A tool that takes no arguments until a schema is attached.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: Some(description.into()),
            input_schema: serde_json::json!({ "type": "object" }),
            annotations: None,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Mark the tool as not modifying any state.
    pub fn read_only(mut self) -> Self {
        let mut annotations = self.annotations.unwrap_or_default();
        annotations.read_only_hint = Some(true);
        self.annotations = Some(annotations);
        self
    }

    /// Mark the tool as talking to services outside this process.
    pub fn open_world(mut self) -> Self {
        let mut annotations = self.annotations.unwrap_or_default();
        annotations.open_world_hint = Some(true);
        self.annotations = Some(annotations);
        self
    }
}

/// Behavior hints for clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

/// Result of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallToolResult {
    pub fn success(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
            structured_content: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::success(vec![Content::text(text)])
    }

    /// A tool-level failure. The text always reads `Error: <message>`.
    pub fn error(message: impl AsRef<str>) -> Self {
        Self {
            content: vec![Content::text(format!("Error: {}", message.as_ref()))],
            is_error: true,
            structured_content: None,
        }
    }

    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured_content = Some(value);
        self
    }

    /// Text of the first text part, if any.
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(Content::as_text)
    }
}

/// Result of `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ListToolsResult {
    pub fn all(tools: Vec<Tool>) -> Self {
        Self {
            tools,
            next_cursor: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_wire_format() {
        let tool = Tool::new("ndc_analysis", "Look up an NDC")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "ndc": { "type": "string" } },
                "required": ["ndc"]
            }))
            .read_only();

        let json = serde_json::to_value(&tool).unwrap();
        assert_eq!(json["name"], "ndc_analysis");
        assert_eq!(json["inputSchema"]["required"][0], "ndc");
        assert_eq!(json["annotations"]["readOnlyHint"], true);
        assert!(json["annotations"].get("openWorldHint").is_none());
    }

    #[test]
    fn test_error_result_prefix() {
        let result = CallToolResult::error("Unknown job: 123");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["text"], "Error: Unknown job: 123");
    }

    #[test]
    fn test_success_omits_is_error() {
        let json = serde_json::to_value(CallToolResult::text("ok")).unwrap();
        assert!(json.get("isError").is_none());
        assert!(json.get("structuredContent").is_none());
    }
}
