//! JSON-RPC 2.0 报文与工具服务器发现结果的数据类型
//!
//! 报文按行分隔（newline-delimited JSON）。服务器 -> 客户端的一行可能是响应、服务器请求（如 ping）或通知。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 协议版本（initialize 时声明）
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// 标准 JSON-RPC 错误码
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// 客户端请求
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// 客户端通知（无 id，不等待响应）
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> RpcNotification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// 服务器发来的一行报文（响应 / 请求 / 通知共用字段）
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

/// 报文分类
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingKind {
    /// 对客户端请求的响应（数字 id）
    Response(u64),
    /// 服务器发起的请求，需要回复
    Request { id: Value, method: String },
    /// 服务器通知
    Notification(String),
    Invalid,
}

impl IncomingMessage {
    pub fn kind(&self) -> IncomingKind {
        match (&self.id, &self.method) {
            (Some(id), Some(method)) => IncomingKind::Request {
                id: id.clone(),
                method: method.clone(),
            },
            (None, Some(method)) => IncomingKind::Notification(method.clone()),
            (Some(id), None) => match id.as_u64() {
                Some(n) => IncomingKind::Response(n),
                None => IncomingKind::Invalid,
            },
            (None, None) => IncomingKind::Invalid,
        }
    }
}

/// 对服务器请求的回复
pub fn response_line(id: &Value, result: Result<Value, RpcError>) -> Value {
    match result {
        Ok(result) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(error) => serde_json::json!({ "jsonrpc": "2.0", "id": id, "error": error }),
    }
}

fn default_input_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

/// 服务器声明的工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "default_input_schema")]
    pub input_schema: Value,
}

/// 服务器声明的资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// 服务器声明的提示词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// tool-calling 格式的函数描述：`{"type":"function","function":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl FunctionTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

impl From<&ToolDescriptor> for FunctionTool {
    fn from(t: &ToolDescriptor) -> Self {
        FunctionTool::new(&t.name, &t.description, t.input_schema.clone())
    }
}

/// 带来源服务器 id 的发现条目
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tagged<T> {
    pub server_id: String,
    #[serde(flatten)]
    pub item: T,
}

/// 一次发现的冻结结果；重新初始化前不再变化
#[derive(Debug, Clone, Default, Serialize)]
pub struct Capabilities {
    pub tools: Vec<Tagged<ToolDescriptor>>,
    pub resources: Vec<Tagged<ResourceDescriptor>>,
    pub prompts: Vec<Tagged<PromptDescriptor>>,
    pub function_tools: Vec<FunctionTool>,
    /// 工具名 -> 所属服务器 id（重名时按配置顺序第一个服务器胜出）
    pub routes: HashMap<String, String>,
    /// 发现成功的服务器 id（配置顺序）
    pub discovered: Vec<String>,
}

impl Capabilities {
    pub fn owner_of(&self, tool: &str) -> Option<&str> {
        self.routes.get(tool).map(String::as_str)
    }
}

/// 统计：attempted >= discovered >= callable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    /// 尝试启动的服务器数（已启用的配置）
    pub attempted: usize,
    /// 发现成功的服务器数
    pub discovered: usize,
    /// 发现成功且连接仍然存活的服务器数
    pub callable: usize,
}

/// 分页列表通用结构（tools/list、resources/list、prompts/list）
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage {
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
    #[serde(flatten)]
    pub items: HashMap<String, Value>,
}

/// tools/call 返回的内容块
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: String,
    },
    Resource {
        resource: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// 合并为纯文本：文本块原样拼接，其余块写成占位说明
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Image { mime_type } => format!("[image {}]", mime_type),
                ContentBlock::Resource { resource } => resource
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| {
                        resource
                            .get("uri")
                            .and_then(Value::as_str)
                            .map(|uri| format!("[resource {}]", uri))
                    })
                    .unwrap_or_else(|| "[resource]".to_string()),
                ContentBlock::Other => "[unsupported content]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
