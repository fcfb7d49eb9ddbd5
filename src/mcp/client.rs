//! 工具服务器客户端：握手、分页列出工具 / 资源 / 提示词、调用工具

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::error::McpError;
use super::transport::ServerTransport;
use super::types::{
    CallToolResult, ListPage, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
    PROTOCOL_VERSION,
};

/// 分页上限，防止服务器返回循环游标
const MAX_PAGES: usize = 100;

#[derive(Clone)]
pub struct McpClient {
    server_id: String,
    transport: Arc<dyn ServerTransport>,
    request_timeout: Duration,
}

impl McpClient {
    pub fn new(
        server_id: impl Into<String>,
        transport: Arc<dyn ServerTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            transport,
            request_timeout,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn transport(&self) -> &Arc<dyn ServerTransport> {
        &self.transport
    }

    /// initialize 握手后发送 notifications/initialized；返回服务器的 initialize 结果
    pub async fn connect(&self) -> Result<Value, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": "hive", "version": env!("CARGO_PKG_VERSION") },
        });
        let info = self
            .transport
            .request("initialize", Some(params), self.request_timeout)
            .await?;
        self.transport
            .notify("notifications/initialized", None)
            .await?;
        let server_info = info.get("serverInfo").cloned().unwrap_or_default();
        tracing::debug!(
            server_id = %self.server_id,
            server = %server_info,
            "tool server connected"
        );
        Ok(info)
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.list_all("tools/list", "tools").await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, McpError> {
        self.list_all("resources/list", "resources").await
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptDescriptor>, McpError> {
        self.list_all("prompts/list", "prompts").await
    }

    /// 跟随 nextCursor 取完所有分页
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let raw = self
                .transport
                .request(method, params, self.request_timeout)
                .await?;
            let mut page: ListPage = serde_json::from_value(raw)?;
            if let Some(list) = page.items.remove(field) {
                let batch: Vec<T> = serde_json::from_value(list)?;
                items.extend(batch);
            }
            match page.next_cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => return Ok(items),
            }
        }

        tracing::warn!(server_id = %self.server_id, method, "pagination limit reached");
        Ok(items)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        let raw = self
            .transport
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
                timeout,
            )
            .await?;
        Ok(serde_json::from_value(raw)?)
    }

    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }
}
