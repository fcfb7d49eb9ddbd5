//! 传输层：ServerTransport 抽象与 stdio 子进程实现
//!
//! StdioTransport：
//! - 写端 `Mutex<ChildStdin>`，每个请求一行 JSON
//! - stdout 读任务按数字 id 把响应分发给等待中的 oneshot；收到服务器 ping 请求时直接回复
//! - stderr 读任务逐行记 debug 日志
//! - EOF 或读错误时所有等待中的请求以 Closed 失败，并广播 TransportEvent
//! - 子进程 kill_on_drop

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, oneshot, Mutex};

use super::error::McpError;
use super::launch::LaunchSpec;
use super::types::{
    error_codes, response_line, IncomingKind, IncomingMessage, RpcError, RpcNotification,
    RpcRequest,
};
use crate::config::ToolServerConfig;

/// 传输层事件（由观察任务记录日志，不向上传播）
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Error(String),
    Closed,
}

#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// 发送请求并等待响应的 result 字段
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError>;

    /// 发送通知
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError>;

    /// 关闭连接并结束子进程
    async fn close(&self) -> Result<(), McpError>;

    fn is_closed(&self) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;
}

/// 按配置创建传输；测试中可替换为模拟实现
#[async_trait]
pub trait TransportLauncher: Send + Sync {
    async fn launch(&self, config: &ToolServerConfig) -> Result<Arc<dyn ServerTransport>, McpError>;
}

/// 默认启动器：解析命令后以 stdio 子进程方式启动
#[derive(Debug, Default)]
pub struct StdioLauncher;

#[async_trait]
impl TransportLauncher for StdioLauncher {
    async fn launch(&self, config: &ToolServerConfig) -> Result<Arc<dyn ServerTransport>, McpError> {
        let spec = LaunchSpec::resolve(config);
        if spec.substituted {
            tracing::info!(server_id = %config.id, "using bunx instead of npx");
        }
        let transport = StdioTransport::spawn(&config.id, &spec)?;
        Ok(Arc::new(transport))
    }
}

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, McpError>>>;

pub struct StdioTransport {
    server_id: String,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    child: Mutex<Option<Child>>,
    pending: Arc<Mutex<PendingMap>>,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl StdioTransport {
    pub fn spawn(server_id: &str, spec: &LaunchSpec) -> Result<Self, McpError> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Spawn {
                command: spec.program.clone(),
                message: e.to_string(),
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Io("tool server stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Io("tool server stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Io("tool server stderr unavailable".to_string()))?;

        let (events, _) = broadcast::channel(16);
        let transport = Self {
            server_id: server_id.to_string(),
            stdin: Arc::new(Mutex::new(Some(stdin))),
            child: Mutex::new(Some(child)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            closed: Arc::new(AtomicBool::new(false)),
            events,
        };
        transport.spawn_stdout_reader(stdout);

        let sid = transport.server_id.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                tracing::debug!(server_id = %sid, "stderr: {}", line);
            }
        });

        Ok(transport)
    }

    fn spawn_stdout_reader(&self, stdout: ChildStdout) {
        let server_id = self.server_id.clone();
        let pending = Arc::clone(&self.pending);
        let stdin = Arc::clone(&self.stdin);
        let closed = Arc::clone(&self.closed);
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg: IncomingMessage = match serde_json::from_str(&line) {
                            Ok(m) => m,
                            Err(e) => {
                                tracing::warn!(server_id = %server_id, "stdout parse error: {} line={}", e, line);
                                continue;
                            }
                        };
                        match msg.kind() {
                            IncomingKind::Response(id) => {
                                let result = match msg.error {
                                    Some(err) => Err(McpError::Rpc {
                                        code: err.code,
                                        message: err.message,
                                    }),
                                    None => Ok(msg.result.unwrap_or(Value::Null)),
                                };
                                if let Some(tx) = pending.lock().await.remove(&id) {
                                    let _ = tx.send(result);
                                }
                            }
                            IncomingKind::Request { id, method } => {
                                let reply = if method == "ping" {
                                    Ok(serde_json::json!({}))
                                } else {
                                    Err(RpcError {
                                        code: error_codes::METHOD_NOT_FOUND,
                                        message: format!("method not supported: {}", method),
                                        data: None,
                                    })
                                };
                                if let Err(e) = write_line(&stdin, &response_line(&id, reply)).await {
                                    tracing::warn!(server_id = %server_id, "failed to answer '{}': {}", method, e);
                                }
                            }
                            IncomingKind::Notification(method) => {
                                tracing::debug!(server_id = %server_id, "notification: {}", method);
                            }
                            IncomingKind::Invalid => {
                                tracing::warn!(server_id = %server_id, "unrecognized message: {}", line);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
            }

            closed.store(true, Ordering::SeqCst);
            fail_pending(&pending).await;
            let _ = events.send(TransportEvent::Closed);
        });
    }
}

async fn write_line(stdin: &Mutex<Option<ChildStdin>>, value: &impl serde::Serialize) -> Result<(), McpError> {
    let payload = serde_json::to_string(value)?;
    let mut guard = stdin.lock().await;
    let writer = guard.as_mut().ok_or(McpError::Closed)?;
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

async fn fail_pending(pending: &Mutex<PendingMap>) {
    for (_, tx) in pending.lock().await.drain() {
        let _ = tx.send(Err(McpError::Closed));
    }
}

#[async_trait]
impl ServerTransport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = write_line(&self.stdin, &RpcRequest::new(id, method, params)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        write_line(&self.stdin, &RpcNotification::new(method, params)).await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        // 先关 stdin，让服务器有机会自行退出
        drop(self.stdin.lock().await.take());
        fail_pending(&self.pending).await;

        if let Some(mut child) = self.child.lock().await.take() {
            let exited = tokio::time::timeout(Duration::from_millis(500), child.wait()).await;
            if !matches!(exited, Ok(Ok(_))) {
                child.kill().await?;
            }
        }
        tracing::debug!(server_id = %self.server_id, "transport closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: std::env::vars().collect(),
            substituted: false,
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_spawn_error() {
        let err = StdioTransport::spawn("x", &spec("/nonexistent/hive-tool-server", &[]))
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_echo_server_roundtrip() {
        // 一个把请求 id 原样带回的最小服务器
        let script = r#"while read -r line; do id=$(echo "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p'); [ -n "$id" ] && echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}"; done"#;
        let t = StdioTransport::spawn("sh", &spec("sh", &["-c", script])).unwrap();
        let v = t
            .request("tools/list", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(v["ok"], true);

        t.close().await.unwrap();
        assert!(t.is_closed());
        assert_eq!(
            t.request("tools/list", None, Duration::from_secs(1)).await,
            Err(McpError::Closed)
        );
    }

    #[tokio::test]
    async fn test_eof_fails_pending_request() {
        let t = StdioTransport::spawn("eof", &spec("sh", &["-c", "read -r line; exit 0"])).unwrap();
        let mut events = t.subscribe();
        let err = t
            .request("initialize", None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err, McpError::Closed);
        assert_eq!(events.recv().await.unwrap(), TransportEvent::Closed);
    }
}
