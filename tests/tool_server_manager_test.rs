//! 工具服务器管理器集成测试：使用内存中的假传输替代子进程

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::broadcast;

    use hive::config::ToolServerConfig;
    use hive::mcp::{McpError, ServerTransport, ToolServerManager, TransportEvent, TransportLauncher};
    use hive::tools::ToolInvoker;

    /// 所有假服务器共享的请求日志：(server_id, method, params)
    type RequestLog = Arc<Mutex<Vec<(String, String, Option<Value>)>>>;

    struct FakeTransport {
        server_id: String,
        tools: Vec<&'static str>,
        hang_on_initialize: bool,
        log: RequestLog,
        closed: AtomicBool,
        events: broadcast::Sender<TransportEvent>,
    }

    #[async_trait]
    impl ServerTransport for FakeTransport {
        async fn request(
            &self,
            method: &str,
            params: Option<Value>,
            timeout: Duration,
        ) -> Result<Value, McpError> {
            if self.is_closed() {
                return Err(McpError::Closed);
            }
            self.log
                .lock()
                .unwrap()
                .push((self.server_id.clone(), method.to_string(), params.clone()));

            match method {
                "initialize" if self.hang_on_initialize => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                "initialize" => Ok(json!({"serverInfo": {"name": self.server_id}})),
                "tools/list" => {
                    let tools: Vec<Value> = self
                        .tools
                        .iter()
                        .map(|name| {
                            json!({
                                "name": name,
                                "description": format!("{} from {}", name, self.server_id),
                                "inputSchema": {"type": "object"},
                            })
                        })
                        .collect();
                    Ok(json!({ "tools": tools }))
                }
                "resources/list" => Ok(json!({ "resources": [] })),
                "prompts/list" => Err(McpError::Rpc {
                    code: -32601,
                    message: "Method not found".to_string(),
                }),
                "tools/call" => {
                    let params = params.unwrap_or(Value::Null);
                    let name = params["name"].as_str().unwrap_or_default();
                    if name == "stall" {
                        return Err(McpError::Timeout {
                            method: method.to_string(),
                            timeout,
                        });
                    }
                    if name == "broken" {
                        return Ok(json!({
                            "content": [{"type": "text", "text": "boom"}],
                            "isError": true,
                        }));
                    }
                    Ok(json!({
                        "content": [{
                            "type": "text",
                            "text": format!("{}:{}:{}", self.server_id, name, params["arguments"]),
                        }]
                    }))
                }
                _ => Err(McpError::Rpc {
                    code: -32601,
                    message: "Method not found".to_string(),
                }),
            }
        }

        async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
            self.log
                .lock()
                .unwrap()
                .push((self.server_id.clone(), method.to_string(), params));
            Ok(())
        }

        async fn close(&self) -> Result<(), McpError> {
            self.closed.store(true, Ordering::SeqCst);
            let _ = self.events.send(TransportEvent::Closed);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
            self.events.subscribe()
        }
    }

    /// 按服务器 id 决定行为：command 为 "missing" 时启动失败，"hang" 时握手挂起
    struct FakeLauncher {
        tools: HashMap<&'static str, Vec<&'static str>>,
        launch_delay: Duration,
        log: RequestLog,
        launched: Mutex<Vec<Arc<FakeTransport>>>,
    }

    impl FakeLauncher {
        fn new(tools: &[(&'static str, &[&'static str])]) -> Arc<Self> {
            Self::slow(tools, Duration::ZERO)
        }

        fn slow(tools: &[(&'static str, &[&'static str])], launch_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                tools: tools.iter().map(|(id, t)| (*id, t.to_vec())).collect(),
                launch_delay,
                log: Arc::new(Mutex::new(Vec::new())),
                launched: Mutex::new(Vec::new()),
            })
        }

        fn count(&self, server_id: &str, method: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, m, _)| id == server_id && m == method)
                .count()
        }

        fn last_call(&self) -> Option<(String, Value)> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|(_, m, _)| m == "tools/call")
                .map(|(id, _, p)| (id.clone(), p.clone().unwrap_or(Value::Null)))
        }

        fn transport(&self, server_id: &str) -> Option<Arc<FakeTransport>> {
            self.launched
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|t| t.server_id == server_id)
                .cloned()
        }
    }

    #[async_trait]
    impl TransportLauncher for FakeLauncher {
        async fn launch(
            &self,
            config: &ToolServerConfig,
        ) -> Result<Arc<dyn ServerTransport>, McpError> {
            if !self.launch_delay.is_zero() {
                tokio::time::sleep(self.launch_delay).await;
            }
            if config.command == "missing" {
                return Err(McpError::Spawn {
                    command: config.command.clone(),
                    message: "No such file or directory".to_string(),
                });
            }
            let (events, _) = broadcast::channel(8);
            let transport = Arc::new(FakeTransport {
                server_id: config.id.clone(),
                tools: self.tools.get(config.id.as_str()).cloned().unwrap_or_default(),
                hang_on_initialize: config.command == "hang",
                log: Arc::clone(&self.log),
                closed: AtomicBool::new(false),
                events,
            });
            self.launched.lock().unwrap().push(Arc::clone(&transport));
            Ok(transport)
        }
    }

    fn server(id: &str) -> ToolServerConfig {
        ToolServerConfig::new(id, "fake-server")
    }

    fn tool_names(tools: &[hive::mcp::FunctionTool]) -> HashSet<String> {
        tools.iter().map(|t| t.function.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_failed_spawn_does_not_block_other_servers() {
        let launcher = FakeLauncher::new(&[("one", &["read_file"]), ("three", &["search"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager
            .initialize(vec![
                server("one"),
                ToolServerConfig::new("two", "missing"),
                server("three"),
            ])
            .await;

        let tools = manager.function_tools().await;
        let expected: HashSet<String> = ["read_file", "search"].iter().map(|s| s.to_string()).collect();
        assert_eq!(tool_names(&tools), expected);

        let stats = manager.stats().await;
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.callable, 2);
    }

    #[tokio::test]
    async fn test_disabled_servers_are_not_launched() {
        let launcher = FakeLauncher::new(&[("on", &["a"]), ("off", &["b"])]);
        let manager = ToolServerManager::new(launcher.clone());
        let mut disabled = server("off");
        disabled.enabled = false;
        manager.initialize(vec![server("on"), disabled]).await;

        assert!(launcher.transport("off").is_none());
        assert_eq!(manager.stats().await.attempted, 1);
        assert_eq!(manager.configs().await.len(), 2);
    }

    #[tokio::test]
    async fn test_discovery_runs_once_under_concurrency() {
        let launcher = FakeLauncher::new(&[("one", &["a"]), ("two", &["b"])]);
        let manager = Arc::new(ToolServerManager::new(launcher.clone()));
        manager.initialize(vec![server("one"), server("two")]).await;

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                tokio::spawn(async move { m.fetch_capabilities().await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().function_tools.len(), 2);
        }
        manager.fetch_capabilities().await;

        assert_eq!(launcher.count("one", "tools/list"), 1);
        assert_eq!(launcher.count("two", "tools/list"), 1);
        assert_eq!(launcher.count("one", "initialize"), 1);
        assert_eq!(launcher.count("one", "notifications/initialized"), 1);
    }

    #[tokio::test]
    async fn test_hanging_handshake_is_skipped() {
        let launcher = FakeLauncher::new(&[("slow", &["never"]), ("fast", &["quick"])]);
        let manager = ToolServerManager::new(launcher.clone())
            .with_connect_timeout(Duration::from_millis(200));
        manager
            .initialize(vec![ToolServerConfig::new("slow", "hang"), server("fast")])
            .await;

        let caps = tokio::time::timeout(Duration::from_secs(5), manager.fetch_capabilities())
            .await
            .expect("discovery should not hang");
        assert_eq!(caps.discovered, vec!["fast".to_string()]);
        assert_eq!(caps.owner_of("quick"), Some("fast"));
        assert_eq!(caps.owner_of("never"), None);
        assert_eq!(launcher.count("slow", "tools/list"), 0);
    }

    #[tokio::test]
    async fn test_calls_are_routed_to_owning_server() {
        let launcher = FakeLauncher::new(&[("fs", &["read_file"]), ("web", &["fetch", "read_file"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("fs"), server("web")]).await;

        let out = manager.call_tool("fetch", json!({"url": "https://example.com"})).await;
        assert!(out.starts_with("web:fetch:"));
        let (server_id, params) = launcher.last_call().unwrap();
        assert_eq!(server_id, "web");
        assert_eq!(params["arguments"]["url"], "https://example.com");

        // 重名工具归第一个提供者
        let out = manager.call_tool("read_file", json!({"path": "a.txt"})).await;
        assert!(out.starts_with("fs:read_file:"));
    }

    #[tokio::test]
    async fn test_path_default_is_applied() {
        let launcher = FakeLauncher::new(&[("fs", &["list_directory"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("fs")]).await;

        ToolInvoker::call_tool(&manager, "list_directory", json!({})).await;
        let (_, params) = launcher.last_call().unwrap();
        assert_eq!(params["arguments"]["path"], ".");

        manager
            .call_tool("list_directory", json!({"path": "src"}))
            .await;
        let (_, params) = launcher.last_call().unwrap();
        assert_eq!(params["arguments"]["path"], "src");
    }

    #[tokio::test]
    async fn test_errors_become_text() {
        let launcher = FakeLauncher::new(&[("fs", &["broken", "stall"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("fs")]).await;

        let out = manager.call_tool("broken", json!({})).await;
        assert_eq!(out, "Error: tool 'broken' reported an error: boom");
        assert!(matches!(
            manager.try_call_tool("broken", json!({})).await,
            Err(McpError::ToolReported(text)) if text == "boom"
        ));

        let out = manager.call_tool("nope", json!({})).await;
        assert_eq!(out, "Error: unknown tool 'nope'");

        let out = manager.call_tool("stall", json!({})).await;
        assert_eq!(out, "Error: tool 'stall' timed out after 60s");
    }

    #[tokio::test]
    async fn test_closed_transport_is_not_callable() {
        let launcher = FakeLauncher::new(&[("one", &["a"]), ("two", &["b"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("one"), server("two")]).await;
        manager.fetch_capabilities().await;

        launcher.transport("two").unwrap().close().await.unwrap();
        let stats = manager.stats().await;
        assert_eq!(stats.discovered, 2);
        assert_eq!(stats.callable, 1);

        let out = manager.call_tool("b", json!({})).await;
        assert!(out.starts_with("Error: tool 'b' failed"));
    }

    #[tokio::test]
    async fn test_reinitialize_replaces_servers_and_cache() {
        let launcher = FakeLauncher::new(&[("old", &["legacy"]), ("new", &["modern"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("old")]).await;
        assert_eq!(manager.tool_descriptors().await[0].item.name, "legacy");
        let old = launcher.transport("old").unwrap();

        manager.reinitialize(vec![server("new")]).await;
        assert!(old.is_closed());

        let tools = manager.tool_descriptors().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server_id, "new");
        assert_eq!(tools[0].item.name, "modern");
        assert_eq!(manager.call_tool("legacy", json!({})).await, "Error: unknown tool 'legacy'");
    }

    #[tokio::test]
    async fn test_discovery_during_reinitialize_sees_new_generation() {
        let launcher = FakeLauncher::slow(&[("one", &["read_file"])], Duration::from_millis(300));
        let manager = Arc::new(ToolServerManager::new(launcher.clone()));
        manager.initialize(vec![server("one")]).await;
        assert_eq!(manager.function_tools().await.len(), 1);

        let reinit = {
            let m = Arc::clone(&manager);
            tokio::spawn(async move { m.reinitialize(vec![server("one")]).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 重新初始化进行中：发现等待新连接就绪，而不是缓存一个空结果
        let mid = manager.fetch_capabilities().await;
        reinit.await.unwrap();
        assert_eq!(mid.function_tools.len(), 1);
        assert_eq!(manager.function_tools().await.len(), 1);
        assert!(manager
            .call_tool("read_file", json!({"path": "a.txt"}))
            .await
            .starts_with("one:read_file:"));
        assert_eq!(launcher.count("one", "tools/list"), 2);
    }

    #[tokio::test]
    async fn test_cleanup_closes_everything() {
        let launcher = FakeLauncher::new(&[("one", &["a"])]);
        let manager = ToolServerManager::new(launcher.clone());
        manager.initialize(vec![server("one")]).await;
        manager.fetch_capabilities().await;

        manager.cleanup().await;
        assert!(launcher.transport("one").unwrap().is_closed());
        assert!(manager.function_tools().await.is_empty());
    }
}
