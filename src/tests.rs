use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::agent::{AgentLoop, EventSink, ToolDispatch, ToolReply, TurnEvent};
use crate::chat::{ChatExit, EXIT_KEYWORDS, run_chat, run_session};
use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::conversation::{ChatMessage, Role, ToolCallRequest, ToolSpec};
use crate::lifecycle::{ConnectionStack, StartupError};
use crate::mcp::{Connector, ToolCallOutput, ToolConnection};
use crate::model::{ModelClient, ModelEvent, ModelRequest, ModelStream};
use crate::registry::{CapabilitySelection, PlannedServer, RegistryError, ToolServerRegistry};
use crate::session::{ControllerSession, assemble};
use crate::theme::Theme;

type Responder = dyn Fn(&ModelRequest) -> Result<Vec<ModelEvent>> + Send + Sync;

struct ScriptedModel {
    respond: Box<Responder>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(
        respond: impl Fn(&ModelRequest) -> Result<Vec<ModelEvent>> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn count(&self, pred: impl Fn(&ModelRequest) -> bool) -> usize {
        self.requests().iter().filter(|req| pred(req)).count()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn stream(&self, request: ModelRequest) -> Result<ModelStream> {
        let events = (self.respond)(&request);
        self.requests.lock().expect("requests lock").push(request);
        let events = events?;
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }
}

struct FakeConnection {
    name: String,
    fail_list: bool,
    tool_error: bool,
    calls: Mutex<Vec<(String, Map<String, Value>)>>,
    closes: AtomicUsize,
    close_log: Arc<Mutex<Vec<String>>>,
}

impl FakeConnection {
    fn tool_name(&self) -> String {
        if self.name == "time" {
            "get_current_time".to_string()
        } else {
            format!("{}_lookup", self.name)
        }
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl ToolConnection for FakeConnection {
    fn server_name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        if self.fail_list {
            return Err(anyhow::anyhow!("tools/list failed on '{}'", self.name));
        }
        Ok(vec![ToolSpec {
            name: self.tool_name(),
            description: format!("{} tool", self.name),
            parameters: json!({ "type": "object", "properties": {} }),
        }])
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<ToolCallOutput> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((name.to_string(), arguments));
        if self.tool_error {
            return Ok(ToolCallOutput {
                text: "Invalid timezone".to_string(),
                is_error: true,
            });
        }
        Ok(ToolCallOutput {
            text: "2025-03-14T15:00:00+11:00".to_string(),
            is_error: false,
        })
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.close_log
            .lock()
            .expect("close log lock")
            .push(self.name.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingConnector {
    fail_open: Option<String>,
    fail_list: Option<String>,
    tool_error: bool,
    opens: Mutex<Vec<String>>,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    close_log: Arc<Mutex<Vec<String>>>,
}

impl RecordingConnector {
    fn opens(&self) -> Vec<String> {
        self.opens.lock().expect("opens lock").clone()
    }

    fn closes(&self) -> Vec<String> {
        self.close_log.lock().expect("close log lock").clone()
    }

    fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.connections.lock().expect("connections lock").clone()
    }
}

#[async_trait]
impl Connector for RecordingConnector {
    async fn open(&self, server: &PlannedServer) -> Result<Arc<dyn ToolConnection>> {
        self.opens
            .lock()
            .expect("opens lock")
            .push(server.key.clone());
        if self.fail_open.as_deref() == Some(server.key.as_str()) {
            return Err(anyhow::anyhow!("failed to launch '{}'", server.key));
        }
        let connection = Arc::new(FakeConnection {
            name: server.key.clone(),
            fail_list: self.fail_list.as_deref() == Some(server.key.as_str()),
            tool_error: self.tool_error,
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            close_log: Arc::clone(&self.close_log),
        });
        self.connections
            .lock()
            .expect("connections lock")
            .push(Arc::clone(&connection));
        Ok(connection)
    }
}

fn base_cfg() -> RuntimeConfig {
    RuntimeConfig {
        config_path: ".agent-army/config.toml".to_string(),
        provider: Provider::Openai,
        model: Some("scripted-model".to_string()),
        capabilities: CapabilitySelection::Auto,
        max_steps: 6,
        tool_timeout: None,
        servers: Vec::new(),
    }
}

fn registry(pairs: &[(&str, &str)]) -> ToolServerRegistry {
    ToolServerRegistry::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    )
}

fn four_server_registry() -> ToolServerRegistry {
    registry(&[
        ("BRAVE_API_KEY", "brave"),
        ("LOCAL_FILE_DIR", "/tmp/notes"),
        ("CRAWL4AI_RAG_URL", "http://localhost:8051/mcp"),
    ])
}

fn text(delta: &str) -> ModelEvent {
    ModelEvent::TextDelta(delta.to_string())
}

fn tool_call(id: &str, name: &str, arguments: Value) -> ModelEvent {
    ModelEvent::ToolCall(ToolCallRequest {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    })
}

fn system_text(req: &ModelRequest) -> &str {
    req.messages
        .first()
        .map(ChatMessage::text_content)
        .unwrap_or_default()
}

fn is_controller(req: &ModelRequest) -> bool {
    system_text(req).starts_with("You coordinate")
}

fn is_time_specialist(req: &ModelRequest) -> bool {
    system_text(req).contains("time specialist")
}

fn after_tool_result(req: &ModelRequest) -> bool {
    req.messages
        .last()
        .is_some_and(|message| message.role == Role::Tool)
}

fn last_user_text(req: &ModelRequest) -> String {
    req.messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.text_content().to_string())
        .unwrap_or_default()
}

fn last_text(req: &ModelRequest) -> String {
    req.messages
        .last()
        .map(|message| message.text_content().to_string())
        .unwrap_or_default()
}

/// Controller delegates every question to the time agent once; the time
/// agent calls its one tool and reports the result.
fn time_model() -> Arc<ScriptedModel> {
    ScriptedModel::new(|req| {
        if is_controller(req) {
            if after_tool_result(req) {
                return Ok(vec![text("It is "), text("**3:00 pm** in Sydney.\n")]);
            }
            return Ok(vec![tool_call(
                "call_1",
                "use_time_agent",
                json!({ "query": last_user_text(req) }),
            )]);
        }
        if after_tool_result(req) {
            return Ok(vec![text(&format!("Sydney time: {}", last_text(req)))]);
        }
        Ok(vec![tool_call(
            "tc_1",
            "get_current_time",
            json!({ "timezone": "Australia/Sydney" }),
        )])
    })
}

async fn time_only_session(
    model: Arc<ScriptedModel>,
    connector: &RecordingConnector,
) -> ControllerSession {
    let mut cfg = base_cfg();
    cfg.capabilities = CapabilitySelection::Explicit(vec!["time".to_string()]);
    assemble(&cfg, &registry(&[]), connector, model)
        .await
        .expect("time-only session should assemble")
}

#[tokio::test]
async fn missing_configuration_fails_before_any_server_is_opened() {
    let connector = RecordingConnector::default();
    let mut cfg = base_cfg();
    cfg.capabilities = CapabilitySelection::Explicit(vec!["time".into(), "search".into()]);

    let err = assemble(&cfg, &registry(&[]), &connector, time_model())
        .await
        .err()
        .expect("assembly should fail");

    assert!(matches!(
        err,
        StartupError::Registry(RegistryError::NotConfigured { ref missing, .. }) if missing == "BRAVE_API_KEY"
    ));
    assert!(connector.opens().is_empty());
}

#[tokio::test]
async fn open_failure_unwinds_earlier_servers_in_reverse_once() {
    let connector = RecordingConnector {
        fail_open: Some("filesystem".to_string()),
        ..RecordingConnector::default()
    };

    let err = assemble(&base_cfg(), &four_server_registry(), &connector, time_model())
        .await
        .err()
        .expect("assembly should fail");

    assert!(matches!(err, StartupError::Connection { ref server, .. } if server == "filesystem"));
    assert_eq!(connector.opens(), vec!["time", "search", "filesystem"]);
    assert_eq!(connector.closes(), vec!["search", "time"]);
    for connection in connector.connections() {
        assert_eq!(connection.close_count(), 1, "{} closed once", connection.name);
    }
}

#[tokio::test]
async fn list_failure_closes_the_failing_server_first() {
    let connector = RecordingConnector {
        fail_list: Some("crawl".to_string()),
        ..RecordingConnector::default()
    };

    let plan = four_server_registry()
        .plan(&CapabilitySelection::Auto, &[])
        .expect("plan builds");
    let err = ConnectionStack::open_all(&connector, &plan)
        .await
        .err()
        .expect("open_all should fail");

    assert!(err.to_string().contains("tools/list failed on 'crawl'"));
    assert_eq!(connector.closes(), vec!["crawl", "filesystem", "search", "time"]);
}

#[tokio::test]
async fn close_all_runs_in_reverse_and_only_once() {
    let connector = RecordingConnector::default();
    let plan = four_server_registry()
        .plan(&CapabilitySelection::Auto, &[])
        .expect("plan builds");
    let mut stack = ConnectionStack::open_all(&connector, &plan)
        .await
        .expect("all servers open");
    assert_eq!(stack.len(), 4);

    stack.close_all().await.expect("close succeeds");
    stack.close_all().await.expect("second close is a no-op");

    assert!(stack.is_empty());
    assert_eq!(connector.closes(), vec!["crawl", "filesystem", "search", "time"]);
}

#[tokio::test]
async fn every_exit_keyword_ends_the_loop_and_closes_connections_once() {
    let keywords = EXIT_KEYWORDS
        .iter()
        .map(|k| k.to_string())
        .chain(["EXIT", "Quit", "  bye  ", "GOODBYE"].map(String::from));

    for keyword in keywords {
        let connector = RecordingConnector::default();
        let model = time_model();
        let mut session = time_only_session(Arc::clone(&model), &connector).await;

        let input = format!("{keyword}\nWhat time is it?\n");
        let mut out = Vec::new();
        let exit = run_chat(&mut session, input.as_bytes(), &mut out, Theme::plain())
            .await
            .expect("chat loop should end cleanly");
        session.shutdown().await.expect("shutdown succeeds");
        session.shutdown().await.expect("second shutdown is a no-op");

        let output = String::from_utf8(out).expect("utf8 output");
        assert_eq!(exit, ChatExit::Keyword, "{keyword:?}");
        assert!(output.ends_with("Goodbye!\n"), "{keyword:?}: {output}");
        assert!(model.requests().is_empty(), "{keyword:?} reached the model");
        for connection in connector.connections() {
            assert_eq!(connection.close_count(), 1);
        }
    }
}

#[tokio::test]
async fn end_of_input_says_goodbye() {
    let connector = RecordingConnector::default();
    let mut session = time_only_session(time_model(), &connector).await;

    let mut out = Vec::new();
    let exit = run_chat(&mut session, &b""[..], &mut out, Theme::plain())
        .await
        .expect("chat loop should end cleanly");
    session.shutdown().await.expect("shutdown succeeds");

    assert_eq!(exit, ChatExit::EndOfInput);
    assert!(String::from_utf8(out).unwrap().contains("Goodbye!"));
    assert_eq!(connector.closes(), vec!["time"]);
}

#[tokio::test]
async fn failed_turn_leaves_history_unchanged() {
    let model = ScriptedModel::new(|req| {
        let user = last_user_text(req);
        if user == "boom" {
            return Err(anyhow::anyhow!("model provider returned HTTP 500: overloaded"));
        }
        Ok(vec![text(&format!("echo {user}"))])
    });
    let connector = RecordingConnector::default();
    let mut session = time_only_session(Arc::clone(&model), &connector).await;
    let sink = EventSink::disabled();

    session.handle("hello", &sink).await.expect("first turn succeeds");
    let before = session.history().messages().to_vec();
    assert_eq!(before.len(), 2);

    let err = session.handle("boom", &sink).await.unwrap_err();
    assert!(err.to_string().contains("HTTP 500"));
    assert_eq!(session.history().messages(), before.as_slice());
    assert_eq!(session.history().turns(), 1);

    session.handle("again", &sink).await.expect("third turn succeeds");
    let last = model.requests().pop().expect("a request was made");
    let texts = last
        .messages
        .iter()
        .skip(1)
        .map(|m| m.text_content().to_string())
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["hello", "echo hello", "again"]);
    assert_eq!(session.history().len(), 4);

    session.shutdown().await.expect("shutdown succeeds");
}

#[tokio::test]
async fn same_delegation_twice_in_one_step_is_attributed_per_call() {
    let model = ScriptedModel::new(|req| {
        if is_controller(req) {
            if after_tool_result(req) {
                return Ok(vec![text("done")]);
            }
            return Ok(vec![
                tool_call("call_a", "use_time_agent", json!({ "query": "time in Sydney" })),
                tool_call("call_b", "use_time_agent", json!({ "query": "time in London" })),
            ]);
        }
        Ok(vec![text(&format!("answer for {}", last_user_text(req)))])
    });
    let connector = RecordingConnector::default();
    let mut session = time_only_session(Arc::clone(&model), &connector).await;

    let outcome = session
        .handle("compare Sydney and London", &EventSink::disabled())
        .await
        .expect("turn succeeds");

    let results = outcome
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| (m.tool_call_id.clone().unwrap_or_default(), m.text_content().to_string()))
        .collect::<Vec<_>>();
    assert_eq!(
        results,
        vec![
            ("call_a".to_string(), r#"{"result":"answer for time in Sydney"}"#.to_string()),
            ("call_b".to_string(), r#"{"result":"answer for time in London"}"#.to_string()),
        ]
    );
    assert_eq!(model.count(is_time_specialist), 2);
    assert_eq!(outcome.reply, "done");

    session.shutdown().await.expect("shutdown succeeds");
}

#[tokio::test]
async fn concurrent_delegation_failures_are_all_returned_to_the_controller() {
    let model = ScriptedModel::new(|req| {
        if is_controller(req) {
            if after_tool_result(req) {
                let failures = req
                    .messages
                    .iter()
                    .filter(|m| m.role == Role::Tool && m.text_content().starts_with("error:"))
                    .count();
                return Ok(vec![text(&format!("{failures} lookups failed"))]);
            }
            return Ok(vec![
                tool_call("call_a", "use_time_agent", json!({ "query": "a" })),
                tool_call("call_b", "use_time_agent", json!({ "query": "b" })),
            ]);
        }
        Err(anyhow::anyhow!("specialist model unavailable"))
    });
    let connector = RecordingConnector::default();
    let mut session = time_only_session(model, &connector).await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outcome = session
        .handle("two things", &EventSink::new(tx))
        .await
        .expect("the turn itself survives delegation failures");

    assert_eq!(outcome.reply, "2 lookups failed");
    let mut failed = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, TurnEvent::ToolFailed { ref name, .. } if name == "use_time_agent") {
            failed += 1;
        }
    }
    assert_eq!(failed, 2);

    session.shutdown().await.expect("shutdown succeeds");
}

#[tokio::test]
async fn tool_server_errors_are_fed_back_to_the_specialist() {
    let model = ScriptedModel::new(|req| {
        if is_controller(req) {
            if after_tool_result(req) {
                return Ok(vec![text(&last_text(req))]);
            }
            return Ok(vec![tool_call("call_1", "use_time_agent", json!({ "query": "Mars time" }))]);
        }
        if after_tool_result(req) {
            return Ok(vec![text(&format!("tool said: {}", last_text(req)))]);
        }
        Ok(vec![tool_call("tc_1", "get_current_time", json!({ "timezone": "Mars/Base" }))])
    });
    let connector = RecordingConnector {
        tool_error: true,
        ..RecordingConnector::default()
    };
    let mut session = time_only_session(model, &connector).await;

    let outcome = session
        .handle("What time is it on Mars?", &EventSink::disabled())
        .await
        .expect("turn succeeds");

    assert_eq!(outcome.reply, r#"{"result":"tool said: error: Invalid timezone"}"#);
    session.shutdown().await.expect("shutdown succeeds");
}

#[tokio::test]
async fn runaway_tool_loops_hit_the_step_ceiling() {
    struct Noop;

    #[async_trait]
    impl ToolDispatch for Noop {
        fn tool_specs(&self) -> Vec<ToolSpec> {
            Vec::new()
        }

        async fn dispatch(&self, _call: &ToolCallRequest, _sink: &EventSink) -> Result<ToolReply> {
            Ok(ToolReply::Success("ok".to_string()))
        }
    }

    let model = ScriptedModel::new(|_| Ok(vec![tool_call("c", "noop", json!({}))]));
    let agent = AgentLoop::new("controller", model.clone(), "You coordinate.", 3);

    let err = agent
        .run(&[], "loop forever", &Noop, &EventSink::disabled())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("within 3 reasoning steps"));
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn slash_commands_are_answered_locally() {
    let model = time_model();
    let connector = RecordingConnector::default();
    let mut session = time_only_session(Arc::clone(&model), &connector).await;

    let mut out = Vec::new();
    run_chat(
        &mut session,
        &b"/status\n/tools\n/help\n/nope\nbye\n"[..],
        &mut out,
        Theme::plain(),
    )
    .await
    .expect("chat loop should end cleanly");
    session.shutdown().await.expect("shutdown succeeds");

    let output = String::from_utf8(out).unwrap();
    assert!(output.contains("Model: scripted-model"));
    assert!(output.contains("Turns: 0"));
    assert!(output.contains("- use_time_agent (time agent)"));
    assert!(output.contains("Chat commands:"));
    assert!(output.contains("Unknown command '/nope'. Use /help."));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn sydney_time_question_end_to_end() {
    let model = time_model();
    let connector = RecordingConnector::default();
    let mut session = time_only_session(Arc::clone(&model), &connector).await;
    assert_eq!(session.delegation_names(), vec!["use_time_agent"]);

    let mut out = Vec::new();
    let exit = run_chat(
        &mut session,
        &b"What time is it in Sydney?\nexit\n"[..],
        &mut out,
        Theme::plain(),
    )
    .await
    .expect("chat loop should end cleanly");
    session.shutdown().await.expect("shutdown succeeds");

    let output = String::from_utf8(out).unwrap();
    assert_eq!(exit, ChatExit::Keyword);
    assert!(output.contains("[Assistant]\n"));
    assert!(output.contains("→ time agent: What time is it in Sydney?\n"));
    assert!(output.contains("It is 3:00 pm in Sydney.\n"));
    assert!(!output.contains("[Error]"));
    assert!(output.ends_with("Goodbye!\n"));

    let delegations = model
        .requests()
        .iter()
        .filter(|req| is_controller(req))
        .flat_map(|req| req.messages.iter())
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect::<std::collections::BTreeSet<_>>();
    assert_eq!(delegations.len(), 1);

    let connections = connector.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].call_count(), 1);
    assert_eq!(connections[0].close_count(), 1);
    assert_eq!(session.status().turns, 1);
}

#[tokio::test]
async fn turn_errors_print_one_line_and_the_loop_continues() {
    let model = ScriptedModel::new(|req| {
        if last_user_text(req) == "fail" {
            return Err(anyhow::anyhow!("stream decode failed"));
        }
        Ok(vec![text("fine\n")])
    });
    let connector = RecordingConnector::default();
    let mut session = time_only_session(model, &connector).await;

    let mut out = Vec::new();
    run_chat(&mut session, &b"fail\nok\nquit\n"[..], &mut out, Theme::plain())
        .await
        .expect("chat loop should end cleanly");
    session.shutdown().await.expect("shutdown succeeds");

    let output = String::from_utf8(out).unwrap();
    assert_eq!(
        output.matches("[Error] An error occurred: stream decode failed").count(),
        1
    );
    assert!(output.contains("fine\n"));
    assert_eq!(session.status().turns, 1);
}

#[tokio::test]
async fn interrupt_mid_session_closes_every_connection_once() {
    let (fire, fired) = tokio::sync::oneshot::channel::<()>();
    let fire = Mutex::new(Some(fire));
    let model = ScriptedModel::new(move |req| {
        if is_controller(req) && after_tool_result(req) {
            if let Some(fire) = fire.lock().expect("fire lock").take() {
                let _ = fire.send(());
            }
            return Ok(vec![text("It is 3:00 pm.\n")]);
        }
        if is_controller(req) {
            return Ok(vec![tool_call("call_1", "use_time_agent", json!({ "query": "Sydney" }))]);
        }
        Ok(vec![text("15:00")])
    });
    let connector = RecordingConnector::default();
    let mut cfg = base_cfg();
    cfg.capabilities = CapabilitySelection::Explicit(vec!["time".into(), "search".into()]);
    let mut session = assemble(&cfg, &registry(&[("BRAVE_API_KEY", "brave")]), &connector, model)
        .await
        .expect("session should assemble");

    // The writer stays open, so the loop is still waiting for input when
    // the interrupt arrives.
    let (mut writer, reader) = tokio::io::duplex(256);
    tokio::io::AsyncWriteExt::write_all(&mut writer, b"What time is it in Sydney?\n")
        .await
        .expect("input should write");

    let mut out = Vec::new();
    let exit = run_session(
        &mut session,
        tokio::io::BufReader::new(reader),
        &mut out,
        Theme::plain(),
        async move {
            let _ = fired.await;
            Ok::<(), std::io::Error>(())
        },
    )
    .await
    .expect("interrupted session should end cleanly");

    assert_eq!(exit, ChatExit::Interrupted);
    assert!(String::from_utf8(out).unwrap().ends_with("Goodbye!\n"));
    assert_eq!(connector.closes(), vec!["search", "time"]);

    session.shutdown().await.expect("second shutdown is a no-op");
    for connection in connector.connections() {
        assert_eq!(connection.close_count(), 1, "{} closed once", connection.name);
    }
    drop(writer);
}

#[tokio::test]
async fn invalid_utf8_input_does_not_end_the_session() {
    let model = time_model();
    let connector = RecordingConnector::default();
    let mut session = time_only_session(Arc::clone(&model), &connector).await;

    let mut out = Vec::new();
    let exit = run_session(
        &mut session,
        &b"caf\xe9 time?\nWhat time is it in Sydney?\nexit\n"[..],
        &mut out,
        Theme::plain(),
        std::future::pending(),
    )
    .await
    .expect("chat loop should survive a malformed line");

    assert_eq!(exit, ChatExit::Keyword);
    let questions = model
        .requests()
        .iter()
        .filter(|req| is_controller(req) && !after_tool_result(req))
        .map(last_user_text)
        .collect::<Vec<_>>();
    assert_eq!(questions, vec!["caf\u{FFFD} time?", "What time is it in Sydney?"]);
    assert!(!String::from_utf8(out).unwrap().contains("[Error]"));
    assert_eq!(connector.closes(), vec!["time"]);
}

#[tokio::test]
async fn specialist_failures_name_the_agent_once() {
    let model = ScriptedModel::new(|req| {
        if is_controller(req) {
            if after_tool_result(req) {
                return Ok(vec![text(&last_text(req))]);
            }
            return Ok(vec![tool_call("call_1", "use_time_agent", json!({ "query": "now" }))]);
        }
        Err(anyhow::anyhow!("upstream 500"))
    });
    let connector = RecordingConnector::default();
    let mut session = time_only_session(model, &connector).await;

    let outcome = session
        .handle("What time is it?", &EventSink::disabled())
        .await
        .expect("turn survives the delegation failure");

    assert_eq!(outcome.reply, "error: time agent failed: upstream 500");
    session.shutdown().await.expect("shutdown succeeds");
}
