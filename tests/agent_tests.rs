//! Integration tests for agent admission, lifecycle and the task loop
//!
//! Every outbound dependency is faked (see `common`), so these run without
//! Ollama, GPUs or any pentest tooling installed.

mod common;

use std::time::Duration;

use agentvisor::agent::{Admission, AgentStatus, DownloadStatus, ResourceKind, TurnRole, VramSource};
use agentvisor::ollama::{BackendError, ModelReply};
use agentvisor::{CoreError, CreateAgentRequest, ErrorKind, Playground, TaskRequest, ToolKind};
use common::{model, tool_call, FixedMonitor, Harness};
use serde_json::json;

fn request(role: &str, model: &str) -> CreateAgentRequest {
    CreateAgentRequest {
        role: role.to_string(),
        model: model.to_string(),
        ..Default::default()
    }
}

async fn wait_for_status(playground: &Playground, id: &str, status: AgentStatus) {
    for _ in 0..100 {
        if playground.get_agent(id).unwrap().status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("agent {id} never reached {status}");
}

// ─────────────────────────────────────────────────────────────────────────────
// Admission and creation
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_invalid_role_leaves_registry_untouched() {
    let h = Harness::new();
    let err = h.playground.create_agent(request("wizard", "small")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRole);
    assert!(h.playground.list_agents().is_empty());
    assert_eq!(h.downloader.pulls(), 0);
}

#[tokio::test]
async fn test_unknown_model_is_unavailable() {
    let h = Harness::new();
    let err = h.playground.create_agent(request("recon", "gpt-9")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    assert!(h.playground.list_agents().is_empty());
}

#[tokio::test]
async fn test_vram_deny_starts_no_download() {
    let h = Harness::new();

    let admission = h.playground.request_admission("recon", "huge").await.unwrap();
    match admission {
        Admission::Deny { exceeded, reason } => {
            assert_eq!(exceeded, vec![ResourceKind::Vram]);
            assert!(reason.contains("VRAM"));
        }
        other => panic!("expected deny, got {other:?}"),
    }

    let err = h.playground.create_agent(request("recon", "huge")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientResources);
    assert!(h.playground.list_agents().is_empty());
    assert_eq!(h.downloader.pulls(), 0);
}

#[tokio::test]
async fn test_admission_is_strict_at_the_boundary() {
    // 13 GB used + 3 GB declared == 16 GB total: denied
    let h = Harness::build(FixedMonitor::new(Some((4.0, 32.0)), Some((13.0, 16.0)), None), |_| {});
    let admission = h.playground.request_admission("recon", "small").await.unwrap();
    assert!(matches!(admission, Admission::Deny { .. }));
}

#[tokio::test]
async fn test_unknown_vram_is_estimated_from_live_agents() {
    // No GPU telemetry: 16 GB assumed, each distinct model in use counts once
    let h = Harness::build(FixedMonitor::new(Some((4.0, 64.0)), None, None), |c| {
        c.models = vec![
            model("alpha", 4.0, 7.0, true),
            model("beta", 4.0, 7.0, true),
            model("gamma", 4.0, 3.0, true),
        ];
    });
    h.playground.create_agent(request("recon", "alpha")).await.unwrap();
    h.playground.create_agent(request("recon", "beta")).await.unwrap();

    // 7 + 7 + 3 >= 16
    let err = h.playground.create_agent(request("recon", "gamma")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientResources);

    let resources = h.playground.get_resources().await;
    let vram = resources.snapshot.vram.unwrap();
    assert_eq!(vram.used_gb, 14.0);
    assert_eq!(vram.total_gb, 16.0);
    assert_eq!(resources.vram_source, VramSource::Estimated);
    assert_eq!(resources.models_in_use, vec!["alpha".to_string(), "beta".to_string()]);
}

#[tokio::test]
async fn test_downloaded_model_admits_ready_agent() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    assert_eq!(agent.status, AgentStatus::Ready);
    assert_eq!(
        agent.allowed_tools,
        vec![ToolKind::Nmap, ToolKind::Gobuster, ToolKind::Browser]
    );
    assert_eq!(h.downloader.pulls(), 0);
}

#[tokio::test]
async fn test_missing_model_downloads_then_agent_is_ready() {
    let h = Harness::new();
    *h.downloader.delay.lock() = Duration::from_millis(50);

    assert_eq!(
        h.playground.request_admission("recon", "fresh").await.unwrap(),
        Admission::AdmitWithDownload
    );

    let agent = h.playground.create_agent(request("recon", "fresh")).await.unwrap();
    assert_eq!(agent.status, AgentStatus::Initializing);

    wait_for_status(&h.playground, &agent.id, AgentStatus::Ready).await;
    assert!(h.playground.model_status("fresh").unwrap().descriptor.downloaded);
    assert_eq!(h.downloader.pulls(), 1);
}

#[tokio::test]
async fn test_failed_download_puts_agent_in_error() {
    let h = Harness::new();
    *h.downloader.fail.lock() = true;

    let agent = h.playground.create_agent(request("recon", "fresh")).await.unwrap();
    wait_for_status(&h.playground, &agent.id, AgentStatus::Error).await;
    assert!(!h.playground.model_status("fresh").unwrap().descriptor.downloaded);
}

#[tokio::test]
async fn test_concurrent_creates_share_one_download() {
    let h = Harness::new();
    *h.downloader.delay.lock() = Duration::from_millis(100);

    let (a, b) = tokio::join!(
        h.playground.create_agent(request("recon", "fresh")),
        h.playground.create_agent(request("exploit", "fresh")),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    // An explicit request while the pull is running does not start another
    assert_eq!(
        h.playground.download_model("fresh").await.unwrap(),
        DownloadStatus::InProgress
    );

    wait_for_status(&h.playground, &a.id, AgentStatus::Ready).await;
    wait_for_status(&h.playground, &b.id, AgentStatus::Ready).await;
    assert_eq!(h.downloader.pulls(), 1);

    assert_eq!(
        h.playground.download_model("fresh").await.unwrap(),
        DownloadStatus::AlreadyAvailable
    );
    assert_eq!(h.downloader.pulls(), 1);
}

#[tokio::test]
async fn test_auto_download_disabled_rejects_missing_model() {
    let h = Harness::with_config(|c| c.auto_download = false);
    let err = h.playground.create_agent(request("recon", "fresh")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
    assert_eq!(h.downloader.pulls(), 0);
}

#[tokio::test]
async fn test_custom_tools_outside_whitelist_are_forbidden() {
    let h = Harness::new();
    let err = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["nmap".into(), "command".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["hydra".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert!(h.playground.list_agents().is_empty());
}

#[tokio::test]
async fn test_custom_prompt_replaces_role_prompt() {
    let h = Harness::new();
    let agent = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_prompt: Some("You only speak in haiku.".into()),
            ..request("custom", "small")
        })
        .await
        .unwrap();

    h.playground.run_task(&agent.id, "hello").await.unwrap();
    let sent = h.backend.requests.lock()[0].clone();
    assert_eq!(sent[0].role, "system");
    assert_eq!(sent[0].content, "You only speak in haiku.");
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_missing_agent_is_not_found() {
    let h = Harness::new();
    let err = h.playground.delete_agent("no-such-agent").await.unwrap_err();
    assert!(matches!(err, CoreError::AgentNotFound(_)));
}

#[tokio::test]
async fn test_delete_unloads_model_only_when_unused() {
    let h = Harness::new();
    let a = h.playground.create_agent(request("recon", "small")).await.unwrap();
    let b = h.playground.create_agent(request("analysis", "small")).await.unwrap();

    h.playground.delete_agent(&a.id).await.unwrap();
    assert!(h.backend.unloaded.lock().is_empty());

    h.playground.delete_agent(&b.id).await.unwrap();
    assert_eq!(*h.backend.unloaded.lock(), vec!["small".to_string()]);
    assert_eq!(h.playground.get_agent(&b.id).unwrap_err().kind(), ErrorKind::AgentNotFound);
}

// ─────────────────────────────────────────────────────────────────────────────
// Task loop
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transcript_order_user_tool_assistant() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    h.backend.push(tool_call("nmap", json!({"target": "10.0.0.5"})));
    h.backend.push(ModelReply::text("Port 22 is open."));

    let result = h.playground.run_task(&agent.id, "Scan 10.0.0.5").await.unwrap();

    assert!(result.success);
    assert!(!result.limit_reached);
    assert_eq!(result.response, "Port 22 is open.");
    let roles: Vec<TurnRole> = result.new_turns.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![TurnRole::User, TurnRole::Tool, TurnRole::Assistant]);
    assert_eq!(result.tool_invocations.len(), 1);
    assert!(result.tool_invocations[0].success);
    assert_eq!(result.tokens_used, 10);

    let spec = h.launcher.last().unwrap();
    assert_eq!(spec.program, "nmap");
    assert_eq!(spec.args.last().map(String::as_str), Some("10.0.0.5"));
    assert_eq!(spec.working_dir, h.workspace.path());

    // The tool result goes back to the model before the final answer
    let second = h.backend.requests.lock()[1].clone();
    assert_eq!(second.last().unwrap().role, "tool");
    assert!(second.last().unwrap().content.starts_with("[tool:nmap exit=0"));

    let info = h.playground.get_agent(&agent.id).unwrap();
    assert_eq!(info.status, AgentStatus::Ready);
    assert_eq!(info.conversation_length, 3);
    assert_eq!(info.tasks_completed, 1);
    assert_eq!(info.total_tokens_used, 10);
}

#[tokio::test]
async fn test_raw_command_is_forbidden_without_spawning() {
    let h = Harness::new();
    let agent = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["nmap".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap();

    h.backend.push(tool_call("command", json!({"cmd": "cat /etc/shadow"})));
    h.backend.push(ModelReply::text("I cannot run that."));

    let result = h.playground.run_task(&agent.id, "read the shadow file").await.unwrap();

    assert_eq!(h.launcher.spawned(), 0);
    let invocation = &result.tool_invocations[0];
    assert!(!invocation.success);
    assert_eq!(invocation.error_kind, Some(ErrorKind::Forbidden));
    assert!(result.new_turns[1].content.contains("error=forbidden"));
}

#[tokio::test]
async fn test_ungranted_tool_is_forbidden_even_when_whitelisted() {
    let h = Harness::with_config(|c| {
        c.allow_raw_command = true;
        c.tool_whitelist.push(ToolKind::Command);
    });
    let agent = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["nmap".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap();

    let result = h
        .playground
        .execute_task(
            &agent.id,
            TaskRequest::ToolUse {
                tool: "command".into(),
                params: json!({"cmd": "id"}),
            },
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.tool_invocations[0].error_kind, Some(ErrorKind::Forbidden));
    assert_eq!(h.launcher.spawned(), 0);
}

#[tokio::test]
async fn test_unknown_tool_from_model_is_rejected_turn() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    h.backend.push(tool_call("hydra", json!({"target": "10.0.0.5"})));
    h.backend.push(ModelReply::text("ok"));

    let result = h.playground.run_task(&agent.id, "brute force ssh").await.unwrap();
    assert!(result.success);
    assert_eq!(result.new_turns[1].role, TurnRole::Tool);
    assert_eq!(result.new_turns[1].success, Some(false));
    assert_eq!(h.launcher.spawned(), 0);
}

#[tokio::test]
async fn test_tool_call_limit_is_enforced() {
    let h = Harness::with_config(|c| c.max_tool_rounds = 2);
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    for _ in 0..4 {
        h.backend.push(tool_call("nmap", json!({"target": "10.0.0.5"})));
    }

    let result = h.playground.run_task(&agent.id, "scan forever").await.unwrap();

    assert!(!result.success);
    assert!(result.limit_reached);
    assert_eq!(h.launcher.spawned(), 2);
    assert_eq!(result.tool_invocations.len(), 2);
    let last = result.new_turns.last().unwrap();
    assert_eq!(last.role, TurnRole::Assistant);
    assert!(last.content.contains("limit"));

    let info = h.playground.get_agent(&agent.id).unwrap();
    assert_eq!(info.status, AgentStatus::Ready);
    assert_eq!(info.tasks_completed, 0);
}

#[tokio::test]
async fn test_tool_timeout_is_a_failed_turn() {
    let h = Harness::new();
    *h.launcher.timeout.lock() = true;
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    h.backend.push(tool_call("nmap", json!({"target": "10.0.0.5"})));
    h.backend.push(ModelReply::text("The scan timed out."));

    let result = h.playground.run_task(&agent.id, "scan").await.unwrap();
    assert!(result.success);
    assert_eq!(result.tool_invocations[0].error_kind, Some(ErrorKind::Timeout));
    assert!(result.new_turns[1].content.contains("error=timeout"));
}

#[tokio::test]
async fn test_second_concurrent_task_is_busy() {
    let h = Harness::new();
    *h.backend.delay.lock() = Some(Duration::from_millis(200));
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    let playground = h.playground.clone();
    let id = agent.id.clone();
    let first = tokio::spawn(async move { playground.run_task(&id, "first").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.playground.get_agent(&agent.id).unwrap().status, AgentStatus::Busy);

    let err = h.playground.run_task(&agent.id, "second").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentBusy);

    let result = first.await.unwrap().unwrap();
    assert!(result.success);
    let info = h.playground.get_agent(&agent.id).unwrap();
    assert_eq!(info.status, AgentStatus::Ready);
    // Only the first task touched the transcript
    assert_eq!(info.conversation_length, 2);
}

#[tokio::test]
async fn test_clear_history_waits_for_running_task() {
    let h = Harness::new();
    *h.backend.delay.lock() = Some(Duration::from_millis(200));
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    let playground = h.playground.clone();
    let id = agent.id.clone();
    let task = tokio::spawn(async move { playground.run_task(&id, "enumerate").await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = h.playground.clear_history(&agent.id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentBusy);

    task.await.unwrap().unwrap();
    let record = h.playground.get_agent(&agent.id).unwrap();
    assert_eq!(record.conversation_length, 2);

    h.playground.clear_history(&agent.id).unwrap();
    assert_eq!(h.playground.get_agent(&agent.id).unwrap().conversation_length, 0);
}

#[tokio::test]
async fn test_cancelled_task_releases_agent() {
    let h = Harness::new();
    *h.backend.delay.lock() = Some(Duration::from_secs(5));
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_millis(50), h.playground.run_task(&agent.id, "hang")).await;
    assert!(outcome.is_err());
    assert_eq!(h.playground.get_agent(&agent.id).unwrap().status, AgentStatus::Ready);
}

#[tokio::test]
async fn test_backend_failure_moves_agent_to_error_and_allows_retry() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    h.backend.push_err(BackendError::EmptyResponse);
    let err = h.playground.run_task(&agent.id, "hello").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    assert_eq!(h.playground.get_agent(&agent.id).unwrap().status, AgentStatus::Error);

    let result = h.playground.run_task(&agent.id, "hello again").await.unwrap();
    assert!(result.success);
    assert_eq!(h.playground.get_agent(&agent.id).unwrap().status, AgentStatus::Ready);
}

#[tokio::test]
async fn test_history_window_limits_context() {
    let h = Harness::with_config(|c| c.history_window = 2);
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    for i in 0..3 {
        h.playground.run_task(&agent.id, &format!("message {i}")).await.unwrap();
    }

    let last = h.backend.requests.lock().last().cloned().unwrap();
    // system prompt + 2 persisted turns + new user message
    assert_eq!(last.len(), 4);
    assert_eq!(last[3].content, "message 2");
    assert_eq!(last[1].content, "message 1");
}

#[tokio::test]
async fn test_chat_context_is_sent_to_model() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    let task: TaskRequest = serde_json::from_value(json!({
        "type": "chat",
        "content": "what next?",
        "context": {"target": "10.0.0.5"}
    }))
    .unwrap();
    h.playground.execute_task(&agent.id, task).await.unwrap();

    let sent = h.backend.requests.lock()[0].clone();
    assert_eq!(sent[1].role, "system");
    assert!(sent[1].content.contains("target: 10.0.0.5"));
}

#[tokio::test]
async fn test_analysis_task_wraps_data() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("analysis", "small")).await.unwrap();

    h.playground
        .execute_task(
            &agent.id,
            TaskRequest::Analysis {
                data: "22/tcp open ssh".into(),
                format: "text".into(),
            },
        )
        .await
        .unwrap();

    let sent = h.backend.requests.lock()[0].clone();
    let user = sent.last().unwrap();
    assert!(user.content.starts_with("Analyze the following text data"));
    assert!(user.content.contains("22/tcp open ssh"));
}

#[tokio::test]
async fn test_direct_tool_use_skips_model() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    let result = h
        .playground
        .execute_task(
            &agent.id,
            TaskRequest::ToolUse {
                tool: "gobuster".into(),
                params: json!({"url": "http://10.0.0.5/"}),
            },
        )
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(h.backend.calls(), 0);
    assert_eq!(h.launcher.last().unwrap().program, "gobuster");
    assert_eq!(result.new_turns.len(), 2);
}

async fn use_tool(h: &Harness, agent_id: &str, tool: &str, params: serde_json::Value) -> agentvisor::TaskResult {
    h.playground
        .execute_task(
            agent_id,
            TaskRequest::ToolUse {
                tool: tool.into(),
                params,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_files_tool_round_trips_inside_workspace() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("analysis", "small")).await.unwrap();

    let saved = use_tool(&h, &agent.id, "files", json!({"action": "save", "filename": "findings.md", "content": "ssh open"})).await;
    assert!(saved.success, "{}", saved.response);
    assert_eq!(
        std::fs::read_to_string(h.workspace.path().join("findings.md")).unwrap(),
        "ssh open"
    );

    let read = use_tool(&h, &agent.id, "files", json!({"action": "read", "filename": "findings.md"})).await;
    assert!(read.success);
    assert!(read.response.contains("ssh open"));

    let listed = use_tool(&h, &agent.id, "files", json!({"action": "list"})).await;
    assert!(listed.response.contains("findings.md"));

    for name in ["../escape.md", "/etc/passwd", ".bashrc", "a/b.txt"] {
        let result = use_tool(&h, &agent.id, "files", json!({"action": "save", "filename": name, "content": "x"})).await;
        assert!(!result.success, "{name} was accepted");
        assert_eq!(result.tool_invocations[0].error_kind, Some(ErrorKind::ExecutionError));
    }
    assert!(!h.workspace.path().parent().unwrap().join("escape.md").exists());
    assert_eq!(h.launcher.spawned(), 0);
}

#[tokio::test]
async fn test_python_tool_needs_raw_command_flag() {
    let h = Harness::with_config(|c| c.tool_whitelist.push(ToolKind::Python));
    let agent = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["python".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap();

    let result = use_tool(&h, &agent.id, "python", json!({"script": "recon.py"})).await;
    assert!(!result.success);
    assert_eq!(result.tool_invocations[0].error_kind, Some(ErrorKind::Forbidden));
    assert_eq!(h.launcher.spawned(), 0);
}

#[tokio::test]
async fn test_python_tool_runs_workspace_script_with_input() {
    let h = Harness::with_config(|c| {
        c.allow_raw_command = true;
        c.tool_whitelist.push(ToolKind::Python);
    });
    let agent = h
        .playground
        .create_agent(CreateAgentRequest {
            custom_tools: Some(vec!["python".into()]),
            ..request("custom", "small")
        })
        .await
        .unwrap();

    let result = use_tool(
        &h,
        &agent.id,
        "python",
        json!({"script": "decode.py", "args": ["--mode", "b64"], "input": "aGk="}),
    )
    .await;
    assert!(result.success, "{}", result.response);

    let spec = h.launcher.last().unwrap();
    assert_eq!(spec.program, "python3");
    assert_eq!(
        spec.args,
        vec![h.workspace.path().join("decode.py").display().to_string(), "--mode".into(), "b64".into()]
    );
    assert_eq!(spec.stdin.as_deref(), Some("aGk="));

    let escaped = use_tool(&h, &agent.id, "python", json!({"script": "../../tmp/x.py"})).await;
    assert!(!escaped.success);
    assert_eq!(h.launcher.spawned(), 1);
}

#[tokio::test]
async fn test_nmap_option_injection_never_reaches_launcher() {
    let h = Harness::new();
    let agent = h.playground.create_agent(request("recon", "small")).await.unwrap();

    for flags in [
        "-iL /etc/shadow",
        "-oN /etc/cron.d/x",
        "-oX /tmp/out.xml",
        "--script=/tmp/x.nse",
        "--script vuln",
        "--datadir /tmp/evil",
        "-sV --resume /tmp/log",
    ] {
        let result = use_tool(&h, &agent.id, "nmap", json!({"target": "10.0.0.5", "flags": flags})).await;
        assert!(!result.success, "flags {flags:?} were accepted");
    }
    assert_eq!(h.launcher.spawned(), 0);

    let result = use_tool(
        &h,
        &agent.id,
        "nmap",
        json!({"target": "10.0.0.5", "flags": "-sS -p 22,80 -T4 --top-ports=100", "output_file": "../../etc/scan.txt"}),
    )
    .await;
    assert!(result.success, "{}", result.response);
    let spec = h.launcher.last().unwrap();
    let report = h.workspace.path().join("scan.txt").display().to_string();
    assert_eq!(
        spec.args,
        vec!["-sS", "-p", "22,80", "-T4", "--top-ports", "100", "-oN", report.as_str(), "10.0.0.5"]
    );
}

#[tokio::test]
async fn test_clear_history_and_stats() {
    let h = Harness::new();
    let a = h.playground.create_agent(request("recon", "small")).await.unwrap();
    h.playground.create_agent(request("analysis", "small")).await.unwrap();

    h.playground.run_task(&a.id, "hello").await.unwrap();
    assert_eq!(h.playground.get_agent(&a.id).unwrap().conversation_length, 2);

    h.playground.clear_history(&a.id).unwrap();
    assert_eq!(h.playground.get_agent(&a.id).unwrap().conversation_length, 0);

    let stats = h.playground.agent_stats();
    assert_eq!(stats.total_created, 2);
    assert_eq!(stats.active_agents, 2);
    assert_eq!(stats.agents_by_role["recon"], 1);
    assert_eq!(stats.agents_by_role["exploit"], 0);
    assert_eq!(stats.agents_by_status["ready"], 2);
}

#[tokio::test]
async fn test_broadcast_filters_by_role() {
    let h = Harness::new();
    let recon = h.playground.create_agent(request("recon", "small")).await.unwrap();
    h.playground.create_agent(request("analysis", "small")).await.unwrap();

    let all = h.playground.broadcast("status?", None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|o| o.error.is_none()));

    let only_recon = h
        .playground
        .broadcast("status?", Some(&["recon".to_string()]))
        .await
        .unwrap();
    assert_eq!(only_recon.len(), 1);
    assert_eq!(only_recon[0].agent_id, recon.id);

    let err = h
        .playground
        .broadcast("status?", Some(&["wizard".to_string()]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRole);
}

#[tokio::test]
async fn test_shutdown_removes_all_agents() {
    let h = Harness::new();
    h.playground.create_agent(request("recon", "small")).await.unwrap();
    h.playground.create_agent(request("exploit", "small")).await.unwrap();

    h.playground.shutdown().await;
    assert!(h.playground.list_agents().is_empty());
}

#[tokio::test]
async fn test_calculate_requirements() {
    let h = Harness::new();
    let req = h
        .playground
        .calculate_requirements(&["small".to_string(), "fresh".to_string(), "nope".to_string()])
        .await;

    assert_eq!(req.total_ram_gb, 8.0);
    assert_eq!(req.total_vram_gb, 6.0);
    assert!(req.can_allocate);
    assert!(req.warnings.iter().any(|w| w.contains("nope")));
}
