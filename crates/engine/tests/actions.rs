//! Button decision-table tests: plain child commands, remix toggles and
//! fire-and-forget actions.

mod common;

use std::time::Duration;

use chrono::Utc;

use atelier_core::submit::SubmitCode;
use atelier_core::task::{BackendFamily, BotFamily, Task, TaskAction, TaskStatus};
use atelier_engine::{ActionRequest, EngineConfig, VideoRequest};
use atelier_gateway::MessageKind;
use atelier_store::TaskRepository;

use common::{event, fast_account, with_attachment, with_interaction, with_nonce, Harness};

const WAIT: Duration = Duration::from_secs(30);

/// A finished imagine grid to click buttons on.
async fn finished_grid(harness: &Harness, channel: &str) -> Task {
    let mut parent = Task::new(
        "16980000000000000001".to_string(),
        TaskAction::Imagine,
        BotFamily::Mj,
        BackendFamily::Chat,
    );
    parent.status = TaskStatus::Success;
    parent.prompt = Some("a red cube".to_string());
    parent.prompt_en = Some("a red cube".to_string());
    parent.instance_id = Some(channel.to_string());
    parent.image_url = Some("https://cdn.example.com/att/user_a_red_cube_GRID.png".to_string());
    parent.runtime.message_id = Some("msg-grid".to_string());
    parent.runtime.message_hash = Some("GRID".to_string());
    parent.runtime.final_prompt = Some("a red cube".to_string());
    parent.submit_time = Some(Utc::now());
    TaskRepository::save(harness.store.as_ref(), &parent)
        .await
        .unwrap();
    parent
}

#[tokio::test(start_paused = true)]
async fn upsample_button_spawns_an_upscale_child() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 2, 2)).await;
    let parent = finished_grid(&harness, "chan-a").await;

    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: parent.id.clone(),
            custom_id: "MJ::JOB::upsample::2::GRID".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let child_id = result.result.clone().expect("child id");

    let child = harness.task(&child_id).await;
    assert_eq!(child.action, TaskAction::Upscale);
    assert_eq!(child.parent_id.as_deref(), Some(parent.id.as_str()));
    assert_eq!(child.bot_family, parent.bot_family);
    assert_eq!(child.backend_family, parent.backend_family);
    assert_eq!(child.instance_id.as_deref(), Some("chan-a"));

    harness.wait_call(&sender, "upscale:msg-grid:2:GRID", WAIT).await;
}

#[tokio::test(start_paused = true)]
async fn variation_without_remix_issues_a_plain_command() {
    let harness = Harness::new(EngineConfig::default());
    // Remix off: the button click is a direct queued command, no window.
    let sender = harness.add_account(fast_account("chan-a", 2, 2)).await;
    let parent = finished_grid(&harness, "chan-a").await;

    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: parent.id.clone(),
            custom_id: "MJ::JOB::variation::3::GRID".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let child = harness.task(result.result.as_deref().unwrap()).await;
    assert_eq!(child.action, TaskAction::Variation);
    assert_ne!(child.status, TaskStatus::Modal);

    harness.wait_call(&sender, "variation:msg-grid:3:GRID", WAIT).await;
    assert!(!sender.has_call("modal:"));
}

#[tokio::test(start_paused = true)]
async fn remix_auto_submit_runs_both_phases() {
    let harness = Harness::new(EngineConfig::default());
    let mut account = fast_account("chan-a", 2, 2);
    account.mj_remix_on = true;
    account.remix_auto_submit = true;
    let sender = harness.add_account(account).await;
    let parent = finished_grid(&harness, "chan-a").await;

    // Auto-submit skips the window handoff and answers like a plain submit.
    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: parent.id.clone(),
            custom_id: "MJ::JOB::variation::2::GRID".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let child_id = result.result.clone().expect("child id");
    let nonce = harness.task(&child_id).await.runtime.nonce.clone().unwrap();

    // Phase 1 clicks the variation component on the parent grid.
    harness
        .wait_call(&sender, "action:msg-grid:MJ::JOB::variation::2::GRID", WAIT)
        .await;
    harness
        .correlator
        .on_event(with_interaction(
            with_nonce(
                event("modal-7", "chan-a", MessageKind::ModalCreate, ""),
                &nonce,
            ),
            "inter-7",
        ))
        .await;

    // Phase 2 submits the rewritten remix id inside the window.
    harness
        .wait_call(&sender, "modal:modal-7:MJ::RemixModal::GRID::2::0", WAIT)
        .await;
    let child = harness.task(&child_id).await;
    assert_eq!(
        child.runtime.remix_custom_id.as_deref(),
        Some("MJ::RemixModal::GRID::2::0")
    );
}

#[tokio::test(start_paused = true)]
async fn redelivered_reroll_reply_is_dropped() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 2, 2)).await;
    let parent = finished_grid(&harness, "chan-a").await;

    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: parent.id.clone(),
            custom_id: "MJ::JOB::reroll::0::GRID::SOLO".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let child_id = result.result.clone().expect("child id");
    harness.wait_call(&sender, "reroll:msg-grid:GRID", WAIT).await;

    let reply = |id: &str| {
        with_attachment(
            event(
                id,
                "chan-a",
                MessageKind::Create,
                "**a red cube** - <@111> (fast)",
            ),
            "https://cdn.example.com/att/user_a_red_cube_RE1.png",
        )
    };
    harness.correlator.on_event(reply("msg-r1")).await;
    let first = harness.wait_status(&child_id, TaskStatus::Success, WAIT).await;
    assert_eq!(first.runtime.message_hash.as_deref(), Some("RE1"));
    let snapshot = serde_json::to_string(&first).unwrap();

    // The upstream redelivers the same reply under a fresh event id; the
    // event-id dedup cannot catch it, the per-task guard does.
    harness.correlator.on_event(reply("msg-r2")).await;
    let second = harness.task(&child_id).await;
    assert_eq!(serde_json::to_string(&second).unwrap(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn bookmark_is_fire_and_forget() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 2, 2)).await;
    let parent = finished_grid(&harness, "chan-a").await;

    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: parent.id.clone(),
            custom_id: "MJ::BOOKMARK::toggle".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert_eq!(result.code, SubmitCode::Success);
    assert!(result.result.is_none(), "no child task is created");

    harness
        .wait_call(&sender, "action:msg-grid:MJ::BOOKMARK::toggle", WAIT)
        .await;
}

#[tokio::test(start_paused = true)]
async fn video_honors_the_config_gate() {
    let harness = Harness::new(EngineConfig::default());
    let _sender = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let result = harness
        .orchestrator
        .submit_video(VideoRequest {
            prompt: "a running fox".to_string(),
            ..Default::default()
        })
        .await;
    assert_eq!(result.code, SubmitCode::ValidationError);

    let enabled = Harness::new(EngineConfig {
        enable_video: true,
        ..Default::default()
    });
    let sender = enabled.add_account(fast_account("chan-a", 2, 2)).await;
    let result = enabled
        .orchestrator
        .submit_video(VideoRequest {
            prompt: "a running fox".to_string(),
            ..Default::default()
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let task = enabled.task(result.result.as_deref().unwrap()).await;
    assert_eq!(task.action, TaskAction::Video);

    enabled.wait_call(&sender, "video:low:a running fox", WAIT).await;
}

#[tokio::test(start_paused = true)]
async fn action_on_missing_parent_is_not_found() {
    let harness = Harness::new(EngineConfig::default());
    let _sender = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let result = harness
        .orchestrator
        .submit_action(ActionRequest {
            task_id: "nope".to_string(),
            custom_id: "MJ::JOB::upsample::1::GRID".to_string(),
            chat_instance_id: None,
        })
        .await;
    assert_eq!(result.code, SubmitCode::NotFound);
}
