//! End-to-end pipeline tests: submit -> dispatch -> correlate -> terminal.

mod common;

use std::time::Duration;

use atelier_core::banned::KeywordSet;
use atelier_core::submit::SubmitCode;
use atelier_core::task::{AccountFilter, SpeedMode, TaskStatus};
use atelier_engine::{EngineConfig, ImagineRequest};
use atelier_gateway::MessageKind;
use atelier_store::DictionaryRepository;

use common::{event, fast_account, with_attachment, with_grid_buttons, with_nonce, Harness};

const WAIT: Duration = Duration::from_secs(30);

fn imagine(prompt: &str) -> ImagineRequest {
    ImagineRequest {
        prompt: prompt.to_string(),
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn imagine_happy_path_prefers_bigger_idle_pool() {
    let harness = Harness::new(EngineConfig::default());
    let mut a = fast_account("chan-a", 2, 2);
    a.weight = 2;
    a.sort = 1;
    let mut b = fast_account("chan-b", 1, 1);
    b.weight = 1;
    b.sort = 2;
    let sender_a = harness.add_account(a).await;
    let _sender_b = harness.add_account(b).await;

    let result = harness
        .orchestrator
        .submit_imagine(ImagineRequest {
            mode: Some(SpeedMode::Fast),
            ..imagine("a red cube")
        })
        .await;
    assert_eq!(result.code, SubmitCode::Success, "{}", result.description);
    let task_id = result.result.clone().expect("task id");

    // BestWaitIdle picked the larger idle pool.
    let task = harness.task(&task_id).await;
    assert_eq!(task.instance_id.as_deref(), Some("chan-a"));
    assert_eq!(task.status, TaskStatus::Submitted);
    let nonce = task.runtime.nonce.clone().expect("nonce");

    harness.wait_call(&sender_a, "imagine:a red cube", WAIT).await;
    let task = harness.wait_status(&task_id, TaskStatus::InProgress, WAIT).await;
    assert!(task.start_time.is_some());

    // Placeholder message binds the message id and the final prompt.
    harness
        .correlator
        .on_event(with_nonce(
            event(
                "msg-1",
                "chan-a",
                MessageKind::Create,
                "**a red cube** - <@111> (Waiting to start)",
            ),
            &nonce,
        ))
        .await;
    assert_eq!(
        harness.task(&task_id).await.progress.as_deref(),
        Some("0%")
    );

    // Progress edit.
    harness
        .correlator
        .on_event(event(
            "msg-1",
            "chan-a",
            MessageKind::Update,
            "**a red cube** - <@111> (50%) (fast)",
        ))
        .await;
    assert_eq!(
        harness.task(&task_id).await.progress.as_deref(),
        Some("50%")
    );

    // Final grid on a fresh message id, correlated by prompt.
    harness
        .correlator
        .on_event(with_grid_buttons(
            with_attachment(
                event(
                    "msg-2",
                    "chan-a",
                    MessageKind::Create,
                    "**a red cube** - <@111> (fast)",
                ),
                "https://cdn.example.com/att/user_a_red_cube_abc-123.png",
            ),
            "abc-123",
        ))
        .await;

    let task = harness.wait_status(&task_id, TaskStatus::Success, WAIT).await;
    assert!(task.image_url.as_deref().is_some_and(|u| !u.is_empty()));
    assert!(task.buttons.len() >= 4, "got {} buttons", task.buttons.len());
    assert_eq!(task.runtime.message_hash.as_deref(), Some("abc-123"));
    assert_eq!(task.runtime.message_id.as_deref(), Some("msg-2"));
    assert_eq!(task.progress.as_deref(), Some("100%"));
}

#[tokio::test(start_paused = true)]
async fn queue_full_and_not_found_paths() {
    let harness = Harness::new(EngineConfig::default());
    let _sender_a = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let pin_a = AccountFilter {
        instance_ids: vec!["chan-a".to_string()],
        ..Default::default()
    };

    // Two tasks grabbed by workers.
    for n in 0..2 {
        let result = harness
            .orchestrator
            .submit_imagine(ImagineRequest {
                filter: pin_a.clone(),
                ..imagine(&format!("fill {n}"))
            })
            .await;
        assert!(result.is_success(), "{}", result.description);
    }
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Two more fill the FAST queue.
    for n in 2..4 {
        let result = harness
            .orchestrator
            .submit_imagine(ImagineRequest {
                filter: pin_a.clone(),
                ..imagine(&format!("fill {n}"))
            })
            .await;
        assert_eq!(result.code, SubmitCode::InQueue, "{}", result.description);
    }

    // A is saturated and no other account exists.
    let result = harness.orchestrator.submit_imagine(imagine("fifth")).await;
    assert_eq!(result.code, SubmitCode::NotFound);

    // A second account absorbs the overflow. It advertises a relax queue
    // too, so a full FAST queue leaves it eligible for selection and the
    // per-mode gate is what reports the overflow.
    let mut b = fast_account("chan-b", 1, 1);
    b.queue_sizes.relax = 1;
    b.allowed_modes = vec![SpeedMode::Fast, SpeedMode::Relax];
    let _sender_b = harness.add_account(b).await;
    let result = harness.orchestrator.submit_imagine(imagine("fifth")).await;
    assert!(result.is_success(), "{}", result.description);
    let task = harness.task(result.result.as_deref().unwrap()).await;
    assert_eq!(task.instance_id.as_deref(), Some("chan-b"));
    tokio::time::sleep(Duration::from_millis(600)).await;

    // ...until its FAST queue is full too: the instance gate reports it.
    let pin_b = AccountFilter {
        instance_ids: vec!["chan-b".to_string()],
        ..Default::default()
    };
    let queued = harness
        .orchestrator
        .submit_imagine(ImagineRequest {
            filter: pin_b.clone(),
            ..imagine("sixth")
        })
        .await;
    assert_eq!(queued.code, SubmitCode::InQueue, "{}", queued.description);

    let full = harness
        .orchestrator
        .submit_imagine(ImagineRequest {
            filter: pin_b,
            ..imagine("seventh")
        })
        .await;
    assert_eq!(full.code, SubmitCode::Failure);
    assert_eq!(full.description, "queue full");
}

#[tokio::test(start_paused = true)]
async fn banned_prompt_reports_offending_word() {
    let harness = Harness::new(EngineConfig::default());
    harness
        .store
        .save_banned(&KeywordSet::new("default", vec!["forbidden".to_string()]))
        .await
        .unwrap();
    let _sender = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let result = harness
        .orchestrator
        .submit_imagine(imagine("a Forbidden tower"))
        .await;
    assert_eq!(result.code, SubmitCode::BannedPrompt);
    assert!(result.description.contains("Forbidden"));
    assert_eq!(result.properties["bannedWord"], "Forbidden");
    assert!(result.result.is_none(), "no task is created");
}

#[tokio::test(start_paused = true)]
async fn domain_miss_retries_without_domain() {
    let config = EngineConfig {
        enable_vertical_domain: true,
        ..Default::default()
    };
    let harness = Harness::new(config);
    harness
        .store
        .save_domain(&KeywordSet::new("anime", vec!["anime".to_string()]))
        .await
        .unwrap();
    // The only account is not tagged with any domain.
    let _sender = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let result = harness
        .orchestrator
        .submit_imagine(imagine("cute anime girl"))
        .await;
    assert!(result.is_success(), "{}", result.description);
    let task = harness.task(result.result.as_deref().unwrap()).await;
    assert_eq!(task.instance_id.as_deref(), Some("chan-a"));
}

#[tokio::test(start_paused = true)]
async fn replayed_terminal_event_is_idempotent() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 2, 2)).await;

    let result = harness.orchestrator.submit_imagine(imagine("a red cube")).await;
    let task_id = result.result.clone().expect("task id");
    harness.wait_call(&sender, "imagine:", WAIT).await;

    let final_event = with_grid_buttons(
        with_attachment(
            event(
                "msg-9",
                "chan-a",
                MessageKind::Create,
                "**a red cube** - <@111> (fast)",
            ),
            "https://cdn.example.com/att/user_a_red_cube_h9.png",
        ),
        "h9",
    );
    harness.correlator.on_event(final_event.clone()).await;
    let first = harness.wait_status(&task_id, TaskStatus::Success, WAIT).await;
    let snapshot = serde_json::to_string(&first).unwrap();

    // Byte-identical replay is dropped before any store write.
    harness.correlator.on_event(final_event).await;
    let second = harness.task(&task_id).await;
    assert_eq!(serde_json::to_string(&second).unwrap(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn cancel_while_queued_sticks() {
    let harness = Harness::new(EngineConfig::default());
    let _sender = harness.add_account(fast_account("chan-a", 1, 2)).await;

    let result = harness.orchestrator.submit_imagine(imagine("to cancel")).await;
    let task_id = result.result.clone().expect("task id");

    let cancelled = harness.orchestrator.cancel_task(&task_id).await;
    assert_eq!(cancelled.code, SubmitCode::Success);
    assert_eq!(harness.task(&task_id).await.status, TaskStatus::Cancel);

    // The worker later drains the queue entry and must not resurrect it.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.task(&task_id).await.status, TaskStatus::Cancel);

    let again = harness.orchestrator.cancel_task(&task_id).await;
    assert_eq!(again.code, SubmitCode::ValidationError);
}

#[tokio::test(start_paused = true)]
async fn upstream_rejection_fails_the_task() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 1, 1)).await;
    sender.script_response("imagine", atelier_core::submit::Message::of(0, "Invalid parameter"));

    let result = harness.orchestrator.submit_imagine(imagine("broken")).await;
    let task_id = result.result.clone().expect("task id");

    let task = harness.wait_status(&task_id, TaskStatus::Failure, WAIT).await;
    assert_eq!(task.fail_reason.as_deref(), Some("Invalid parameter"));
}

#[tokio::test(start_paused = true)]
async fn describe_reply_finishes_with_prompt_lines() {
    let harness = Harness::new(EngineConfig::default());
    let sender = harness.add_account(fast_account("chan-a", 1, 1)).await;

    use base64::Engine as _;
    let image = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(b"png-bytes-here")
    );
    let result = harness
        .orchestrator
        .submit_describe(atelier_engine::DescribeRequest {
            image,
            ..Default::default()
        })
        .await;
    assert!(result.is_success(), "{}", result.description);
    let task_id = result.result.clone().expect("task id");

    harness.wait_call(&sender, "upload:", WAIT).await;
    harness.wait_call(&sender, "describe:uploads/", WAIT).await;
    let nonce = harness.task(&task_id).await.runtime.nonce.clone().unwrap();

    let reply = "1️⃣ a watercolor fox --ar 1:1\n2️⃣ a fox in autumn\n3️⃣ geometric fox\n4️⃣ sleeping fox";
    harness
        .correlator
        .on_event(with_nonce(
            event("msg-d", "chan-a", MessageKind::Create, reply),
            &nonce,
        ))
        .await;

    let task = harness.wait_status(&task_id, TaskStatus::Success, WAIT).await;
    assert!(task.description.as_deref().unwrap().contains("watercolor fox"));
}
