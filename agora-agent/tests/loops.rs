//! Loop manager behavior against a scripted provider.

use agora_agent::{LoopConfig, LoopManager, LoopManagerConfig, TriggerQueue};
use agora_gateway::MockProvider;
use agora_kernel::Kernel;
use bedrock::{
    Amount, ArtifactKind, Balances, Capability, CodeRef, EventFilter, EventKind, Intent,
    Interface, MethodSpec, PrincipalId, ResourceKind, WriteSpec,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn manager_config() -> LoopManagerConfig {
    LoopManagerConfig {
        stop_grace_secs: 2,
        loop_config: LoopConfig {
            iteration_delay_ms: 10,
            ..Default::default()
        },
    }
}

async fn write_agent(kernel: &Arc<Kernel>, creator: &str, id: &str, has_loop: bool) {
    let result = kernel
        .dispatch(Intent::Write {
            principal_id: creator.into(),
            spec: WriteSpec {
                artifact_id: id.into(),
                content: String::new(),
                kind: ArtifactKind::Agent,
                interface: Some(Interface::data("a test agent")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: true,
                has_loop,
            },
        })
        .await;
    assert!(result.success, "{}", result.message);
}

/// Seed a principal the way boot would: balances set directly on the
/// ledger, with a generous disk quota so loops can persist state.
async fn fund(kernel: &Arc<Kernel>, principal: &str, scrip: i64, dollars: Decimal) {
    let id = PrincipalId::new(principal);
    if kernel.ledger().contains(&id).await {
        let mut all = kernel.ledger().snapshot().await;
        let balances = all.get_mut(&id).unwrap();
        balances.scrip += scrip;
        balances.llm_dollar_budget += dollars;
        balances.disk_quota += 1 << 20;
        kernel.ledger().restore(all).await;
    } else {
        kernel
            .ledger()
            .register(id, Balances::starting(scrip, dollars, 1 << 20))
            .await
            .unwrap();
    }
}

async fn wait_for_event(
    kernel: &Arc<Kernel>,
    kind: EventKind,
    principal: &str,
    timeout: Duration,
) -> bool {
    let filter = EventFilter {
        kinds: vec![kind],
        principal_id: Some(principal.into()),
        ..Default::default()
    };
    let mut cursor = kernel.events().subscribe(filter);
    tokio::time::timeout(timeout, cursor.next()).await.is_ok()
}

#[tokio::test]
async fn tool_calling_agent_acts_through_the_dispatcher() {
    // The model always answers with one transfer tool call.
    let provider = MockProvider::tool_call(
        "transfer",
        json!({"to": "bob", "amount": 1, "resource": "scrip"}),
        Decimal::new(1, 4),
    );
    let kernel = Kernel::builder(Arc::new(provider)).build();
    fund(&kernel, "boot", 0, Decimal::ZERO).await;

    write_agent(&kernel, "boot", "trader", true).await;
    fund(&kernel, "trader", 50, Decimal::ONE).await;
    kernel
        .grant_capability(&"trader".into(), Capability::CanCallLlm)
        .await
        .unwrap();
    write_agent(&kernel, "boot", "bob", false).await;

    let manager = LoopManager::new(Arc::clone(&kernel), manager_config());
    assert_eq!(manager.spawn_for_existing().await, 1);

    // Wait until bob has been paid.
    let paid = async {
        loop {
            let bob = kernel.ledger().balances(&"bob".into()).await.unwrap();
            if bob.scrip > 0 {
                return bob.scrip;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    let scrip = tokio::time::timeout(Duration::from_secs(5), paid)
        .await
        .expect("agent should act within the timeout");
    assert!(scrip >= 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn starved_agent_freezes_and_wakes_on_transfer() {
    let provider = MockProvider::text("thinking", Decimal::new(15, 4));
    let kernel = Kernel::builder(Arc::new(provider)).build();
    fund(&kernel, "boot", 0, Decimal::ZERO).await;
    fund(&kernel, "patron", 0, Decimal::ONE).await;

    write_agent(&kernel, "boot", "p1", true).await;
    kernel
        .grant_capability(&"p1".into(), Capability::CanCallLlm)
        .await
        .unwrap();
    // No budget at all: the loop's first LLM-dependent step starves.

    let manager = LoopManager::new(Arc::clone(&kernel), manager_config());
    manager.spawn_for_existing().await;

    assert!(
        wait_for_event(&kernel, EventKind::AgentFrozen, "p1", Duration::from_secs(5)).await,
        "agent should freeze on exhausted budget"
    );

    // Top the agent up; the loop wakes.
    let result = kernel
        .dispatch(Intent::Transfer {
            principal_id: "patron".into(),
            to: "p1".into(),
            amount: Amount::Dollars(Decimal::new(5, 1)),
            resource: ResourceKind::LlmBudget,
        })
        .await;
    assert!(result.success, "{}", result.message);

    assert!(
        wait_for_event(&kernel, EventKind::AgentUnfrozen, "p1", Duration::from_secs(5)).await,
        "agent should wake on the inbound transfer"
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn workflow_agent_emits_without_an_llm() {
    let kernel = Kernel::builder(Arc::new(MockProvider::text("", Decimal::ZERO))).build();
    fund(&kernel, "boot", 0, Decimal::ZERO).await;

    // Workflow: give bob one scrip whenever we hold at least 10.
    let workflow = json!({
        "steps": [{
            "name": "tithe",
            "step_type": "emit",
            "intent": {"action_type": "transfer", "to": "bob", "amount": 1, "resource": "scrip"},
            "run_if": {"kind": "compare", "op": "ge",
                "left": {"kind": "field", "field": "balances.scrip"},
                "right": {"kind": "literal", "value": 10}},
        }]
    });
    let result = kernel
        .dispatch(Intent::Write {
            principal_id: "boot".into(),
            spec: WriteSpec {
                artifact_id: "tithe-flow".into(),
                content: workflow.to_string(),
                kind: ArtifactKind::Workflow,
                interface: Some(Interface::data("tithe workflow")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: false,
                has_loop: false,
            },
        })
        .await;
    assert!(result.success);

    let result = kernel
        .dispatch(Intent::Write {
            principal_id: "boot".into(),
            spec: WriteSpec {
                artifact_id: "monk".into(),
                content: String::new(),
                kind: ArtifactKind::Agent,
                interface: Some(Interface::data("a workflow-driven agent")),
                code: None,
                metadata: [("workflow_id".to_string(), json!("tithe-flow"))]
                    .into_iter()
                    .collect(),
                access_contract_id: None,
                has_standing: true,
                has_loop: true,
            },
        })
        .await;
    assert!(result.success, "{}", result.message);
    fund(&kernel, "monk", 100, Decimal::ZERO).await;
    fund(&kernel, "bob", 0, Decimal::ZERO).await;

    let manager = LoopManager::new(Arc::clone(&kernel), manager_config());
    manager.spawn_for_existing().await;

    let paid = async {
        loop {
            let bob = kernel.ledger().balances(&"bob".into()).await.unwrap();
            if bob.scrip > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), paid)
        .await
        .expect("workflow should emit a transfer");

    manager.shutdown().await;
}

#[tokio::test]
async fn trigger_fires_callback_on_matching_event() {
    struct Recorder;
    impl agora_kernel::Program for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        fn call<'a>(
            &'a self,
            sandbox: &'a agora_kernel::Sandbox,
        ) -> agora_kernel::ProgramFuture<'a> {
            Box::pin(async move {
                // Record the observed event seq into an artifact.
                let seq = sandbox.args["event"]["seq"].clone();
                let result = sandbox
                    .actions()
                    .write_artifact(WriteSpec {
                        artifact_id: "observations".into(),
                        content: seq.to_string(),
                        kind: ArtifactKind::Data,
                        interface: Some(Interface::data("trigger observations")),
                        code: None,
                        metadata: Default::default(),
                        access_contract_id: None,
                        has_standing: false,
                        has_loop: false,
                    })
                    .await;
                Ok(json!({"recorded": result.success}))
            })
        }
    }

    let kernel = Kernel::builder(Arc::new(MockProvider::text("", Decimal::ZERO)))
        .program(Arc::new(Recorder))
        .build();
    fund(&kernel, "watcher", 0, Decimal::ZERO).await;

    // Callback artifact with standing so it can pay for its own writes.
    let result = kernel
        .dispatch(Intent::Write {
            principal_id: "watcher".into(),
            spec: WriteSpec {
                artifact_id: "recorder-svc".into(),
                content: String::new(),
                kind: ArtifactKind::Executable,
                interface: Some(Interface::service(
                    "records frozen agents",
                    vec![MethodSpec {
                        name: "run".into(),
                        input_schema: json!({}),
                        output_schema: json!({}),
                        cost: 0,
                        errors: vec![],
                    }],
                )),
                code: Some(CodeRef::new("recorder")),
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: true,
                has_loop: false,
            },
        })
        .await;
    assert!(result.success, "{}", result.message);
    fund(&kernel, "recorder-svc", 0, Decimal::ZERO).await;

    let trigger_def = json!({
        "filter": {"kinds": ["agent_frozen"]},
        "callback": "recorder-svc",
    });
    let result = kernel
        .dispatch(Intent::Write {
            principal_id: "watcher".into(),
            spec: WriteSpec {
                artifact_id: "freeze-watch".into(),
                content: trigger_def.to_string(),
                kind: ArtifactKind::Trigger,
                interface: Some(Interface::data("watches for frozen agents")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: false,
                has_loop: false,
            },
        })
        .await;
    assert!(result.success, "{}", result.message);

    let cancel = CancellationToken::new();
    let queue = TriggerQueue::new(Arc::clone(&kernel), cancel.clone());
    let queue_task = tokio::spawn(queue.run());

    // An agent_frozen event lands in the log; the trigger should fire.
    kernel
        .events()
        .append(bedrock::EventDraft::new(
            EventKind::AgentFrozen,
            "someone",
            json!({"reason": "budget_exhausted"}),
        ))
        .await
        .unwrap();

    let observed = async {
        loop {
            if kernel.store().contains(&"observations".into()).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), observed)
        .await
        .expect("trigger should have fired the callback");

    cancel.cancel();
    let _ = queue_task.await;
}
