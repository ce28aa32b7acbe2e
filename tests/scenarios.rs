//! End-to-end scenarios against a booted world, no network and no keys.

use agora::{Agora, GenesisManifest, KernelConfig};
use agora_gateway::{ChatMessage, ChatRequest, MockProvider};
use bedrock::{
    Amount, ArtifactKind, Balances, Capability, ErrorCode, EventFilter, EventKind, Intent,
    Interface, PrincipalId, QueryFilter, QueryKind, ResourceKind, WriteSpec,
};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn boot(provider: MockProvider) -> Agora {
    let mut config = KernelConfig::default();
    config.agent.loop_config.iteration_delay_ms = 10;
    config.timeouts.loop_stop_grace_secs = 2;
    Agora::boot(config, Arc::new(provider), GenesisManifest::builtin())
        .await
        .expect("boot")
}

/// Seed a ledger-only principal, the way boot seeds alpha-prime. The ID
/// registry entry appears only once the principal writes an artifact body.
async fn seed(world: &Agora, principal: &str, scrip: i64, dollars: Decimal) {
    world
        .kernel()
        .ledger()
        .register(
            PrincipalId::new(principal),
            Balances::starting(scrip, dollars, 1 << 20),
        )
        .await
        .unwrap();
}

fn chat() -> ChatRequest {
    ChatRequest {
        model: String::new(),
        messages: vec![ChatMessage::user("think")],
        tools: None,
    }
}

// ── Scenario 1: simple transfer ─────────────────────────────────────────

#[tokio::test]
async fn simple_transfer() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;
    seed(&world, "alice", 100, Decimal::ZERO).await;
    seed(&world, "bob", 0, Decimal::ZERO).await;
    let before = world.kernel().events().head_seq();

    let result = world
        .dispatch(Intent::Transfer {
            principal_id: "alice".into(),
            to: "bob".into(),
            amount: Amount::Units(40),
            resource: ResourceKind::Scrip,
        })
        .await;

    assert!(result.success);
    assert_eq!(result.data.as_ref().unwrap()["new_balances"], json!([60, 40]));

    let ledger = world.kernel().ledger();
    assert_eq!(ledger.balances(&"alice".into()).await.unwrap().scrip, 60);
    assert_eq!(ledger.balances(&"bob".into()).await.unwrap().scrip, 40);

    // Exactly one action event for the dispatch, nesting intent + result.
    let actions = world
        .kernel()
        .events()
        .read_since(
            before,
            &EventFilter {
                kinds: vec![EventKind::Action],
                ..Default::default()
            },
            10,
        )
        .await;
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].data["intent"]["action_type"], "transfer");
    assert_eq!(actions[0].data["result"]["data"]["new_balances"], json!([60, 40]));

    world.shutdown().await;
}

// ── Scenario 2: rate limit ──────────────────────────────────────────────

#[tokio::test]
async fn llm_call_rate_limits_the_third_call() {
    let mut config = KernelConfig::default();
    config.rate_limiting.llm_call_rate = agora::RateLimitEntry {
        window_seconds: 60,
        max_per_window: 2,
    };
    let world = Agora::boot(
        config,
        Arc::new(MockProvider::text("ok", Decimal::new(1, 4))),
        GenesisManifest::builtin(),
    )
    .await
    .unwrap();
    seed(&world, "p1", 0, Decimal::ONE).await;

    let gateway = world.kernel().gateway();
    assert!(gateway.call(&"p1".into(), chat(), false).await.is_ok());
    assert!(gateway.call(&"p1".into(), chat(), false).await.is_ok());

    let err = gateway.call(&"p1".into(), chat(), false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuotaExceeded);
    assert!(err.is_retryable());

    // The rolling window frees capacity by expiry, not by reset: one
    // window later the same principal may call again.
    let tracker = world.kernel().rates();
    let later = std::time::Instant::now() + Duration::from_secs(61);
    assert_eq!(
        tracker.capacity(&"p1".into(), ResourceKind::LlmCallRate, later),
        2
    );

    world.shutdown().await;
}

// ── Scenario 3: budget exhaustion and hibernation ───────────────────────

#[tokio::test]
async fn budget_exhaustion_freezes_then_transfer_wakes() {
    // Every call costs $0.0015; p1 holds only $0.001.
    let world = boot(MockProvider::text("thought", Decimal::new(15, 4))).await;
    seed(&world, "admin", 0, Decimal::ONE).await;
    seed(&world, "p1", 10, Decimal::new(1, 3)).await;

    // The gateway refuses before the external call.
    let err = world
        .kernel()
        .gateway()
        .call(&"p1".into(), chat(), false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BudgetExhausted);
    assert!(!err.is_retryable());

    // An autonomous p1 hibernates: give it an artifact with a loop.
    let result = world
        .dispatch(Intent::Write {
            principal_id: "p1".into(),
            spec: WriteSpec {
                artifact_id: "p1".into(),
                content: String::new(),
                kind: ArtifactKind::Agent,
                interface: Some(Interface::data("a starving agent")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: true,
                has_loop: true,
            },
        })
        .await;
    assert!(result.success, "{}", result.message);
    world
        .kernel()
        .grant_capability(&"p1".into(), Capability::CanCallLlm)
        .await
        .unwrap();
    // Drain the remaining budget below the estimate so the loop starves.
    world
        .kernel()
        .ledger()
        .settle_llm(&"p1".into(), Decimal::ONE)
        .await
        .unwrap();

    let frozen = EventFilter {
        kinds: vec![EventKind::AgentFrozen],
        principal_id: Some("p1".into()),
        ..Default::default()
    };
    let mut cursor = world.kernel().events().subscribe(frozen);
    let event = tokio::time::timeout(Duration::from_secs(5), cursor.next())
        .await
        .expect("agent should freeze")
        .unwrap();
    assert_eq!(event.data["reason"], "budget_exhausted");

    // An inbound budget transfer wakes it.
    let result = world
        .dispatch(Intent::Transfer {
            principal_id: "admin".into(),
            to: "p1".into(),
            amount: Amount::Dollars(Decimal::ONE),
            resource: ResourceKind::LlmBudget,
        })
        .await;
    assert!(result.success);

    let unfrozen = EventFilter {
        kinds: vec![EventKind::AgentUnfrozen],
        principal_id: Some("p1".into()),
        ..Default::default()
    };
    let mut cursor = world.kernel().events().subscribe(unfrozen);
    tokio::time::timeout(Duration::from_secs(5), cursor.next())
        .await
        .expect("agent should wake")
        .unwrap();

    world.shutdown().await;
}

// ── Scenario 4: invoke depth cap ────────────────────────────────────────

struct Chain;

impl agora_kernel::Program for Chain {
    fn name(&self) -> &str {
        "chain"
    }
    fn call<'a>(&'a self, sandbox: &'a agora_kernel::Sandbox) -> agora_kernel::ProgramFuture<'a> {
        Box::pin(async move {
            match sandbox.config.get("next").and_then(|n| n.as_str()) {
                Some(next) => {
                    let result = sandbox.actions().invoke(&next.into(), None, json!({})).await;
                    if result.success {
                        Ok(result.data.unwrap_or(serde_json::Value::Null))
                    } else {
                        Err(result
                            .to_exec_error()
                            .unwrap_or_else(|| bedrock::ExecError::Runtime(result.message)))
                    }
                }
                None => Ok(json!("leaf")),
            }
        })
    }
}

#[tokio::test]
async fn invoke_depth_caps_the_chain() {
    let mut config = KernelConfig::default();
    config.executor.max_invoke_depth = 3;
    let world = Agora::boot_with_programs(
        config,
        Arc::new(MockProvider::text("", Decimal::ZERO)),
        GenesisManifest::builtin(),
        vec![Arc::new(Chain)],
    )
    .await
    .unwrap();
    seed(&world, "user", 100, Decimal::ZERO).await;

    for (id, next) in [("e", None), ("d", Some("e")), ("c", Some("d")), ("b", Some("c")), ("a", Some("b"))] {
        let result = world
            .dispatch(Intent::Write {
                principal_id: "user".into(),
                spec: WriteSpec {
                    artifact_id: id.into(),
                    content: String::new(),
                    kind: ArtifactKind::Executable,
                    interface: Some(Interface::service(
                        "chain link",
                        vec![bedrock::MethodSpec {
                            name: "run".into(),
                            input_schema: json!({}),
                            output_schema: json!({}),
                            cost: 0,
                            errors: vec![],
                        }],
                    )),
                    code: Some(bedrock::CodeRef {
                        program: "chain".into(),
                        config: next.map(|n| json!({"next": n})).unwrap_or(serde_json::Value::Null),
                    }),
                    metadata: Default::default(),
                    access_contract_id: None,
                    has_standing: false,
                    has_loop: false,
                },
            })
            .await;
        assert!(result.success, "{id}: {}", result.message);
    }

    // b→c→d→e succeeds at depth cap 3.
    let result = world
        .dispatch(Intent::Invoke {
            principal_id: "user".into(),
            artifact_id: "b".into(),
            method: None,
            args: json!({}),
        })
        .await;
    assert!(result.success, "{}", result.message);

    // a→b→c→d→e fails at the d→e hop.
    let result = world
        .dispatch(Intent::Invoke {
            principal_id: "user".into(),
            artifact_id: "a".into(),
            method: None,
            args: json!({}),
        })
        .await;
    assert_eq!(result.error_code(), Some(ErrorCode::InvokeTooDeep));

    world.shutdown().await;
}

// ── Scenario 5: soft-delete observability ───────────────────────────────

#[tokio::test]
async fn soft_delete_is_observable() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;
    seed(&world, "creator", 100, Decimal::ZERO).await;
    seed(&world, "other", 100, Decimal::ZERO).await;

    let result = world
        .dispatch(Intent::Write {
            principal_id: "creator".into(),
            spec: WriteSpec {
                artifact_id: "x".into(),
                content: "ephemeral".into(),
                kind: ArtifactKind::Data,
                interface: Some(Interface::data("doomed artifact")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: false,
                has_loop: false,
            },
        })
        .await;
    assert!(result.success);

    let result = world
        .dispatch(Intent::Delete {
            principal_id: "creator".into(),
            artifact_id: "x".into(),
        })
        .await;
    assert!(result.success, "{}", result.message);

    // From another principal: the tombstone is readable.
    let result = world
        .dispatch(Intent::Read {
            principal_id: "other".into(),
            artifact_id: "x".into(),
        })
        .await;
    assert!(result.success);
    let data = result.data.unwrap();
    assert_eq!(data["deleted"], true);
    assert_eq!(data["deleted_by"], "creator");
    assert!(data["deleted_at"].is_string());

    // Invoking it fails with the deleted code.
    let result = world
        .dispatch(Intent::Invoke {
            principal_id: "other".into(),
            artifact_id: "x".into(),
            method: None,
            args: json!({}),
        })
        .await;
    assert_eq!(result.error_code(), Some(ErrorCode::Deleted));

    // Listings exclude it by default, include it on request.
    let listed = |include_deleted: bool| {
        let world = &world;
        async move {
        let result = world
            .dispatch(Intent::Query {
                principal_id: "other".into(),
                query_type: QueryKind::Artifacts,
                filter: QueryFilter {
                    created_by: Some("creator".into()),
                    include_deleted,
                    ..Default::default()
                },
            })
            .await;
        result.data.unwrap()["artifacts"].as_array().unwrap().len()
        }
    };
    assert_eq!(listed(false).await, 0);
    assert_eq!(listed(true).await, 1);

    world.shutdown().await;
}

// ── Scenario 6: ID namespace collision ──────────────────────────────────

#[tokio::test]
async fn one_namespace_for_artifacts_and_principals() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;

    let registry = world.kernel().registry();
    registry
        .register("foo", ArtifactKind::Data, false)
        .await
        .unwrap();
    let err = registry
        .register("foo", ArtifactKind::Agent, true)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::IdCollision);

    world.shutdown().await;
}

// ── Universal invariants ────────────────────────────────────────────────

#[tokio::test]
async fn crossing_transfers_conserve_scrip() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;
    seed(&world, "a", 500, Decimal::ZERO).await;
    seed(&world, "b", 500, Decimal::ZERO).await;

    let kernel = world.kernel().clone();
    let mut handles = Vec::new();
    for i in 0..40 {
        let kernel = kernel.clone();
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        handles.push(tokio::spawn(async move {
            kernel
                .dispatch(Intent::Transfer {
                    principal_id: from.into(),
                    to: to.into(),
                    amount: Amount::Units(7),
                    resource: ResourceKind::Scrip,
                })
                .await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }
    assert_eq!(world.kernel().ledger().total_scrip().await, 1_000);

    world.shutdown().await;
}

#[tokio::test]
async fn concurrent_writers_to_different_artifacts_both_land() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;
    seed(&world, "w1", 0, Decimal::ZERO).await;
    seed(&world, "w2", 0, Decimal::ZERO).await;

    let write = |writer: &'static str, id: &'static str| {
        let kernel = world.kernel().clone();
        tokio::spawn(async move {
            kernel
                .dispatch(Intent::Write {
                    principal_id: writer.into(),
                    spec: WriteSpec {
                        artifact_id: id.into(),
                        content: format!("by {writer}"),
                        kind: ArtifactKind::Data,
                        interface: Some(Interface::data("concurrent write")),
                        code: None,
                        metadata: Default::default(),
                        access_contract_id: None,
                        has_standing: false,
                        has_loop: false,
                    },
                })
                .await
        })
    };
    let (r1, r2) = tokio::join!(write("w1", "doc-1"), write("w2", "doc-2"));
    assert!(r1.unwrap().success);
    assert!(r2.unwrap().success);

    // Both writes are observable afterwards, in some event order.
    for (reader, id, body) in [("w2", "doc-1", "by w1"), ("w1", "doc-2", "by w2")] {
        let result = world
            .dispatch(Intent::Read {
                principal_id: reader.into(),
                artifact_id: id.into(),
            })
            .await;
        assert_eq!(result.data.unwrap()["content"], body);
    }

    world.shutdown().await;
}

#[tokio::test]
async fn created_by_is_immutable_and_dispatches_map_to_action_events() {
    let world = boot(MockProvider::text("", Decimal::ZERO)).await;
    seed(&world, "alice", 100, Decimal::ZERO).await;
    let before = world.kernel().events().head_seq();

    let dispatches = [
        Intent::Write {
            principal_id: "alice".into(),
            spec: WriteSpec {
                artifact_id: "doc".into(),
                content: "v1".into(),
                kind: ArtifactKind::Data,
                interface: Some(Interface::data("doc")),
                code: None,
                metadata: Default::default(),
                access_contract_id: None,
                has_standing: false,
                has_loop: false,
            },
        },
        Intent::Noop {
            principal_id: "alice".into(),
            reason: None,
        },
        Intent::Read {
            principal_id: "alice".into(),
            artifact_id: "doc".into(),
        },
    ];
    let count = dispatches.len();
    for intent in dispatches {
        world.dispatch(intent).await;
    }

    let actions = world
        .kernel()
        .events()
        .read_since(
            before,
            &EventFilter {
                kinds: vec![EventKind::Action],
                ..Default::default()
            },
            100,
        )
        .await;
    assert_eq!(actions.len(), count);

    // created_by survives any update attempt.
    let artifact = world.kernel().store().get(&"doc".into()).await.unwrap();
    assert_eq!(artifact.created_by.as_str(), "alice");

    world.shutdown().await;
}

// ── Gateway wire shape sanity over a boot ───────────────────────────────

#[tokio::test]
async fn gateway_wire_body_matches_the_contract() {
    let world = boot(MockProvider::tool_call(
        "transfer",
        json!({"to": "bob", "amount": 1, "resource": "scrip"}),
        Decimal::new(2, 4),
    ))
    .await;
    seed(&world, "p1", 0, Decimal::ONE).await;

    let body = world
        .kernel()
        .gateway()
        .call_wire(&"p1".into(), chat(), false)
        .await;
    assert!(body.success);
    assert_eq!(body.cost, Decimal::new(2, 4));
    assert_eq!(body.usage.total_tokens, 35);
    assert_eq!(body.tool_calls.len(), 1);
    assert_eq!(body.tool_calls[0].name, "transfer");

    world.shutdown().await;
}
