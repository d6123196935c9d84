//! Dispatch rendering against hand-built wave states.

use wavesmith_agents::dispatcher::WaveDispatcher;
use wavesmith_core::policy::{AgentPolicy, LayerPolicy, NoPolicy, Policy};
use wavesmith_core::types::*;
use wavesmith_core::wave_plan::{build_wave_plan, TaskRequest, WavePlan};

fn plan() -> WavePlan {
    build_wave_plan(
        &[
            vec![
                TaskRequest::new(Layer::Entity, "Order entity"),
                TaskRequest::new(Layer::Dto, "Order DTOs"),
            ],
            vec![
                TaskRequest::new(Layer::Service, "Order service"),
                TaskRequest::new(Layer::Test, "Order tests"),
            ],
        ],
        "orders",
    )
}

/// Marks `wave_index` in progress as if its worktrees were provisioned.
fn start(state: &mut WaveState, wave_index: u32) {
    state.current_wave = wave_index;
    let wave = state.wave_mut(wave_index).unwrap();
    wave.status = WaveStatus::InProgress;
    for task in &mut wave.tasks {
        task.status = TaskStatus::InProgress;
        task.worktree_path = Some(format!("/repo/.wavesmith/worktrees/{}", task.branch_name));
    }
}

fn started_state() -> (WavePlan, WaveState) {
    let plan = plan();
    let mut state = WaveState::from_plan(&plan, None);
    start(&mut state, 1);
    (plan, state)
}

#[test]
fn pending_wave_renders_nothing() {
    let plan = plan();
    let state = WaveState::from_plan(&plan, None);
    let d = WaveDispatcher::new(Box::new(NoPolicy));
    assert_eq!(d.build_dispatch(&state, 1), "");
    assert_eq!(d.build_dispatch(&state, 7), "");
    assert!(d.assignments(&state, 1).is_empty());
}

#[test]
fn wave_without_active_tasks_renders_nothing() {
    let (_, mut state) = started_state();
    for t in &mut state.wave_mut(1).unwrap().tasks {
        t.status = TaskStatus::Completed;
    }
    let d = WaveDispatcher::new(Box::new(NoPolicy));
    assert_eq!(d.build_dispatch(&state, 1), "");
}

#[test]
fn assignments_cover_agent_paths_and_ownership() {
    let (_, mut state) = started_state();
    state.wave_mut(1).unwrap().tasks[1].agent_id = Some("api-expert".into());

    let d = WaveDispatcher::new(Box::new(NoPolicy))
        .with_verify_command(Some("./gradlew test".into()))
        .with_tracked_files(vec![
            "src/main/java/shop/entity/Order.java".into(),
            "src/main/java/shop/dto/OrderDto.java".into(),
            "README.md".into(),
        ]);
    let a = d.assignments(&state, 1);
    assert_eq!(a.len(), 2);

    assert_eq!(a[0].layer, Layer::Entity);
    assert_eq!(a[0].agent, "domain-expert");
    assert_eq!(a[1].agent, "api-expert");
    assert_eq!(a[0].branch_name, "wave-1/orders/entity");
    assert!(a[0].worktree_path.as_deref().unwrap().ends_with("wave-1/orders/entity"));
    assert_eq!(a[0].existing_files, vec!["src/main/java/shop/entity/Order.java".to_string()]);
    assert!(a[0].do_not_touch.contains(&"src/**/dto/**".to_string()));
    assert!(!a[0].do_not_touch.contains(&"src/**/entity/**".to_string()));
    assert_eq!(a[1].verify_command.as_deref(), Some("./gradlew test"));
}

#[test]
fn dispatch_lists_every_task_with_verify_block() {
    let (_, state) = started_state();
    let d = WaveDispatcher::new(Box::new(NoPolicy)).with_verify_command(Some("npm test".into()));
    let out = d.build_dispatch(&state, 1);

    assert!(out.starts_with("## Wave Dispatch"));
    assert!(out.contains("Wave 1: run 2 task(s) **in parallel**"));
    assert!(out.contains("### entity"));
    assert!(out.contains("### dto"));
    assert!(out.contains("- **branch**: `wave-1/orders/dto`"));
    assert!(out.contains("**DO NOT TOUCH**"));
    assert!(out.contains("### VERIFY"));
    assert!(out.contains("must run `npm test`"));
    assert!(out.contains("max 3 attempts"));
    assert!(out.contains("STOP and report"));
    assert!(out.contains("- How verified:"));
    assert!(!out.contains("Work Pod Protocol"));
}

#[test]
fn pod_protocol_replaces_plain_verify_block() {
    let (_, state) = started_state();
    let d = WaveDispatcher::new(Box::new(NoPolicy))
        .with_level(ProjectLevel::Monolith)
        .with_verify_command(Some("mvn test".into()));
    let out = d.build_dispatch(&state, 1);
    assert_eq!(out.matches("#### Work Pod Protocol").count(), 2);
    assert!(out.contains("run `mvn test`"));
    assert!(!out.contains("### VERIFY"));

    let starter = WaveDispatcher::new(Box::new(NoPolicy))
        .with_level(ProjectLevel::Starter)
        .with_verify_command(Some("mvn test".into()))
        .build_dispatch(&state, 1);
    assert!(!starter.contains("Work Pod Protocol"));
    assert!(starter.contains("### VERIFY"));
}

#[test]
fn only_relevant_advisories_are_prepended() {
    let (_, state) = started_state();
    let mut policy = Policy::default();
    policy.layer_policies.insert(
        Layer::Entity,
        LayerPolicy {
            success_rate: 0.5,
            avg_duration_ms: Some(1200),
            failure_pattern: Some(FailureClass::VerifyFail),
            suggestion: Some("entity often fails verification".into()),
        },
    );
    policy.layer_policies.insert(
        Layer::Controller,
        LayerPolicy {
            success_rate: 0.2,
            avg_duration_ms: None,
            failure_pattern: None,
            suggestion: Some("controller is unstable".into()),
        },
    );
    policy.agent_policies.insert(
        "report-generator".into(),
        AgentPolicy {
            success_rate: 0.4,
            suggestion: Some("report-generator struggles".into()),
        },
    );
    policy.wave_grouping_suggestion = Some("split slow layers".into());

    let out = WaveDispatcher::new(Box::new(policy)).build_dispatch(&state, 1);
    let advisories = out.find("Policy advisories").unwrap();
    let tasks = out.find("### entity").unwrap();
    assert!(advisories < tasks);
    assert!(out.contains("entity often fails verification"));
    assert!(out.contains("report-generator struggles"));
    assert!(out.contains("split slow layers"));
    assert!(!out.contains("controller is unstable"));
}

#[test]
fn second_wave_mentions_previous_cross_validation() {
    let (_, mut state) = started_state();
    {
        let w1 = state.wave_mut(1).unwrap();
        w1.status = WaveStatus::Completed;
        w1.cross_validation = Some(CrossValidationRecord {
            required: true,
            pairs: vec![ValidationPair {
                layer: Layer::Entity,
                implementer: Some("domain-expert".into()),
                validator: "service-expert".into(),
                file_patterns: vec!["src/**/entity/**".into()],
                checklist: vec![],
            }],
        });
    }
    start(&mut state, 2);

    let d = WaveDispatcher::new(Box::new(NoPolicy)).with_tracked_files(vec![
        "src/test/java/shop/service/OrderServiceTest.java".into(),
    ]);
    let out = d.build_dispatch(&state, 2);
    assert!(out.contains("Wave 1 output is under cross-validation"));
    assert!(out.contains("`entity` reviewed by `service-expert`"));
    assert!(out.contains("shared (coordinate before editing)"));
}

#[test]
fn execution_markdown_walks_waves_and_appends_dispatch() {
    let (plan, state) = started_state();
    let d = WaveDispatcher::new(Box::new(NoPolicy)).with_delegate_mode(true);
    let out = d.build_execution_markdown(&plan, Some(&state));

    assert!(out.starts_with("## Wave execution plan"));
    assert!(out.contains("feature: `orders` | 2 wave(s)"));
    assert!(out.contains("### Wave 1: entity, dto (started)"));
    assert!(out.contains("### Wave 2: service, test\n"));
    assert!(out.contains("    - branch: `wave-1/orders/entity`"));
    assert!(out.contains("- wave 1 done -> merge -> start wave 2"));
    assert!(out.contains("- wave 2 done -> final merge"));
    assert!(out.contains("## Wave Dispatch"));
    assert!(out.contains("Delegate mode"));
}

#[test]
fn execution_markdown_without_state_has_no_dispatch() {
    let out = WaveDispatcher::new(Box::new(NoPolicy)).build_execution_markdown(&plan(), None);
    assert!(out.contains("### Wave 1: entity, dto\n"));
    assert!(!out.contains("worktree:"));
    assert!(!out.contains("## Wave Dispatch"));
    assert_eq!(
        WaveDispatcher::new(Box::new(NoPolicy))
            .build_execution_markdown(&build_wave_plan(&[], "x"), None),
        ""
    );
}
