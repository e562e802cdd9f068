
use stepflow::content::{ParameterValue, StepContent};
use stepflow::events::FlowEvent;
use stepflow::flow::FlowState;
use stepflow::host::{TargetState, TargetStates};
use test_helpers::*;

fn recorded(id: &str) -> StepContent {
    click(id, "t").with_helper(RECORDER)
}

fn four_recorded() -> Vec<StepContent> {
    vec![recorded("s0"), recorded("s1"), recorded("s2"), recorded("s3")]
}

fn step_event(kind: &str, index: usize, id: &str) -> FlowEvent {
    let id = id.to_string();
    match kind {
        "skip" => FlowEvent::SkipStep { index, id },
        "skip_immediate" => FlowEvent::SkipStepImmediate { index, id },
        "restore" => FlowEvent::RestoreStep { index, id },
        "done" => FlowEvent::SkipSequenceDone { index, id },
        "begin" => FlowEvent::BeginStep {
            index,
            id,
            enabled: true,
        },
        other => panic!("unknown event kind {}", other),
    }
}

// ============================================================================
// Single-step skip
// ============================================================================

#[test]
fn test_skip_current_step_advances() {
    let mut fx = Fixture::start(vec![click("s0", "t"), click("s1", "t")], &["t"]);
    fx.drain();

    assert!(fx.flow.skip_current_step());
    assert_eq!(
        fx.drain(),
        vec![step_event("skip", 0, "s0"), step_event("begin", 1, "s1")]
    );
    assert_eq!(fx.flow.host().effects().skipped, vec![0]);
    assert!(fx.flow.host().effects().executed.is_empty());
}

#[test]
fn test_skip_waits_for_helper_lifetime() {
    let step = recorded("s0").with_parameter("lifetime", ParameterValue::Float(0.5));
    let mut fx = Fixture::start(vec![step, click("s1", "t")], &["t"]);
    fx.drain();

    assert!(fx.flow.skip_current_step());
    assert_eq!(fx.drain(), vec![step_event("skip", 0, "s0")]);
    assert_eq!(fx.flow.state(), FlowState::Executing);
    assert_eq!(fx.flow.current_helper_task(), Some(stepflow::helper::StepHelperTask::Skip));

    fx.tick_n(4);
    assert!(fx.drain().is_empty());
    assert_eq!(fx.journal(), vec!["init:0:Execute", "skip:0"]);

    fx.tick();
    assert_eq!(fx.drain(), vec![step_event("begin", 1, "s1")]);
    assert_eq!(
        fx.journal(),
        vec!["init:0:Execute", "skip:0", "terminate:0:Skip"]
    );
}

#[test]
fn test_skip_honors_hold_time() {
    let mut fx = Fixture::start(
        vec![click("s0", "t").with_elapse(0.5), click("s1", "t")],
        &["t"],
    );
    fx.drain();

    assert!(fx.flow.skip_current_step());
    fx.tick_n(4);
    assert!(begun(&fx.drain()).is_empty());
    fx.tick();
    assert_eq!(begun(&fx.drain()), vec![1]);
}

#[test]
fn test_skip_current_step_immediate_ignores_waits() {
    let step = recorded("s0")
        .with_elapse(0.5)
        .with_parameter("lifetime", ParameterValue::Float(0.5));
    let mut fx = Fixture::start(vec![step, click("s1", "t")], &["t"]);
    fx.drain();

    assert!(fx.flow.skip_current_step_immediate());
    assert_eq!(
        fx.drain(),
        vec![
            step_event("skip_immediate", 0, "s0"),
            step_event("begin", 1, "s1")
        ]
    );
    assert_eq!(
        fx.journal(),
        vec!["init:0:Execute", "skip_immediate:0", "terminate:0:SkipImmediate"]
    );
}

#[test]
fn test_skip_rejected_while_executing() {
    let mut fx = Fixture::start(
        vec![click("s0", "t").with_elapse(0.5), click("s1", "t")],
        &["t"],
    );
    fx.click("t");
    fx.tick();
    fx.drain();

    assert!(!fx.flow.skip_current_step());
    assert!(!fx.flow.skip_current_step_immediate());
    assert!(!fx.flow.skip_step("s1"));
    assert!(!fx.flow.skip_step_immediate("s1"));
    assert!(!fx.flow.restore_step("s0"));
    assert!(fx.drain().is_empty());
}

#[test]
fn test_helper_can_veto_skip() {
    let step = click("s0", "t")
        .with_helper("stepflow.helpers.Timed")
        .with_parameter("allow_skip", ParameterValue::Bool(false));
    let mut fx = Fixture::start(vec![step, click("s1", "t")], &["t"]);
    fx.drain();

    assert!(!fx.flow.skip_current_step());
    assert!(!fx.flow.skip_current_step_immediate());
    assert!(!fx.flow.skip_step("s1"));
    assert!(!fx.flow.skip_step_immediate("s1"));
    assert!(fx.drain().is_empty());
    assert_eq!(fx.flow.current_step_index(), Some(0));
}

#[test]
fn test_skip_rejected_when_not_running() {
    let mut fx = Fixture::new(vec![click("s0", "t")], &["t"]);
    assert!(!fx.flow.skip_current_step());
    assert!(!fx.flow.skip_step("s0"));
    assert!(!fx.flow.restore_step("s0"));
    assert!(fx.drain().is_empty());
}

// ============================================================================
// Multi-step skip
// ============================================================================

#[test]
fn test_skip_step_walks_to_target() {
    let mut fx = Fixture::start(four_recorded(), &["t"]);
    fx.drain();

    assert!(fx.flow.skip_step("s2"));
    assert_eq!(
        fx.drain(),
        vec![
            step_event("skip", 0, "s0"),
            step_event("skip", 1, "s1"),
            step_event("done", 2, "s2"),
            step_event("begin", 2, "s2"),
        ]
    );
    assert_eq!(fx.flow.current_step_index(), Some(2));
    assert_eq!(fx.flow.host().effects().skipped, vec![0, 1]);

    let skips: Vec<String> = fx
        .journal()
        .into_iter()
        .filter(|entry| entry.starts_with("skip:"))
        .collect();
    assert_eq!(skips, vec!["skip:0", "skip:1"]);
    assert_eq!(fx.journal().last().map(String::as_str), Some("init:2:Execute"));
}

#[test]
fn test_skip_step_bounds() {
    let mut fx = Fixture::start(four_recorded(), &["t"]);
    fx.click("t");
    fx.tick();
    fx.drain();
    assert_eq!(fx.flow.current_step_index(), Some(1));

    assert!(!fx.flow.skip_step("s0"));
    assert!(!fx.flow.skip_step_immediate("s0"));
    assert!(!fx.flow.skip_step("unknown"));
    assert!(fx.drain().is_empty());

    // Skipping to the current step restarts it
    assert!(fx.flow.skip_step("s1"));
    assert_eq!(
        fx.drain(),
        vec![step_event("done", 1, "s1"), step_event("begin", 1, "s1")]
    );
}

#[test]
fn test_skip_step_immediate_walks_synchronously() {
    let mut fx = Fixture::start(four_recorded(), &["t"]);
    fx.drain();

    assert!(fx.flow.skip_step_immediate("s3"));
    assert_eq!(
        fx.drain(),
        vec![
            step_event("skip_immediate", 0, "s0"),
            step_event("skip_immediate", 1, "s1"),
            step_event("skip_immediate", 2, "s2"),
            step_event("done", 3, "s3"),
            step_event("begin", 3, "s3"),
        ]
    );
    assert_eq!(fx.flow.current_step_index(), Some(3));
    assert_eq!(fx.flow.state(), FlowState::Running);

    let immediate = fx
        .journal()
        .iter()
        .filter(|entry| entry.starts_with("skip_immediate:"))
        .count();
    assert_eq!(immediate, 3);
}

#[test]
fn test_pause_stops_multi_step_skip() {
    let mut steps = four_recorded();
    steps[0] = recorded("s0").with_parameter("lifetime", ParameterValue::Float(0.5));
    let mut fx = Fixture::start(steps, &["t"]);
    fx.drain();

    assert!(fx.flow.skip_step("s3"));
    fx.flow.set_paused(true);
    fx.tick_n(10);
    assert_eq!(fx.drain(), vec![step_event("skip", 0, "s0")]);

    fx.flow.set_paused(false);
    fx.tick();
    assert_eq!(
        fx.drain(),
        vec![step_event("done", 1, "s1"), step_event("begin", 1, "s1")]
    );
    assert_eq!(fx.flow.current_step_index(), Some(1));
    assert_eq!(fx.flow.host().effects().skipped, vec![0]);
}

#[test]
fn test_multi_step_skip_ignores_custom_order() {
    let mut fx = Fixture::new(four_recorded(), &["t"]);
    assert!(fx.flow.add_custom_order("s0", "s3"));
    fx.flow.begin(true).unwrap();
    fx.drain();

    assert!(fx.flow.skip_step("s2"));
    assert_eq!(skipped(&fx.drain()), vec![0, 1]);
}

// ============================================================================
// Restore
// ============================================================================

#[test]
fn test_restore_walks_backward_once_per_step() {
    let mut fx = Fixture::start(four_recorded(), &["t"]);
    fx.click("t");
    fx.tick();
    fx.click("t");
    fx.tick();
    assert_eq!(fx.flow.current_step_index(), Some(2));
    fx.drain();
    fx.clear_journal();

    assert!(fx.flow.restore_step("s0"));
    assert_eq!(
        fx.drain(),
        vec![
            step_event("restore", 2, "s2"),
            step_event("restore", 1, "s1"),
            step_event("restore", 0, "s0"),
            step_event("begin", 0, "s0"),
        ]
    );
    assert_eq!(
        fx.journal(),
        vec![
            "restore:2",
            "terminate:2:Restore",
            "init:1:Restore",
            "restore:1",
            "terminate:1:Restore",
            "init:0:Restore",
            "restore:0",
            "terminate:0:Restore",
            "init:0:Execute",
        ]
    );
    assert_eq!(fx.flow.current_step_index(), Some(0));
    assert_eq!(fx.flow.state(), FlowState::Running);
}

#[test]
fn test_restore_requires_earlier_step() {
    let mut fx = Fixture::start(four_recorded(), &["t"]);
    fx.click("t");
    fx.tick();
    fx.drain();

    assert!(!fx.flow.restore_step("s1"));
    assert!(!fx.flow.restore_step("s2"));
    assert!(!fx.flow.restore_step("unknown"));

    fx.flow.set_paused(true);
    assert!(!fx.flow.restore_step("s0"));
    assert!(fx.drain().is_empty());
}

#[test]
fn test_restored_state_change_step_waits_for_new_completion() {
    let mut fx = Fixture::start(
        vec![state_change("s0", "valve"), click("s1", "lever")],
        &["valve", "lever"],
    );
    assert!(fx.flow.complete_current_step());
    fx.tick();
    assert_eq!(fx.flow.current_step_index(), Some(1));
    fx.drain();

    assert!(fx.flow.restore_step("s0"));
    assert_eq!(begun(&fx.drain()), vec![0]);
    let valve = fx.handle("valve");
    assert_eq!(fx.flow.host().target_state(valve), TargetState::Normal);

    fx.tick_n(3);
    assert!(executed(&fx.drain()).is_empty());
    assert_eq!(fx.flow.current_step_index(), Some(0));

    assert!(fx.flow.complete_current_step());
    fx.tick();
    let events = fx.drain();
    assert_eq!(executed(&events), vec![0]);
    assert_eq!(begun(&events), vec![1]);
}

// ============================================================================
// Helper faults
// ============================================================================

#[test]
fn test_helper_panics_are_isolated() {
    let step = click("s0", "t").with_helper(PANICKER);
    let mut fx = Fixture::start(vec![step, click("s1", "t")], &["t"]);
    fx.drain();

    assert!(fx.flow.guide());

    assert!(fx.flow.skip_current_step());
    assert_eq!(
        fx.drain(),
        vec![step_event("skip", 0, "s0"), step_event("begin", 1, "s1")]
    );

    assert!(fx.flow.restore_step("s0"));
    assert_eq!(
        fx.drain(),
        vec![
            step_event("restore", 1, "s1"),
            step_event("restore", 0, "s0"),
            step_event("begin", 0, "s0"),
        ]
    );
    assert!(fx.flow.is_running());
}

#[test]
fn test_failed_helper_construction_leaves_step_without_helper() {
    let steps = vec![
        click("s0", "t").with_helper(FAILING_FACTORY),
        click("s1", "t").with_helper(FAILING_INIT),
        click("s2", "t"),
    ];
    let mut fx = Fixture::start(steps, &["t"]);
    assert!(fx.report.is_clean());
    assert!(fx.flow.current_step_helper().is_none());

    fx.click("t");
    fx.tick();
    assert_eq!(fx.flow.current_step_index(), Some(1));
    assert!(fx.flow.current_step_helper().is_none());

    fx.click("t");
    fx.tick();
    assert_eq!(fx.flow.current_step_index(), Some(2));
    assert_eq!(executed(&fx.drain()), vec![0, 1]);
}
