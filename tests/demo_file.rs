use std::path::Path;
use std::time::Duration;

use stepflow::events::FlowEvent;
use stepflow::flow::StepFlowController;
use stepflow::helper::HelperRegistry;
use stepflow::sim::{DemoFile, ScriptedAgent};

fn demo_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/demos/workbench.toml"))
}

#[test]
fn test_workbench_demo_compiles_clean() {
    let (stage, content) = DemoFile::from_path(demo_path()).unwrap().into_parts();
    let mut flow = StepFlowController::new(stage, content, HelperRegistry::with_builtins());
    let report = flow.compile();

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.step_count, 7);
    assert_eq!(report.target_count, 5);
    assert_eq!(flow.custom_order("power-on"), Some("done"));
    assert_eq!(flow.step_is_enable("inspect-fuse"), Some(false));
}

#[test]
fn test_workbench_demo_runs_to_completion() {
    let (stage, content) = DemoFile::from_path(demo_path()).unwrap().into_parts();
    let mut flow = StepFlowController::new(stage, content, HelperRegistry::with_builtins());
    flow.compile();
    let mut events = flow.subscribe();
    flow.begin(true).unwrap();

    let mut agent = ScriptedAgent::new(0);
    for _ in 0..200 {
        if !flow.is_running() {
            break;
        }
        agent.act(&mut flow);
        flow.tick(Duration::from_millis(50));
        flow.host_mut().end_tick();
    }

    assert!(!flow.is_running());
    assert_eq!(flow.host().effects().executed, vec![0, 1, 3, 4, 6]);
    assert_eq!(flow.host().effects().skipped, vec![2]);

    let mut received = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        received.push(envelope.event);
    }
    assert!(received.iter().all(|event| event.step_index() != Some(5)));
    assert_eq!(received.last(), Some(&FlowEvent::EndFlow));
}
