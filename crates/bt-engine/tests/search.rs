mod common;

use bt_engine::{BtNode, Composite, ExecutionMode, NodeResult, Task, TaskNode, TreeBuilder};
use common::{active_task, component, manager, run, traced, Cx, Instant, Latent, RecordingWorld};

/// Latent task that keeps running when a search picks it again.
#[derive(Debug)]
struct Steady(&'static str);

impl BtNode for Steady {}

impl TaskNode<RecordingWorld> for Steady {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record(format!("start:{}", self.0));
        NodeResult::InProgress
    }

    fn abort_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record(format!("abort:{}", self.0));
        NodeResult::Aborted
    }

    fn ignore_restart_self(&self) -> bool {
        true
    }
}

#[test]
fn selector_falls_through_failed_children() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .task(Task::new("a", Instant::fail("a")))
                .task(Task::new("b", Latent::new("b")))
                .task(Task::new("c", Instant::succeed("c"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    assert!(comp.start_tree(&mut world, "main", ExecutionMode::Looped));
    run(&mut comp, &mut world, 4);

    assert_eq!(world.events, vec!["run:a", "start:b"]);
    assert_eq!(active_task(&comp).as_deref(), Some("b"));
    assert_eq!(comp.describe_active_tasks(), "b");
}

#[test]
fn sequence_stops_at_first_failure_and_single_run_stops_the_tree() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::sequence("root")
                .task(Task::new("a", Instant::succeed("a")))
                .task(Task::new("b", Instant::fail("b")))
                .task(Task::new("c", Instant::succeed("c"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    assert!(comp.start_tree(&mut world, "main", ExecutionMode::SingleRun));
    run(&mut comp, &mut world, 6);

    assert_eq!(world.events, vec!["run:a", "run:b"]);
    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
    assert_eq!(trace.borrow().count("bt.tree.finished"), 1);
    assert_eq!(trace.borrow().count("bt.tree.stop"), 1);
}

#[test]
fn looped_tree_restarts_from_the_root() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::sequence("root")
                .task(Task::new("a", Instant::succeed("a")))
                .task(Task::new("b", Instant::succeed("b"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 6);

    assert_eq!(world.events, vec!["run:a", "run:b", "run:a", "run:b"]);
    assert_eq!(trace.borrow().count("bt.tree.finished"), 2);
    assert!(comp.is_running());
}

#[test]
fn nested_composites_resume_in_the_parent() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::sequence("root")
                .composite(
                    Composite::selector("pick")
                        .task(Task::new("x", Instant::fail("x")))
                        .task(Task::new("y", Instant::succeed("y"))),
                )
                .task(Task::new("z", Latent::new("z"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 5);

    assert_eq!(world.events, vec!["run:x", "run:y", "start:z"]);
    assert_eq!(active_task(&comp).as_deref(), Some("z"));
}

#[test]
fn missing_tree_does_not_start() {
    let trees = manager(Vec::new());
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    assert!(!comp.start_tree(&mut world, "nowhere", ExecutionMode::Looped));
    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
}

#[test]
fn trace_reports_task_lifecycle() {
    let tree = TreeBuilder::new("main")
        .build(Composite::selector("root").task(Task::new("wait", Latent::new("wait"))))
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);

    let trace = trace.borrow();
    assert_eq!(trace.count("bt.tree.start"), 1);
    assert_eq!(trace.count("bt.task.execute"), 1);
    let execute = trace.with_tag("bt.task.execute").next().unwrap();
    assert_eq!((execute.a, execute.b), (0, 1));
}

#[test]
fn restart_that_picks_a_self_ignoring_task_keeps_it_running() {
    let tree = TreeBuilder::new("main")
        .build(Composite::selector("root").task(Task::new("steady", Steady("steady"))))
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    let running = comp.active_node();

    comp.restart_tree(&mut world);
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:steady"]);
    assert_eq!(active_task(&comp).as_deref(), Some("steady"));
    assert_eq!(comp.active_node(), running);
    assert!(!comp.is_abort_pending());
    assert_eq!(trace.borrow().count("bt.task.abort"), 0);
    assert_eq!(trace.borrow().count("bt.task.execute"), 1);
}
