mod common;

use std::rc::Rc;
use std::sync::Arc;

use bt_core::{BbKey, Blackboard, BlackboardSchema};
use bt_engine::{
    AiMessage, BehaviorTreeComponent, BtNode, Child, Composite, Decorator, EngineConfig, ExecutionMode,
    FlowAbortMode, NodeResult, RequestId, StopMode, Task, TaskNode, TreeBuilder, TreeManager,
};
use common::{
    active_task, component, component_with, manager, run, traced, BbFlag, Component, Cx, Latent, RecordingWorld,
    AGENT,
};

const DANGER: BbKey<bool> = BbKey::new(1);

/// Waits for `ticket` carrying a specific request id.
#[derive(Debug)]
struct Ticket(u32);

impl BtNode for Ticket {}

impl TaskNode<RecordingWorld> for Ticket {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        cx.world_mut().record("start:ticket");
        cx.wait_for_message("ticket", Some(RequestId(self.0)));
        NodeResult::InProgress
    }
}

fn single(task: Latent) -> bt_engine::BehaviorTree<RecordingWorld> {
    TreeBuilder::new("main")
        .build(Composite::selector("root").task(Task::new("x", task)))
        .unwrap()
}

#[test]
fn paused_component_defers_blackboard_changes() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .child(
                    Child::task(Task::new("flee", Latent::new("flee")))
                        .decorator(Decorator::new("danger", BbFlag::new(DANGER, FlowAbortMode::LowerPriority))),
                )
                .task(Task::new("patrol", Latent::new("patrol"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);

    comp.pause_logic("cutscene");
    assert!(comp.is_paused());
    comp.blackboard_mut().set(DANGER, true);
    run(&mut comp, &mut world, 3);
    assert_eq!(world.events, vec!["start:patrol"]);

    assert!(comp.resume_logic("cutscene"));
    run(&mut comp, &mut world, 1);
    assert_eq!(world.events, vec!["start:patrol", "abort:patrol", "start:flee"]);
}

#[test]
fn resume_without_pause_is_rejected() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    assert!(!comp.resume_logic("nothing"));
}

#[test]
fn safe_stop_waits_for_latent_abort() {
    let trees = manager(vec![single(Latent::latent_abort("x"))]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);

    comp.stop_tree(&mut world, StopMode::Safe);
    assert!(comp.is_running());
    assert!(comp.is_abort_pending());
    assert_eq!(trace.borrow().count("bt.tree.stop"), 0);

    comp.handle_message(AiMessage::new("x.stopped", true));
    run(&mut comp, &mut world, 1);

    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
    assert_eq!(trace.borrow().count("bt.tree.stop"), 1);
    assert_eq!(world.events, vec!["start:x", "abort:x"]);
}

#[test]
fn forced_stop_does_not_wait() {
    let trees = manager(vec![single(Latent::latent_abort("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    comp.stop_tree(&mut world, StopMode::Forced);

    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
    assert_eq!(comp.message_observer_count(), 0);
    assert_eq!(comp.describe_active_tasks(), "None");
}

#[test]
fn restart_after_stop_starts_from_the_root() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    comp.stop_tree(&mut world, StopMode::Forced);
    comp.restart_tree(&mut world);
    run(&mut comp, &mut world, 2);

    assert!(comp.is_running());
    assert_eq!(world.events, vec!["start:x", "abort:x", "start:x"]);
}

#[test]
fn restart_while_running_reenters_the_tree() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    comp.restart_tree(&mut world);
    assert!(comp.is_restart_pending());
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:x", "abort:x", "start:x"]);
    assert_eq!(active_task(&comp).as_deref(), Some("x"));
}

#[test]
fn each_observer_receives_a_message_once() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::sequence("root")
                .task(Task::new("wait", Latent::new("wait")))
                .task(Task::new("hold", Latent::new("hold"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 1);
    assert_eq!(comp.message_observer_count(), 1);

    comp.handle_message(AiMessage::new("wait.done", true));
    comp.handle_message(AiMessage::new("wait.done", true));
    run(&mut comp, &mut world, 2);

    assert_eq!(world.events, vec!["start:wait", "start:hold"]);
    assert_eq!(trace.borrow().count("bt.message"), 1);
    // Only hold is listening now.
    assert_eq!(comp.message_observer_count(), 1);
}

#[test]
fn message_with_other_request_id_is_ignored() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::sequence("root")
                .task(Task::new("ticket", Ticket(7)))
                .task(Task::new("hold", Latent::new("hold"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 1);

    comp.handle_message(AiMessage::new("ticket", true).with_request(RequestId(3)));
    run(&mut comp, &mut world, 2);
    assert_eq!(active_task(&comp).as_deref(), Some("ticket"));

    comp.handle_message(AiMessage::new("ticket", true).with_request(RequestId(7)));
    run(&mut comp, &mut world, 2);
    assert_eq!(world.events, vec!["start:ticket", "start:hold"]);
}

#[test]
fn failed_message_fails_the_task() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .task(Task::new("try", Latent::new("try")))
                .task(Task::new("fallback", Latent::new("fallback"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 1);
    comp.handle_message(AiMessage::new("try.done", false));
    run(&mut comp, &mut world, 2);

    assert_eq!(world.events, vec!["start:try", "start:fallback"]);
}

#[test]
fn cooldowns_expire_with_component_time() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();
    comp.start_tree(&mut world, "main", ExecutionMode::Looped);

    comp.add_cooldown("dash", 1.0, false);
    assert!(comp.is_cooling_down("dash"));
    assert!((comp.cooldown_end_time("dash") - 1.0).abs() < 1e-9);

    comp.add_cooldown("dash", 0.5, true);
    assert!((comp.cooldown_end_time("dash") - 1.5).abs() < 1e-9);

    run(&mut comp, &mut world, 16);
    assert!(!comp.is_cooling_down("dash"));
    assert!(!comp.is_cooling_down("never"));
    assert_eq!(comp.cooldown_end_time("never"), 0.0);
}

#[test]
fn config_from_yaml_drives_start_logic() {
    let config = EngineConfig::from_yaml_str(
        "execution_mode: single_run\ndefault_tree: main\nmax_stack_depth: 4\nservice:\n  interval: 2.0\n",
    )
    .unwrap();
    assert_eq!(config.execution_mode, ExecutionMode::SingleRun);
    assert_eq!(config.max_stack_depth, 4);
    assert_eq!(config.max_known_instances, 255);
    assert_eq!(config.service.interval, 2.0);
    assert!((config.service.random_deviation - 0.1).abs() < f32::EPSILON);

    let tree = TreeBuilder::new("main")
        .build(Composite::sequence("root").task(Task::new("a", common::Instant::succeed("a"))))
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component_with(&trees, config);
    let mut world = RecordingWorld::default();

    assert!(comp.start_logic(&mut world));
    run(&mut comp, &mut world, 3);
    assert_eq!(world.events, vec!["run:a"]);
    assert!(!comp.is_running());
}

#[test]
fn start_logic_without_any_tree_fails() {
    let trees = manager(Vec::new());
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();
    assert!(!comp.start_logic(&mut world));
}

#[test]
fn tree_manager_builds_lazily_and_shares_assets() {
    let mut trees: TreeManager<RecordingWorld> = TreeManager::new();
    trees.register_with("main", || {
        TreeBuilder::new("main").build(Composite::selector("root").task(Task::new("x", Latent::new("x"))))
    });
    assert_eq!(trees.build_count(), 0);
    let trees = Rc::new(trees);

    let mut world = RecordingWorld::default();
    let mut first: Component = BehaviorTreeComponent::new(AGENT, trees.clone(), EngineConfig::default());
    let mut second: Component = BehaviorTreeComponent::new(AGENT + 1, trees.clone(), EngineConfig::default());
    assert!(first.start_tree(&mut world, "main", ExecutionMode::Looped));
    assert!(second.start_tree(&mut world, "main", ExecutionMode::Looped));

    assert_eq!(trees.build_count(), 1);
    assert_eq!(trees.load_count(), 2);
}

#[test]
fn debug_info_lists_the_active_path() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 1);

    let info = comp.debug_info_string();
    assert!(info.starts_with("Behavior tree: main\n"));
    assert!(info.contains("root"));
    assert!(info.contains('x'));
    assert_eq!(comp.describe_active_trees(), "main");
}

#[test]
fn cleanup_forgets_subtree_identities() {
    let trees = manager(vec![single(Latent::new("x"))]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 1);
    assert_eq!(comp.known_instance_count(), 1);

    comp.cleanup(&mut world);
    assert!(!comp.is_running());
    assert_eq!(comp.known_instance_count(), 0);
}

#[test]
fn incompatible_blackboard_refuses_to_start() {
    let schema = Arc::new(BlackboardSchema::new("soldier"));
    let tree = TreeBuilder::new("main")
        .blackboard(schema.clone())
        .build(Composite::selector("root").task(Task::new("x", Latent::new("x"))))
        .unwrap();
    let trees = manager(vec![tree]);
    let mut world = RecordingWorld::default();

    let mut plain = component(&trees);
    assert!(!plain.start_tree(&mut world, "main", ExecutionMode::Looped));
    assert_eq!(plain.instance_count(), 0);

    let mut soldier = component(&trees).with_blackboard(Blackboard::with_schema(schema));
    assert!(soldier.start_tree(&mut world, "main", ExecutionMode::Looped));
}
