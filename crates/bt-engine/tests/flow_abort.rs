mod common;

use bt_core::BbKey;
use bt_engine::{
    AiMessage, AuxiliaryNode, BtNode, Child, Composite, Decorator, DecoratorLogic, DecoratorNode, ExecutionMode,
    FlowAbortMode, Task, TaskStatus, TreeBuilder,
};
use common::{active_task, component, manager, run, traced, BbFlag, Cx, Latent, RecordingWorld};

const DANGER: BbKey<bool> = BbKey::new(1);
const ENABLED: BbKey<bool> = BbKey::new(2);
const AMMO: BbKey<bool> = BbKey::new(3);
const GATE_A: BbKey<bool> = BbKey::new(4);
const GATE_B: BbKey<bool> = BbKey::new(5);
const NUDGE: BbKey<bool> = BbKey::new(6);

/// Always passes; requests execution on the tick after `NUDGE` is raised.
#[derive(Debug)]
struct Nudge;

impl BtNode for Nudge {}

impl AuxiliaryNode<RecordingWorld> for Nudge {
    fn wants_tick(&self) -> bool {
        true
    }

    fn tick_node(&self, cx: &mut Cx<'_>, _dt: f32) {
        if cx.blackboard().get(NUDGE).copied().unwrap_or(false) {
            cx.blackboard_mut().set(NUDGE, false);
            cx.request_execution();
        }
    }
}

impl DecoratorNode<RecordingWorld> for Nudge {
    fn flow_abort_mode(&self) -> FlowAbortMode {
        FlowAbortMode::SelfBranch
    }
}

fn nudged_work(logic: Option<Vec<DecoratorLogic>>) -> Composite<RecordingWorld> {
    let mut work = Child::task(Task::new("work", Latent::new("work"))).decorator(Decorator::new("nudge", Nudge));
    if let Some(logic) = logic {
        work = work.logic(logic);
    }
    Composite::selector("root")
        .child(work)
        .task(Task::new("idle", Latent::new("idle")))
}

fn guarded_patrol(patrol: Latent) -> Composite<RecordingWorld> {
    Composite::selector("root")
        .child(
            Child::task(Task::new("flee", Latent::new("flee")))
                .decorator(Decorator::new("danger", BbFlag::new(DANGER, FlowAbortMode::LowerPriority))),
        )
        .task(Task::new("patrol", patrol))
}

#[test]
fn lower_priority_abort_preempts_running_task() {
    let tree = TreeBuilder::new("main").build(guarded_patrol(Latent::new("patrol"))).unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    assert_eq!(world.events, vec!["start:patrol"]);
    let danger = comp.find_node("danger").unwrap();
    assert!(comp.is_aux_node_active(danger));

    comp.blackboard_mut().set(DANGER, true);
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:patrol", "abort:patrol", "start:flee"]);
    assert_eq!(active_task(&comp).as_deref(), Some("flee"));
    assert!(!comp.is_aux_node_active(danger));
}

#[test]
fn self_abort_leaves_branch_when_condition_fails() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .child(
                    Child::task(Task::new("work", Latent::new("work")))
                        .decorator(Decorator::new("enabled", BbFlag::new(ENABLED, FlowAbortMode::SelfBranch))),
                )
                .task(Task::new("idle", Latent::new("idle"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();
    comp.blackboard_mut().set(ENABLED, true);

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    assert_eq!(world.events, vec!["start:work"]);

    comp.blackboard_mut().set(ENABLED, false);
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:work", "abort:work", "start:idle"]);
    let enabled = comp.find_node("enabled").unwrap();
    assert!(!comp.is_aux_node_active(enabled));
}

#[test]
fn latent_abort_delays_the_next_task() {
    let tree = TreeBuilder::new("main")
        .build(guarded_patrol(Latent::latent_abort("patrol")))
        .unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);

    comp.blackboard_mut().set(DANGER, true);
    run(&mut comp, &mut world, 3);
    assert_eq!(world.events, vec!["start:patrol", "abort:patrol"]);
    assert!(comp.is_abort_pending());
    let patrol = comp.find_node("patrol").unwrap();
    assert_eq!(comp.task_status(patrol), TaskStatus::Aborting);

    comp.handle_message(AiMessage::new("patrol.stopped", true));
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:patrol", "abort:patrol", "start:flee"]);
    assert!(!comp.is_abort_pending());
    assert_eq!(comp.task_status(patrol), TaskStatus::Inactive);
}

#[test]
fn search_that_cannot_beat_the_running_task_is_rolled_back() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .child(
                    Child::composite(Composite::selector("combat").child(
                        Child::task(Task::new("attack", Latent::new("attack")))
                            .decorator(Decorator::new("ammo", BbFlag::new(AMMO, FlowAbortMode::None))),
                    ))
                    .decorator(Decorator::new("danger", BbFlag::new(DANGER, FlowAbortMode::LowerPriority))),
                )
                .task(Task::new("patrol", Latent::new("patrol"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    let node_before = comp.active_node();
    let instance_before = comp.active_instance_index();
    assert!(!comp.is_abort_pending());

    comp.blackboard_mut().set(DANGER, true);
    run(&mut comp, &mut world, 2);

    // The combat branch has nothing runnable, so patrol keeps running.
    assert_eq!(world.events, vec!["start:patrol"]);
    assert_eq!(active_task(&comp).as_deref(), Some("patrol"));
    assert_eq!(comp.active_node(), node_before);
    assert_eq!(comp.active_instance_index(), instance_before);
    assert!(!comp.is_abort_pending());
    let danger = comp.find_node("danger").unwrap();
    assert!(comp.is_aux_node_active(danger));
    assert_eq!(trace.borrow().count("bt.task.abort"), 0);
}

#[test]
fn higher_priority_gate_preempts_with_a_single_request() {
    let tree = TreeBuilder::new("main")
        .build(
            Composite::selector("root")
                .child(
                    Child::task(Task::new("a", Latent::new("a")))
                        .decorator(Decorator::new("gate_a", BbFlag::new(GATE_A, FlowAbortMode::LowerPriority))),
                )
                .child(
                    Child::task(Task::new("b", Latent::new("b")))
                        .decorator(Decorator::new("gate_b", BbFlag::new(GATE_B, FlowAbortMode::LowerPriority))),
                )
                .task(Task::new("c", Latent::new("c"))),
        )
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();
    comp.blackboard_mut().set(GATE_B, true);

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    assert_eq!(world.events, vec!["start:b"]);

    trace.borrow_mut().clear();
    comp.blackboard_mut().set(GATE_A, true);
    run(&mut comp, &mut world, 1);

    assert_eq!(world.events, vec!["start:b", "abort:b", "start:a"]);
    assert_eq!(active_task(&comp).as_deref(), Some("a"));
    let gate_a = comp.find_node("gate_a").unwrap();
    let sink = trace.borrow();
    assert_eq!(sink.count("bt.request"), 1);
    let request = sink.with_tag("bt.request").next().unwrap();
    assert_eq!(request.b, u64::from(gate_a.execution));
}

#[test]
fn passing_self_branch_request_restarts_its_branch() {
    let tree = TreeBuilder::new("main").build(nudged_work(None)).unwrap();
    let trees = manager(vec![tree]);
    let mut comp = component(&trees);
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    assert_eq!(world.events, vec!["start:work"]);

    comp.blackboard_mut().set(NUDGE, true);
    run(&mut comp, &mut world, 2);

    assert_eq!(world.events, vec!["start:work", "abort:work", "start:idle"]);
    assert_eq!(active_task(&comp).as_deref(), Some("idle"));
}

#[test]
fn decorator_logic_drops_request_while_decorators_pass() {
    let tree = TreeBuilder::new("main")
        .build(nudged_work(Some(vec![DecoratorLogic::Test(0)])))
        .unwrap();
    let trees = manager(vec![tree]);
    let (mut comp, trace) = traced(component(&trees));
    let mut world = RecordingWorld::default();

    comp.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut comp, &mut world, 2);
    trace.borrow_mut().clear();

    comp.blackboard_mut().set(NUDGE, true);
    run(&mut comp, &mut world, 2);

    assert_eq!(world.events, vec!["start:work"]);
    assert_eq!(active_task(&comp).as_deref(), Some("work"));
    assert_eq!(trace.borrow().count("bt.request"), 0);
}

#[test]
fn decorator_logic_combines_conditions() {
    let build = || {
        TreeBuilder::new("main")
            .build(
                Composite::selector("root")
                    .child(
                        Child::task(Task::new("guarded", Latent::new("guarded")))
                            .decorator(Decorator::new("danger", BbFlag::new(DANGER, FlowAbortMode::None)))
                            .decorator(Decorator::new("enabled", BbFlag::new(ENABLED, FlowAbortMode::None)))
                            .logic([DecoratorLogic::Or(2), DecoratorLogic::Test(0), DecoratorLogic::Test(1)]),
                    )
                    .task(Task::new("fallback", Latent::new("fallback"))),
            )
            .unwrap()
    };

    let trees = manager(vec![build()]);
    let mut world = RecordingWorld::default();

    let mut blocked = component(&trees);
    blocked.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut blocked, &mut world, 2);
    assert_eq!(world.events, vec!["start:fallback"]);

    world.events.clear();
    let mut allowed = component(&trees);
    allowed.blackboard_mut().set(ENABLED, true);
    allowed.start_tree(&mut world, "main", ExecutionMode::Looped);
    run(&mut allowed, &mut world, 2);
    assert_eq!(world.events, vec!["start:guarded"]);
}

#[test]
fn decorator_logic_referencing_missing_decorator_is_rejected() {
    let result = TreeBuilder::new("main").build::<RecordingWorld>(
        Composite::selector("root").child(
            Child::task(Task::new("guarded", Latent::new("guarded")))
                .decorator(Decorator::new("danger", BbFlag::new(DANGER, FlowAbortMode::None)))
                .logic([DecoratorLogic::Test(3)]),
        ),
    );
    assert!(result.is_err());
}
