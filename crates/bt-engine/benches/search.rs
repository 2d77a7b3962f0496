use std::rc::Rc;

use bt_core::{BbKey, TickContext, WorldMut, WorldView};
use bt_engine::{
    AuxiliaryNode, BehaviorTreeComponent, BtNode, Child, Composite, Decorator, DecoratorNode, EngineConfig,
    ExecutionMode, FlowAbortMode, NodeCx, NodeResult, Task, TaskNode, TreeBuilder, TreeManager,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[derive(Default)]
struct World;

impl WorldView for World {
    type Agent = u64;
}

impl WorldMut for World {}

struct Succeed;

impl BtNode for Succeed {}

impl TaskNode<World> for Succeed {
    fn execute_task(&self, _cx: &mut NodeCx<'_, World>) -> NodeResult {
        NodeResult::Succeeded
    }
}

struct Wait;

impl BtNode for Wait {}

impl TaskNode<World> for Wait {
    fn execute_task(&self, _cx: &mut NodeCx<'_, World>) -> NodeResult {
        NodeResult::InProgress
    }
}

struct Flag(BbKey<bool>);

impl BtNode for Flag {}

impl AuxiliaryNode<World> for Flag {}

impl DecoratorNode<World> for Flag {
    fn calculate_raw_condition(&self, cx: &mut NodeCx<'_, World>) -> bool {
        cx.blackboard().get(self.0).copied().unwrap_or(false)
    }

    fn flow_abort_mode(&self) -> FlowAbortMode {
        FlowAbortMode::Both
    }

    fn observes_key(&self, key: u64) -> bool {
        key == self.0.id()
    }
}

fn ticker(trees: &Rc<TreeManager<World>>, world: &mut World) -> BehaviorTreeComponent<World> {
    let mut comp = BehaviorTreeComponent::<World>::new(1u64, trees.clone(), EngineConfig::default());
    comp.start_tree(world, "main", ExecutionMode::Looped);
    comp
}

fn bench_sequence_search(c: &mut Criterion) {
    let mut root = Composite::sequence("root");
    for i in 0..16 {
        root = root.task(Task::new(format!("step{i}"), Succeed));
    }
    let trees = TreeManager::new();
    trees.register(TreeBuilder::new("main").build(root).expect("tree builds"));
    let trees = Rc::new(trees);
    let mut world = World;
    let mut comp = ticker(&trees, &mut world);

    let mut tick: u64 = 0;
    c.bench_function("bt-engine/tick(sequence=16)", |b| {
        b.iter(|| {
            let ctx = TickContext {
                tick,
                dt_seconds: 0.1,
                seed: 0,
            };
            black_box(comp.tick(&ctx, &mut world));
            tick = tick.wrapping_add(1);
        })
    });
}

fn bench_lower_priority_abort(c: &mut Criterion) {
    const GUARDS: u64 = 16;
    let mut root = Composite::selector("root");
    for i in 0..GUARDS {
        root = root.child(
            Child::task(Task::new(format!("guarded{i}"), Wait))
                .decorator(Decorator::new(format!("guard{i}"), Flag(BbKey::new(i)))),
        );
    }
    root = root.task(Task::new("idle", Wait));
    let trees = TreeManager::new();
    trees.register(TreeBuilder::new("main").build(root).expect("tree builds"));
    let trees = Rc::new(trees);
    let mut world = World;
    let mut comp = ticker(&trees, &mut world);

    // Toggling the last guard alternates between preempting idle and
    // leaving the guarded branch again.
    let last = BbKey::<bool>::new(GUARDS - 1);
    let mut tick: u64 = 0;
    c.bench_function("bt-engine/abort(guards=16)", |b| {
        b.iter(|| {
            let ctx = TickContext {
                tick,
                dt_seconds: 0.1,
                seed: 0,
            };
            comp.blackboard_mut().set(last, tick % 2 == 0);
            comp.tick(&ctx, &mut world);
            black_box(comp.active_node());
            tick = tick.wrapping_add(1);
        })
    });
}

criterion_group!(benches, bench_sequence_search, bench_lower_priority_abort);
criterion_main!(benches);
