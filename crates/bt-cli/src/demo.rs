//! The guard demo: agents patrol through a subtree and flee when their
//! sensing service raises a threat, with a cooldown between escapes.

use std::collections::HashMap;

use bt_core::rng::derive_seed;
use bt_core::{BbKey, DeterministicRng, SplitMix64, WorldMut, WorldView};
use bt_engine::{
    AuxiliaryNode, BtNode, Child, Composite, Decorator, DecoratorNode, FlowAbortMode, MemoryBlock, NodeCx,
    NodeResult, RunSubtree, Service, ServiceDefaults, ServiceNode, Task, TaskNode, TreeBuilder, TreeManager,
};

pub const GUARD: &str = "guard";
pub const PATROL: &str = "patrol";

const THREAT: BbKey<bool> = BbKey::new(1);
const FLEE_COOLDOWN: &str = "flee";

#[derive(Debug, Default, Clone, Copy)]
pub struct Stats {
    pub patrol_legs: u64,
    pub escapes: u64,
    pub alarms: u64,
}

/// Shared simulation state. Each agent draws from its own random stream.
#[derive(Debug, Default)]
pub struct SimWorld {
    seed: u64,
    rngs: HashMap<u64, SplitMix64>,
    pub stats: Stats,
}

impl SimWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    fn roll(&mut self, agent: u64) -> f32 {
        let seed = self.seed;
        self.rngs
            .entry(agent)
            .or_insert_with(|| SplitMix64::new(derive_seed(seed, agent, 0)))
            .next_f32_unit()
    }
}

impl WorldView for SimWorld {
    type Agent = u64;
}

impl WorldMut for SimWorld {}

type Cx<'a> = NodeCx<'a, SimWorld>;

#[derive(Debug, Clone, Copy)]
enum Activity {
    Walk,
    Look,
    Flee,
}

/// Latent task that finishes after `duration` seconds of ticks.
#[derive(Debug)]
struct Timed {
    activity: Activity,
    duration: f32,
}

impl BtNode for Timed {
    fn describe(&self) -> String {
        format!("{:?} for {:.1}s", self.activity, self.duration)
    }

    fn init_memory(&self) -> Option<Box<dyn MemoryBlock>> {
        Some(Box::new(0.0f32))
    }

    fn describe_runtime(&self, memory: Option<&dyn MemoryBlock>) -> Vec<String> {
        memory
            .and_then(|m| m.as_any().downcast_ref::<f32>())
            .map(|elapsed| vec![format!("elapsed {elapsed:.2}s")])
            .unwrap_or_default()
    }
}

impl TaskNode<SimWorld> for Timed {
    fn execute_task(&self, cx: &mut Cx<'_>) -> NodeResult {
        match cx.memory::<f32>() {
            Some(elapsed) => *elapsed = 0.0,
            None => return NodeResult::Failed,
        }
        NodeResult::InProgress
    }

    fn wants_tick(&self) -> bool {
        true
    }

    fn tick_task(&self, cx: &mut Cx<'_>, dt: f32) {
        let done = match cx.memory::<f32>() {
            Some(elapsed) => {
                *elapsed += dt;
                *elapsed >= self.duration
            }
            None => false,
        };
        if !done {
            return;
        }
        let stats = &mut cx.world_mut().stats;
        match self.activity {
            Activity::Walk => stats.patrol_legs += 1,
            Activity::Look => {}
            Activity::Flee => stats.escapes += 1,
        }
        cx.finish_latent_task(NodeResult::Succeeded);
    }

    fn on_task_finished(&self, cx: &mut Cx<'_>, result: NodeResult) {
        if matches!(self.activity, Activity::Flee) && result == NodeResult::Succeeded {
            cx.add_cooldown(FLEE_COOLDOWN, 2.0, false);
        }
    }
}

/// Raises or clears the threat flag on every service tick.
#[derive(Debug)]
struct Sense {
    chance: f32,
}

impl BtNode for Sense {}

impl AuxiliaryNode<SimWorld> for Sense {
    fn tick_node(&self, cx: &mut Cx<'_>, _dt: f32) {
        let agent = cx.agent();
        let threat = cx.world_mut().roll(agent) < self.chance;
        if cx.blackboard_mut().set_if_changed(THREAT, threat) && threat {
            cx.world_mut().stats.alarms += 1;
        }
    }
}

impl ServiceNode<SimWorld> for Sense {}

#[derive(Debug)]
struct Threatened;

impl BtNode for Threatened {}

impl AuxiliaryNode<SimWorld> for Threatened {}

impl DecoratorNode<SimWorld> for Threatened {
    fn calculate_raw_condition(&self, cx: &mut Cx<'_>) -> bool {
        cx.blackboard().get(THREAT).copied().unwrap_or(false)
    }

    fn flow_abort_mode(&self) -> FlowAbortMode {
        FlowAbortMode::Both
    }

    fn observes_key(&self, key: u64) -> bool {
        key == THREAT.id()
    }
}

#[derive(Debug)]
struct Rested;

impl BtNode for Rested {}

impl AuxiliaryNode<SimWorld> for Rested {}

impl DecoratorNode<SimWorld> for Rested {
    fn calculate_raw_condition(&self, cx: &mut Cx<'_>) -> bool {
        !cx.is_cooling_down(FLEE_COOLDOWN)
    }
}

fn guard_tree(service: &ServiceDefaults) -> bt_engine::Result<bt_engine::BehaviorTree<SimWorld>> {
    TreeBuilder::new(GUARD).service_defaults(service).build(
        Composite::selector("guard_root")
            .service(Service::new("sense", Sense { chance: 0.15 }))
            .child(
                Child::task(Task::new(
                    "flee",
                    Timed {
                        activity: Activity::Flee,
                        duration: 1.0,
                    },
                ))
                .decorator(Decorator::new("threatened", Threatened))
                .decorator(Decorator::new("rested", Rested)),
            )
            .task(Task::new("run_patrol", RunSubtree::new(PATROL))),
    )
}

fn patrol_tree(service: &ServiceDefaults) -> bt_engine::Result<bt_engine::BehaviorTree<SimWorld>> {
    TreeBuilder::new(PATROL).service_defaults(service).build(
        Composite::sequence("patrol_root")
            .task(Task::new(
                "walk",
                Timed {
                    activity: Activity::Walk,
                    duration: 0.6,
                },
            ))
            .task(Task::new(
                "look",
                Timed {
                    activity: Activity::Look,
                    duration: 0.3,
                },
            )),
    )
}

/// Asset cache with both demo trees registered for lazy building.
pub fn tree_manager(service: ServiceDefaults) -> TreeManager<SimWorld> {
    let mut trees = TreeManager::new();
    trees.register_with(GUARD, move || guard_tree(&service));
    trees.register_with(PATROL, move || patrol_tree(&service));
    trees
}
