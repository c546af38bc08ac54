//! Per-object game logic
//!
//! A [`Behaviour`] is attached to one scene node. The [`LogicManager`] calls
//! its `start` hook once, on the first frame after attachment, and `update`
//! on every frame after that (the starting frame included). Behaviours of
//! destroyed nodes are dropped before the next run.

use log::debug;
use slotmap::SecondaryMap;

use super::graph::{NodeId, SceneGraph};
use crate::input::InputManager;
use crate::physics::PhysicsManager;

/// What a behaviour can reach while it runs
pub struct BehaviourContext<'a> {
    /// Node the behaviour is attached to
    pub node: NodeId,
    /// Scene the node lives in
    pub scene: &'a mut SceneGraph,
    /// Physics bodies and triggers
    pub physics: &'a mut PhysicsManager,
    /// Input state for this frame
    pub input: &'a InputManager,
    /// Seconds since the previous frame
    pub delta_time: f32,
}

/// Game logic bound to a scene node
pub trait Behaviour {
    /// Called once before the first `update`
    fn start(&mut self, _ctx: &mut BehaviourContext<'_>) {}

    /// Called every frame before the physics step
    fn update(&mut self, ctx: &mut BehaviourContext<'_>);
}

struct BehaviourSlot {
    behaviour: Box<dyn Behaviour>,
    started: bool,
}

/// Owns the behaviours of every node and drives their hooks
#[derive(Default)]
pub struct LogicManager {
    behaviours: SecondaryMap<NodeId, BehaviourSlot>,
}

impl LogicManager {
    /// Empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `behaviour` to `node`, replacing any previous one. Returns
    /// `false` and drops the behaviour if the node does not exist.
    pub fn attach(&mut self, scene: &SceneGraph, node: NodeId, behaviour: Box<dyn Behaviour>) -> bool {
        if scene.node(node).is_none() {
            return false;
        }
        self.behaviours.insert(
            node,
            BehaviourSlot {
                behaviour,
                started: false,
            },
        );
        true
    }

    /// Detach and return the behaviour of `node`
    pub fn detach(&mut self, node: NodeId) -> Option<Box<dyn Behaviour>> {
        self.behaviours.remove(node).map(|slot| slot.behaviour)
    }

    /// Whether `node` has a behaviour
    pub fn contains(&self, node: NodeId) -> bool {
        self.behaviours.contains_key(node)
    }

    /// Number of attached behaviours
    pub fn len(&self) -> usize {
        self.behaviours.len()
    }

    /// True when no behaviour is attached
    pub fn is_empty(&self) -> bool {
        self.behaviours.is_empty()
    }

    /// Drop behaviours whose node is gone
    pub fn prune(&mut self, scene: &SceneGraph) {
        let before = self.behaviours.len();
        self.behaviours.retain(|node, _| scene.node(node).is_some());
        let dropped = before - self.behaviours.len();
        if dropped > 0 {
            debug!("Dropped {} behaviours of destroyed nodes", dropped);
        }
    }

    /// Run pending `start` hooks, then every `update`
    pub fn run(&mut self, scene: &mut SceneGraph, physics: &mut PhysicsManager, input: &InputManager, delta_time: f32) {
        self.prune(scene);
        for (node, slot) in &mut self.behaviours {
            // an earlier behaviour may have destroyed this node during the pass
            if scene.node(node).is_none() {
                continue;
            }
            let mut ctx = BehaviourContext {
                node,
                scene: &mut *scene,
                physics: &mut *physics,
                input,
                delta_time,
            };
            if !slot.started {
                slot.started = true;
                slot.behaviour.start(&mut ctx);
            }
            slot.behaviour.update(&mut ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::core::config::PhysicsConfig;
    use crate::foundation::math::{Transform, Vec3};
    use approx::assert_relative_eq;

    #[derive(Default)]
    struct Counts {
        starts: u32,
        updates: u32,
    }

    struct Mover(Rc<RefCell<Counts>>);

    impl Behaviour for Mover {
        fn start(&mut self, _ctx: &mut BehaviourContext<'_>) {
            self.0.borrow_mut().starts += 1;
        }

        fn update(&mut self, ctx: &mut BehaviourContext<'_>) {
            self.0.borrow_mut().updates += 1;
            let Some(location) = ctx.scene.node(ctx.node).map(|n| n.transform().location) else {
                return;
            };
            ctx.scene
                .set_location(ctx.node, location + Vec3::new(ctx.delta_time, 0.0, 0.0), true);
        }
    }

    fn fixtures() -> (SceneGraph, PhysicsManager, InputManager) {
        (
            SceneGraph::new(),
            PhysicsManager::new(&PhysicsConfig::default()),
            InputManager::new(),
        )
    }

    #[test]
    fn test_start_runs_once_and_update_every_frame() {
        let (mut scene, mut physics, input) = fixtures();
        let node = scene.create_node("mover", Transform::identity());
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut logic = LogicManager::new();
        assert!(logic.attach(&scene, node, Box::new(Mover(counts.clone()))));

        for _ in 0..3 {
            logic.run(&mut scene, &mut physics, &input, 0.5);
        }

        assert_eq!(counts.borrow().starts, 1);
        assert_eq!(counts.borrow().updates, 3);
        assert_relative_eq!(scene.node(node).unwrap().transform().location, Vec3::new(1.5, 0.0, 0.0));
    }

    #[test]
    fn test_destroyed_node_stops_updating() {
        let (mut scene, mut physics, input) = fixtures();
        let parent = scene.create_node("parent", Transform::identity());
        let child = scene.create_node("child", Transform::identity());
        scene.add_child(parent, child);
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut logic = LogicManager::new();
        logic.attach(&scene, child, Box::new(Mover(counts.clone())));

        logic.run(&mut scene, &mut physics, &input, 0.1);
        scene.destroy_node(parent);
        logic.run(&mut scene, &mut physics, &input, 0.1);

        assert_eq!(counts.borrow().updates, 1);
        assert!(logic.is_empty());
        // the behaviour itself was dropped
        assert_eq!(Rc::strong_count(&counts), 1);
    }

    #[test]
    fn test_attach_to_missing_node_is_refused() {
        let (mut scene, _, _) = fixtures();
        let node = scene.create_node("gone", Transform::identity());
        scene.destroy_node(node);
        let mut logic = LogicManager::new();
        let counts = Rc::new(RefCell::new(Counts::default()));

        assert!(!logic.attach(&scene, node, Box::new(Mover(counts))));
        assert!(!logic.contains(node));
    }
}
