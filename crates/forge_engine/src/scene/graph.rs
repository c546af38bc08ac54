//! Scene graph storage and transform propagation
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. Each node
//! keeps its world transform plus a relative transform computed as the
//! component-wise difference from its parent's world transform.
//!
//! Propagation rules when a parent changes:
//! - location: `translation(unscaled(parent) * unscaled(relative))`
//! - rotation: `parent.rotation + relative.rotation`, then location as above
//! - scale: `parent.scale + relative.scale`
//!
//! Rotation and scale compose additively rather than through matrices. Scenes
//! and gameplay code are tuned against this behaviour, so it stays.

use log::warn;
use slotmap::SlotMap;

use super::component::{Component, ComponentId, ComponentKind};
use crate::foundation::math::{Transform, Vec3};
use crate::physics::BodyId;
use crate::render::RenderObjectId;

slotmap::new_key_type! {
    /// Stable handle to a node stored in a [`SceneGraph`]
    pub struct NodeId;
}

/// A game object in the hierarchy
#[derive(Debug, Clone)]
pub struct SceneNode {
    name: String,
    transform: Transform,
    relative: Transform,
    is_static: bool,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    components: Vec<ComponentId>,
}

impl SceneNode {
    fn new(name: String, transform: Transform, is_static: bool) -> Self {
        Self {
            name,
            transform,
            relative: Transform::zero(),
            is_static,
            parent: None,
            children: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// World transform
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Offset from the parent's world transform
    pub fn relative_transform(&self) -> &Transform {
        &self.relative
    }

    /// Whether the node was created as static scenery
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Parent node, if any
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Direct children in insertion order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Attached components in insertion order
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }
}

/// Arena of nodes and components
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, SceneNode>,
    components: SlotMap<ComponentId, Component>,
}

fn composed_location(parent: &Transform, local: &Transform) -> Vec3 {
    let full = parent.unscaled_matrix() * local.unscaled_matrix();
    Vec3::new(full[(0, 3)], full[(1, 3)], full[(2, 3)])
}

impl SceneGraph {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root node
    pub fn create_node(&mut self, name: impl Into<String>, transform: Transform) -> NodeId {
        self.nodes.insert(SceneNode::new(name.into(), transform, false))
    }

    /// Create a root node flagged as static scenery
    pub fn create_static_node(&mut self, name: impl Into<String>, transform: Transform) -> NodeId {
        self.nodes.insert(SceneNode::new(name.into(), transform, true))
    }

    /// Look up a node
    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id)
    }

    /// First node with the given name
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|(_, n)| n.name == name).map(|(id, _)| id)
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Nodes without a parent
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().filter(|(_, n)| n.parent.is_none()).map(|(id, _)| id)
    }

    /// Set the world location, optionally recomputing the offset from the
    /// parent, then cascade to components and children.
    pub fn set_location(&mut self, id: NodeId, location: Vec3, update_relative: bool) {
        let Some(node) = self.nodes.get_mut(id) else { return };
        node.transform.location = location;
        if update_relative {
            self.update_relative_transform(id);
        }

        let node = &self.nodes[id];
        let owner = node.transform;
        let components = node.components.clone();
        let children = node.children.clone();

        for component in components {
            self.update_component_location(component, &owner);
        }
        for child in children {
            self.update_object_location(child);
        }
    }

    /// Set the world rotation (Euler radians), optionally recomputing the
    /// offset from the parent, then cascade to components and children.
    pub fn set_rotation(&mut self, id: NodeId, rotation: Vec3, update_relative: bool) {
        let Some(node) = self.nodes.get_mut(id) else { return };
        node.transform.rotation = rotation;
        if update_relative {
            self.update_relative_transform(id);
        }

        let node = &self.nodes[id];
        let owner = node.transform;
        let components = node.components.clone();
        let children = node.children.clone();

        for component in components {
            self.update_component_rotation(component, &owner);
        }
        for child in children {
            self.update_object_rotation(child);
        }
    }

    /// Set the world scale, optionally recomputing the offset from the
    /// parent, then cascade to components and children.
    pub fn set_scale(&mut self, id: NodeId, scale: Vec3, update_relative: bool) {
        let Some(node) = self.nodes.get_mut(id) else { return };
        node.transform.scale = scale;
        if update_relative {
            self.update_relative_transform(id);
        }

        let node = &self.nodes[id];
        let owner = node.transform;
        let components = node.components.clone();
        let children = node.children.clone();

        for component in components {
            self.update_component_scale(component, &owner);
        }
        for child in children {
            self.update_object_scale(child);
        }
    }

    /// Set location, rotation and scale in one call
    pub fn set_transform(&mut self, id: NodeId, transform: &Transform, update_relative: bool) {
        self.set_location(id, transform.location, update_relative);
        self.set_rotation(id, transform.rotation, update_relative);
        self.set_scale(id, transform.scale, update_relative);
    }

    fn update_relative_transform(&mut self, id: NodeId) {
        let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) else { return };
        let Some(parent_transform) = self.nodes.get(parent).map(|p| p.transform) else { return };
        if let Some(node) = self.nodes.get_mut(id) {
            node.relative = node.transform.delta_from(&parent_transform);
        }
    }

    fn parent_transform(&self, id: NodeId) -> Option<Transform> {
        let parent = self.nodes.get(id)?.parent?;
        self.nodes.get(parent).map(|p| p.transform)
    }

    fn update_object_location(&mut self, id: NodeId) {
        let Some(parent) = self.parent_transform(id) else { return };
        let location = composed_location(&parent, &self.nodes[id].relative);
        self.set_location(id, location, false);
    }

    fn update_object_rotation(&mut self, id: NodeId) {
        let Some(parent) = self.parent_transform(id) else { return };
        let node = &mut self.nodes[id];
        node.transform.rotation = parent.rotation + node.relative.rotation;
        let rotation = node.transform.rotation;

        self.update_object_location(id);
        self.set_rotation(id, rotation, false);
    }

    fn update_object_scale(&mut self, id: NodeId) {
        let Some(parent) = self.parent_transform(id) else { return };
        let scale = parent.scale + self.nodes[id].relative.scale;
        self.set_scale(id, scale, false);
    }

    /// Parent `child` under `parent`, detaching it from any previous parent and
    /// recomputing its relative transform. Returns false if the link would
    /// create a cycle or either node is missing.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
            return false;
        }
        if parent == child || self.is_ancestor(child, parent) {
            warn!("Refusing to parent node {:?} under its own descendant {:?}", child, parent);
            return false;
        }

        if let Some(old_parent) = self.nodes[child].parent {
            if old_parent != parent {
                self.remove_child(old_parent, child);
            }
        }

        let parent_node = &mut self.nodes[parent];
        if !parent_node.children.contains(&child) {
            parent_node.children.push(child);
        }
        self.nodes[child].parent = Some(parent);
        self.update_relative_transform(child);
        true
    }

    /// Detach `child` from `parent`. No-op if it is not a child of `parent`.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        let Some(parent_node) = self.nodes.get_mut(parent) else { return };
        let before = parent_node.children.len();
        parent_node.children.retain(|&c| c != child);
        if parent_node.children.len() != before {
            if let Some(child_node) = self.nodes.get_mut(child) {
                child_node.parent = None;
            }
        }
    }

    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    /// Destroy a node, its whole subtree and every attached component.
    /// The removed components are returned so their resources can be released.
    pub fn destroy_node(&mut self, id: NodeId) -> Vec<Component> {
        if let Some(parent) = self.nodes.get(id).and_then(|n| n.parent) {
            self.remove_child(parent, id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.remove(current) else { continue };
            stack.extend(node.children);
            removed.extend(node.components.into_iter().filter_map(|c| self.components.remove(c)));
        }
        removed
    }

    /// Store a detached component. Returns `None` for a mesh whose render
    /// object already backs another component, since each render object has
    /// one uniform buffer per image and can only be drawn once per frame.
    pub fn create_component(&mut self, kind: ComponentKind) -> Option<ComponentId> {
        if let ComponentKind::Mesh { object } = kind {
            let shared = self
                .components
                .values()
                .any(|c| matches!(c.kind, ComponentKind::Mesh { object: other } if other == object));
            if shared {
                warn!("Render object {:?} already backs a mesh component", object);
                return None;
            }
        }
        Some(self.components.insert(Component::new(kind)))
    }

    /// Look up a component
    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    /// Mutable component access
    pub fn component_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.get_mut(id)
    }

    /// Attach a component to a node. The component takes the node's current
    /// transform with a zero offset. Attaching twice is a no-op; attaching a
    /// component owned elsewhere moves it.
    pub fn add_component(&mut self, node: NodeId, component: ComponentId) {
        let Some(owner) = self.nodes.get(node).map(|n| n.transform) else { return };
        let Some(previous_owner) = self.components.get(component).map(|c| c.owner) else { return };

        match previous_owner {
            Some(previous) if previous == node => return,
            Some(previous) => self.remove_component(previous, component),
            None => {}
        }

        self.nodes[node].components.push(component);
        let entry = &mut self.components[component];
        entry.owner = Some(node);
        entry.transform = owner;
        entry.relative = Transform::zero();
    }

    /// Detach a component from a node. No-op if it is not attached there.
    pub fn remove_component(&mut self, node: NodeId, component: ComponentId) {
        let Some(owner) = self.nodes.get_mut(node) else { return };
        let before = owner.components.len();
        owner.components.retain(|&c| c != component);
        if owner.components.len() != before {
            if let Some(entry) = self.components.get_mut(component) {
                entry.owner = None;
            }
        }
    }

    /// Detach and drop a component, returning it
    pub fn destroy_component(&mut self, component: ComponentId) -> Option<Component> {
        if let Some(owner) = self.components.get(component).and_then(|c| c.owner) {
            self.remove_component(owner, component);
        }
        self.components.remove(component)
    }

    /// Place a component in world space, keeping its offset from the owner in sync
    pub fn set_component_location(&mut self, id: ComponentId, location: Vec3) {
        let owner = self.component_owner_transform(id);
        let Some(component) = self.components.get_mut(id) else { return };
        component.transform.location = location;
        if let Some(owner) = owner {
            component.relative.location = location - owner.location;
        }
    }

    /// Rotate a component in world space, keeping its offset from the owner in sync
    pub fn set_component_rotation(&mut self, id: ComponentId, rotation: Vec3) {
        let owner = self.component_owner_transform(id);
        let Some(component) = self.components.get_mut(id) else { return };
        component.transform.rotation = rotation;
        if let Some(owner) = owner {
            component.relative.rotation = rotation - owner.rotation;
        }
    }

    /// Scale a component in world space, keeping its offset from the owner in sync
    pub fn set_component_scale(&mut self, id: ComponentId, scale: Vec3) {
        let owner = self.component_owner_transform(id);
        let Some(component) = self.components.get_mut(id) else { return };
        component.transform.scale = scale;
        if let Some(owner) = owner {
            component.relative.scale = scale - owner.scale;
        }
    }

    fn component_owner_transform(&self, id: ComponentId) -> Option<Transform> {
        let owner = self.components.get(id)?.owner?;
        self.nodes.get(owner).map(|n| n.transform)
    }

    fn update_component_location(&mut self, id: ComponentId, owner: &Transform) {
        if let Some(component) = self.components.get_mut(id) {
            component.transform.location = composed_location(owner, &component.relative);
        }
    }

    fn update_component_rotation(&mut self, id: ComponentId, owner: &Transform) {
        if let Some(component) = self.components.get_mut(id) {
            component.transform.rotation = owner.rotation + component.relative.rotation;
            component.transform.location = composed_location(owner, &component.relative);
        }
    }

    fn update_component_scale(&mut self, id: ComponentId, owner: &Transform) {
        if let Some(component) = self.components.get_mut(id) {
            component.transform.scale = owner.scale + component.relative.scale;
        }
    }

    /// Every mesh component with the transform it should be drawn at
    pub fn mesh_instances(&self) -> impl Iterator<Item = (RenderObjectId, &Transform)> + '_ {
        self.components.values().filter_map(|c| match c.kind {
            ComponentKind::Mesh { object } => Some((object, &c.transform)),
            _ => None,
        })
    }

    /// Rigid-body components with the mesh each one drives
    pub fn rigid_body_links(&self) -> Vec<(BodyId, Option<ComponentId>)> {
        self.components
            .values()
            .filter_map(|c| match c.kind {
                ComponentKind::RigidBody { body, attached_mesh } => Some((body, attached_mesh)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use slotmap::KeyData;
    use std::f32::consts::FRAC_PI_2;

    fn mesh_kind(n: u64) -> ComponentKind {
        ComponentKind::Mesh {
            object: RenderObjectId::from(KeyData::from_ffi(n)),
        }
    }

    fn chain(scene: &mut SceneGraph, depth: usize) -> Vec<NodeId> {
        let mut ids = vec![scene.create_node("root", Transform::identity())];
        for i in 1..depth {
            #[allow(clippy::cast_precision_loss)]
            let location = Vec3::new(i as f32, 2.0 * i as f32, 0.0);
            let id = scene.create_node(format!("node{i}"), Transform::from_location(location));
            assert!(scene.add_child(ids[i - 1], id));
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_root_translation_applied_once_at_every_depth() {
        let mut scene = SceneGraph::new();
        let ids = chain(&mut scene, 5);

        let before: Vec<Transform> = ids.iter().map(|&id| *scene.node(id).unwrap().transform()).collect();
        let relative_before: Vec<Transform> =
            ids.iter().map(|&id| *scene.node(id).unwrap().relative_transform()).collect();

        let shift = Vec3::new(3.0, -1.0, 0.5);
        scene.set_location(ids[0], before[0].location + shift, true);

        for (i, &id) in ids.iter().enumerate() {
            let node = scene.node(id).unwrap();
            assert_relative_eq!(node.transform().location, before[i].location + shift, epsilon = 1e-5);
            assert_eq!(*node.relative_transform(), relative_before[i]);
        }
    }

    #[test]
    fn test_three_level_scale_composes_additively() {
        let mut scene = SceneGraph::new();
        let root = scene.create_node("root", Transform::identity());
        let child = scene.create_node(
            "child",
            Transform::new(Vec3::zeros(), Vec3::zeros(), Vec3::new(1.5, 1.5, 1.5)),
        );
        let grandchild = scene.create_node(
            "grandchild",
            Transform::new(Vec3::zeros(), Vec3::zeros(), Vec3::new(3.0, 3.0, 3.0)),
        );
        scene.add_child(root, child);
        scene.add_child(child, grandchild);

        scene.set_scale(root, Vec3::new(2.0, 2.0, 2.0), true);

        let grandchild_node = scene.node(grandchild).unwrap();
        assert_relative_eq!(grandchild_node.relative_transform().scale, Vec3::new(1.5, 1.5, 1.5));
        assert_relative_eq!(scene.node(child).unwrap().transform().scale, Vec3::new(2.5, 2.5, 2.5));
        // 2 + 0.5 + 1.5, not 2 * 1.5 * 2
        assert_relative_eq!(grandchild_node.transform().scale, Vec3::new(4.0, 4.0, 4.0));
    }

    #[test]
    fn test_parent_rotation_orbits_child_location() {
        let mut scene = SceneGraph::new();
        let root = scene.create_node("root", Transform::identity());
        let child = scene.create_node("child", Transform::from_location(Vec3::new(1.0, 0.0, 0.0)));
        scene.add_child(root, child);

        scene.set_rotation(root, Vec3::new(0.0, 0.0, FRAC_PI_2), true);

        let child_node = scene.node(child).unwrap();
        assert_relative_eq!(child_node.transform().location, Vec3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(child_node.transform().rotation, Vec3::new(0.0, 0.0, FRAC_PI_2));
    }

    #[test]
    fn test_update_relative_without_parent_is_noop() {
        let mut scene = SceneGraph::new();
        let node = scene.create_node("lonely", Transform::identity());
        scene.set_location(node, Vec3::new(5.0, 0.0, 0.0), true);
        let node = scene.node(node).unwrap();
        assert_eq!(*node.relative_transform(), Transform::zero());
        assert_relative_eq!(node.transform().location, Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_render_object_backs_one_mesh_component() {
        let mut scene = SceneGraph::new();
        let first = scene.create_component(mesh_kind(4)).unwrap();
        assert!(scene.create_component(mesh_kind(4)).is_none());
        assert!(scene.create_component(mesh_kind(5)).is_some());

        scene.destroy_component(first);
        assert!(scene.create_component(mesh_kind(4)).is_some());
    }

    #[test]
    fn test_component_attach_is_unique_and_mirrors_owner() {
        let mut scene = SceneGraph::new();
        let node = scene.create_node("node", Transform::from_location(Vec3::new(1.0, 2.0, 3.0)));
        let mesh = scene.create_component(mesh_kind(1)).unwrap();

        scene.add_component(node, mesh);
        scene.add_component(node, mesh);

        assert_eq!(scene.node(node).unwrap().components(), &[mesh]);
        let component = scene.component(mesh).unwrap();
        assert_eq!(component.owner(), Some(node));
        assert_relative_eq!(component.transform().location, Vec3::new(1.0, 2.0, 3.0));

        scene.set_location(node, Vec3::new(4.0, 2.0, 3.0), true);
        assert_relative_eq!(scene.component(mesh).unwrap().transform().location, Vec3::new(4.0, 2.0, 3.0));
    }

    #[test]
    fn test_removing_non_member_component_is_noop() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", Transform::identity());
        let b = scene.create_node("b", Transform::identity());
        let mesh = scene.create_component(mesh_kind(1)).unwrap();
        scene.add_component(a, mesh);

        scene.remove_component(b, mesh);
        assert_eq!(scene.node(a).unwrap().components(), &[mesh]);
        assert_eq!(scene.component(mesh).unwrap().owner(), Some(a));

        scene.remove_component(a, mesh);
        assert!(scene.node(a).unwrap().components().is_empty());
        assert_eq!(scene.component(mesh).unwrap().owner(), None);
    }

    #[test]
    fn test_reattaching_component_moves_it() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", Transform::identity());
        let b = scene.create_node("b", Transform::from_location(Vec3::new(0.0, 9.0, 0.0)));
        let mesh = scene.create_component(mesh_kind(1)).unwrap();

        scene.add_component(a, mesh);
        scene.add_component(b, mesh);

        assert!(scene.node(a).unwrap().components().is_empty());
        assert_eq!(scene.node(b).unwrap().components(), &[mesh]);
        assert_relative_eq!(scene.component(mesh).unwrap().transform().location.y, 9.0);
    }

    #[test]
    fn test_destroy_cascades_to_subtree_and_components() {
        let mut scene = SceneGraph::new();
        let ids = chain(&mut scene, 3);
        let keep = scene.create_node("keep", Transform::identity());
        scene.add_child(ids[0], keep);

        let mesh = scene.create_component(mesh_kind(1)).unwrap();
        let other = scene.create_component(mesh_kind(2)).unwrap();
        scene.add_component(ids[2], mesh);
        scene.add_component(keep, other);

        let removed = scene.destroy_node(ids[1]);

        assert_eq!(removed.len(), 1);
        assert_eq!(scene.node_count(), 2);
        assert!(scene.node(ids[2]).is_none());
        assert!(scene.component(mesh).is_none());
        assert!(scene.component(other).is_some());
        assert_eq!(scene.node(ids[0]).unwrap().children(), &[keep]);
    }

    #[test]
    fn test_cycle_is_refused() {
        let mut scene = SceneGraph::new();
        let ids = chain(&mut scene, 3);

        assert!(!scene.add_child(ids[2], ids[0]));
        assert!(!scene.add_child(ids[1], ids[1]));
        assert_eq!(scene.node(ids[0]).unwrap().parent(), None);
        assert_eq!(scene.roots().count(), 1);
    }

    #[test]
    fn test_reparenting_recomputes_relative() {
        let mut scene = SceneGraph::new();
        let a = scene.create_node("a", Transform::from_location(Vec3::new(1.0, 0.0, 0.0)));
        let b = scene.create_node("b", Transform::from_location(Vec3::new(5.0, 0.0, 0.0)));
        let child = scene.create_node("child", Transform::from_location(Vec3::new(6.0, 0.0, 0.0)));

        scene.add_child(a, child);
        assert_relative_eq!(scene.node(child).unwrap().relative_transform().location.x, 5.0);

        scene.add_child(b, child);
        assert!(scene.node(a).unwrap().children().is_empty());
        assert_eq!(scene.node(child).unwrap().parent(), Some(b));
        assert_relative_eq!(scene.node(child).unwrap().relative_transform().location.x, 1.0);
    }

    #[test]
    fn test_mesh_instances_and_links() {
        let mut scene = SceneGraph::new();
        let mesh = scene.create_component(mesh_kind(7)).unwrap();
        let body = BodyId::from(KeyData::from_ffi(3));
        scene.create_component(ComponentKind::RigidBody { body, attached_mesh: Some(mesh) }).unwrap();

        assert_eq!(scene.mesh_instances().count(), 1);
        assert_eq!(scene.rigid_body_links(), vec![(body, Some(mesh))]);
        assert_eq!(scene.find_node("missing"), None);
    }
}
