//! Components attach render and physics resources to scene nodes

use super::NodeId;
use crate::foundation::math::Transform;
use crate::physics::{BodyId, TriggerId};
use crate::render::RenderObjectId;

slotmap::new_key_type! {
    /// Stable handle to a component stored in a [`super::SceneGraph`]
    pub struct ComponentId;
}

/// What a component does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    /// Draws a render object at the component transform
    Mesh {
        /// Render object owned by the render manager
        object: RenderObjectId,
    },
    /// Links a physics body to the scene. When `attached_mesh` is set, that
    /// mesh follows the interpolated body transform every frame.
    RigidBody {
        /// Body owned by the physics manager
        body: BodyId,
        /// Mesh component driven by the body
        attached_mesh: Option<ComponentId>,
    },
    /// Sensor volume reporting overlap with rigid bodies
    Trigger {
        /// Trigger owned by the physics manager
        trigger: TriggerId,
    },
}

/// A component and its cached transforms
#[derive(Debug, Clone)]
pub struct Component {
    pub(crate) kind: ComponentKind,
    pub(crate) owner: Option<NodeId>,
    pub(crate) transform: Transform,
    pub(crate) relative: Transform,
}

impl Component {
    pub(crate) fn new(kind: ComponentKind) -> Self {
        Self {
            kind,
            owner: None,
            transform: Transform::identity(),
            relative: Transform::zero(),
        }
    }

    /// Component kind and the resource it references
    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    /// Node the component is attached to
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// World transform mirrored from the owner plus the relative offset
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Offset from the owner, component-wise
    pub fn relative_transform(&self) -> &Transform {
        &self.relative
    }

    /// Attach a mesh to a rigid-body component. Ignored for other kinds.
    pub fn attach_to_mesh(&mut self, mesh: ComponentId) {
        if let ComponentKind::RigidBody { attached_mesh, .. } = &mut self.kind {
            *attached_mesh = Some(mesh);
        }
    }
}
