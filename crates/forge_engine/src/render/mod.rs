//! # Rendering
//!
//! Vulkan rendering behind the [`GpuDevice`] seam.
//!
//! - [`device`]: the device trait with its Vulkan and headless implementations
//! - [`buffer`], [`uniform`], [`descriptor`]: GPU resources, all RAII
//! - [`sync`]: semaphores, fences and frame-in-flight slots
//! - [`mesh`], [`camera`]: what gets drawn and from where
//! - [`gui`]: the overlay pass
//! - [`manager`]: per-frame orchestration

pub mod buffer;
pub mod camera;
pub mod descriptor;
pub mod device;
pub mod gui;
pub mod manager;
pub mod mesh;
pub mod sync;
pub mod uniform;
pub mod vertex;

pub use camera::Camera;
pub use device::{DeviceRef, GpuDevice, GpuError, GpuResult, HeadlessDevice, VulkanDevice};
pub use manager::{FrameOutcome, RenderManager};
pub use mesh::{MeshData, RenderObjectId};
pub use vertex::Vertex;
