//! Application trait and lifecycle management

use crate::engine::{Engine, EngineError};
use crate::render::gui::GuiDrawData;
use thiserror::Error;

/// Application lifecycle trait
///
/// Implement this trait to create your game using the engine. The engine
/// calls the methods in this order every frame: `poll_events`, `update`,
/// `on_gui`; physics and rendering follow.
pub trait Application {
    /// Initialize the application
    ///
    /// Called once after the engine is initialized. Use this to build the
    /// initial scene and physics bodies.
    fn initialize(&mut self, engine: &mut Engine) -> Result<(), AppError>;

    /// Update the application
    ///
    /// # Arguments
    /// * `engine` - Mutable reference to the engine
    /// * `delta_time` - Time since last frame in seconds
    fn update(&mut self, engine: &mut Engine, delta_time: f32) -> Result<(), AppError>;

    /// Events gathered by the windowing layer since the last frame
    fn poll_events(&mut self) -> Vec<AppEvent> {
        Vec::new()
    }

    /// Add overlay geometry for this frame. `draw_data` already holds what
    /// the installed GUI layer produced.
    fn on_gui(&mut self, _engine: &Engine, _draw_data: &mut GuiDrawData) {}

    /// Cleanup the application
    ///
    /// Called when the application is shutting down, before the GPU is
    /// drained and resources are released.
    fn cleanup(&mut self, engine: &mut Engine);
}

/// Application-level errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Engine error propagated to application level
    #[error("Engine error: {0}")]
    Engine(#[from] Box<EngineError>),

    /// Custom application error
    #[error("Application error: {0}")]
    Custom(String),

    /// Game logic error
    #[error("Game logic error: {0}")]
    GameLogic(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        Self::Engine(Box::new(err))
    }
}

/// Application events
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// Window framebuffer was resized
    WindowResized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },

    /// Window close requested
    WindowCloseRequested,

    /// Key input event
    KeyInput {
        /// The key that was pressed/released
        key: crate::input::KeyCode,
        /// Whether the key was pressed (true) or released (false)
        pressed: bool,
    },

    /// Mouse button event
    MouseButton {
        /// The mouse button that was pressed/released
        button: crate::input::MouseButton,
        /// Whether the button was pressed (true) or released (false)
        pressed: bool,
    },

    /// Mouse movement
    MouseMoved {
        /// New X coordinate
        x: f64,
        /// New Y coordinate
        y: f64,
    },
}
