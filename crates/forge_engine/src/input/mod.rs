//! Input management system
//!
//! The windowing layer pushes raw events in through the `handle_*` methods;
//! game logic only queries state.

use std::collections::HashSet;

use crate::foundation::math::Vec2;

/// Keyboard and mouse state for the current frame
#[derive(Debug)]
pub struct InputManager {
    keys_down: HashSet<KeyCode>,
    keys_pressed: HashSet<KeyCode>,
    keys_released: HashSet<KeyCode>,
    buttons_down: HashSet<MouseButton>,
    buttons_pressed: HashSet<MouseButton>,
    cursor_position: Vec2,
    cursor_delta: Vec2,
    cursor_mode: CursorMode,
}

impl InputManager {
    /// Create a new input manager
    pub fn new() -> Self {
        Self {
            keys_down: HashSet::new(),
            keys_pressed: HashSet::new(),
            keys_released: HashSet::new(),
            buttons_down: HashSet::new(),
            buttons_pressed: HashSet::new(),
            cursor_position: Vec2::zeros(),
            cursor_delta: Vec2::zeros(),
            cursor_mode: CursorMode::Normal,
        }
    }

    /// Clear per-frame edge state. Called once at the end of every frame.
    pub fn update(&mut self) {
        self.keys_pressed.clear();
        self.keys_released.clear();
        self.buttons_pressed.clear();
        self.cursor_delta = Vec2::zeros();
    }

    /// Handle key input
    pub fn handle_key_input(&mut self, key: KeyCode, pressed: bool) {
        if pressed {
            if self.keys_down.insert(key) {
                self.keys_pressed.insert(key);
            }
        } else if self.keys_down.remove(&key) {
            self.keys_released.insert(key);
        }
    }

    /// Handle mouse button input
    pub fn handle_mouse_button(&mut self, button: MouseButton, pressed: bool) {
        if pressed {
            if self.buttons_down.insert(button) {
                self.buttons_pressed.insert(button);
            }
        } else {
            self.buttons_down.remove(&button);
        }
    }

    /// Handle mouse movement
    pub fn handle_mouse_move(&mut self, x: f64, y: f64) {
        #[allow(clippy::cast_possible_truncation)]
        let position = Vec2::new(x as f32, y as f32);
        self.cursor_delta += position - self.cursor_position;
        self.cursor_position = position;
    }

    /// Key is currently held
    pub fn is_key_down(&self, key: KeyCode) -> bool {
        self.keys_down.contains(&key)
    }

    /// Key went down this frame
    pub fn is_key_pressed(&self, key: KeyCode) -> bool {
        self.keys_pressed.contains(&key)
    }

    /// Key went up this frame
    pub fn is_key_released(&self, key: KeyCode) -> bool {
        self.keys_released.contains(&key)
    }

    /// Mouse button is currently held
    pub fn is_mouse_down(&self, button: MouseButton) -> bool {
        self.buttons_down.contains(&button)
    }

    /// Mouse button went down this frame
    pub fn is_mouse_pressed(&self, button: MouseButton) -> bool {
        self.buttons_pressed.contains(&button)
    }

    /// Cursor position in window pixels
    pub fn cursor_position(&self) -> Vec2 {
        self.cursor_position
    }

    /// Cursor movement accumulated since the last `update`
    pub fn cursor_delta(&self) -> Vec2 {
        self.cursor_delta
    }

    /// Requested cursor mode; the windowing layer applies it
    pub fn cursor_mode(&self) -> CursorMode {
        self.cursor_mode
    }

    /// Request a cursor mode
    pub fn set_cursor_mode(&mut self, mode: CursorMode) {
        self.cursor_mode = mode;
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Key codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    /// A key
    A,
    /// D key
    D,
    /// E key
    E,
    /// Q key
    Q,
    /// S key
    S,
    /// W key
    W,
    /// Space key
    Space,
    /// Left shift
    LeftShift,
    /// Enter key
    Enter,
    /// Escape key
    Escape,
    /// Up arrow
    Up,
    /// Down arrow
    Down,
    /// Left arrow
    Left,
    /// Right arrow
    Right,
}

/// Mouse buttons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    /// Left mouse button
    Left,
    /// Right mouse button
    Right,
    /// Middle mouse button
    Middle,
}

/// Cursor visibility and capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CursorMode {
    /// Visible and free
    #[default]
    Normal,
    /// Invisible over the window
    Hidden,
    /// Invisible and locked to the window, for camera look
    Grabbed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_edges_last_one_frame() {
        let mut input = InputManager::new();
        input.handle_key_input(KeyCode::Space, true);
        assert!(input.is_key_pressed(KeyCode::Space));
        assert!(input.is_key_down(KeyCode::Space));

        input.update();
        assert!(!input.is_key_pressed(KeyCode::Space));
        assert!(input.is_key_down(KeyCode::Space));

        input.handle_key_input(KeyCode::Space, false);
        assert!(input.is_key_released(KeyCode::Space));
        assert!(!input.is_key_down(KeyCode::Space));
    }

    #[test]
    fn test_cursor_delta_accumulates_until_update() {
        let mut input = InputManager::new();
        input.handle_mouse_move(10.0, 5.0);
        input.handle_mouse_move(12.0, 4.0);
        assert_eq!(input.cursor_delta(), Vec2::new(12.0, 4.0));
        input.update();
        assert_eq!(input.cursor_delta(), Vec2::zeros());
        assert_eq!(input.cursor_position(), Vec2::new(12.0, 4.0));
    }
}
