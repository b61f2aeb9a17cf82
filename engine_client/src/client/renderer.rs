//! Rendering abstraction. The session never touches a window, a GL context,
//! or an asset loader directly — it draws through this trait and the rest
//! of the engine wires in a real implementation.

use engine_shared::math::{Quat, Vec3};

/// Draws one replicated entity. Implementations own whatever asset cache,
/// GL/Vulkan context, or scene graph they need; the session only ever calls
/// this once per visible entity per frame.
pub trait Renderer {
    fn draw_model(&self, model_name: &str, position: Vec3, rotation: Quat);
}

/// Renders nothing. Used by tests and headless server-adjacent tooling.
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw_model(&self, _model_name: &str, _position: Vec3, _rotation: Quat) {}
}
