//! Platform layer for the frame lifecycle core.
//!
//! - Window management and the presentation surface via winit
//! - Vulkan surface creation and RAII destruction
//! - Keyboard input with an id-keyed listener registry

mod input;
mod window;

pub use input::{InputResult, InputState, KeyCode, KeyEvent, ListenerId, Listeners, Modifiers};
pub use window::{Surface, Window, required_extensions};

// Re-export winit types that users might need
pub use winit::event::{Event, WindowEvent};
pub use winit::event_loop::EventLoop;
