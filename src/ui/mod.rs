//! TUI 层：Ratatui + crossterm，主循环（app）、按键映射（event）、渲染（render）

pub mod app;
pub mod event;
pub mod render;

pub use app::{run_app, App};
pub use event::{map_key, Action, EventHandler, Focus};
pub use render::draw;
