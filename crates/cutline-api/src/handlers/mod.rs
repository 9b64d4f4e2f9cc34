//! Request handlers.

pub mod health;
pub mod renders;

pub use health::{health, ready};
pub use renders::{cancel_render, get_render, submit_render};
