//! Capabilities shipped with the server binary

mod screen;
mod shell;

pub use screen::{Screen, Screenshot, SCREEN_CAPABILITY_ID, SCREEN_PACKET};
pub use shell::{Shell, SHELL_CAPABILITY_ID, SHELL_PACKET};
