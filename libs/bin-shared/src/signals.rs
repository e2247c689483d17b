#[cfg(target_os = "linux")]
#[path = "signals/linux.rs"]
mod platform;

pub use platform::{Hangup, Terminate};
