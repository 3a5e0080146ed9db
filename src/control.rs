//! Control algorithms and the loop that drives them.

pub mod curve;
pub mod launcher;
pub mod machine;
pub mod pid;

pub use curve::Curve;
pub use launcher::Launcher;
pub use machine::Machine;
pub use pid::{Pid, PidBank};
