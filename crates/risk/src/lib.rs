pub mod gate;

pub use gate::{check_exit, ExitReason};
