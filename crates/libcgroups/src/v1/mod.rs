mod controller;
pub mod controller_type;
mod cpu;
pub mod manager;
mod memory;
mod pids;
pub mod util;

pub use controller_type::ControllerType;
