//! I/O adapters for the monitor: filesystem layout, markers, process control.

pub mod activity;
pub mod assess;
pub mod config;
pub mod launcher;
pub mod layout;
pub mod liveness;
pub mod lock;
pub mod markers;
pub mod message_bus;
pub mod process;
pub mod run_info;
pub mod stop_request;
pub mod terminate;
pub mod todo_file;
