pub mod config;
pub mod logging;

pub mod control;
pub mod hooks;
pub mod job;
pub mod layout;
pub mod model;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod speed;
pub mod store;
