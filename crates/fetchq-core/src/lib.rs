pub mod config;
pub mod logging;

pub mod control;
pub mod engine;
pub mod history;
pub mod jobspec;
pub mod notify;
pub mod probe;
pub mod report;
pub mod scheduler;
pub mod status;
pub mod transfer;
