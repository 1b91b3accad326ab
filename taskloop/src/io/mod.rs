//! Side-effecting helpers: the vault filesystem, logs, subprocesses and git.

pub mod audit;
pub mod claim;
pub mod clock;
pub mod config;
pub mod git;
pub mod memory;
pub mod paths;
pub mod process;
pub mod signals;
pub mod task_store;
