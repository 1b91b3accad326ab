//! File-backed task pipeline with risk-gated approval.
//!
//! Tasks are markdown files that move between queue directories of a vault
//! (Inbox, Needs_Action, Awaiting_Approval, In_Progress, Done, Failed). The
//! crate is split the same way as the pipeline:
//!
//! - **[`core`]**: Pure logic (classification, gating, step parsing, queue
//!   rules, note text). No I/O.
//! - **[`io`]**: Side effects (task store, claims, audit/memory/signal
//!   files, subprocesses, git).
//!
//! Orchestration modules combine the two: [`triage`], [`review`],
//! [`decide`] and [`outcome`] move single tasks; [`execute`] runs the
//! plan/act/observe/reflect loop; [`watch`] polls queues; [`supervisor`],
//! [`sync`] and [`health`] keep a deployment running.

pub mod core;
pub mod decide;
pub mod execute;
pub mod exit_codes;
pub mod health;
pub mod io;
pub mod logging;
pub mod outcome;
pub mod retry;
pub mod review;
pub mod shutdown;
pub mod supervisor;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod triage;
pub mod vault;
pub mod watch;
