//! # netloom-executor - Executors for Reactors and Handlers
//!
//! Two kinds of threads run a netloom service:
//!
//! - **reactor workers**, each a [`LocalExecutorBuilder`] executor: a tokio current-thread
//!   runtime driving a `LocalSet`, optionally pinned to a CPU core. Sessions are spawned
//!   on them with [`spawn_local`] and never leave their worker.
//! - **handler threads**, any [`Executor`] such as a [`ThreadPool`] or a tokio runtime
//!   `Handle`. An [`ExecutorFilter`] placed in a chain moves the rest of that chain onto
//!   one, keeping the events of each session in order.
//!
//! ```text
//!   reactor worker                          ThreadPool
//!   ───────────────────────────────────     ─────────────────────────────
//!   head ─► LoggingFilter ─► codec ─► ExecutorFilter ═══► ... ─► tail ─► IoHandler
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use netloom_executor::{spawn_local, LocalExecutorBuilder};
//!
//! LocalExecutorBuilder::new()
//!     .name("reactor-0")
//!     .run(async {
//!         spawn_local(async { println!("session task") }).detach();
//!     })
//!     .unwrap();
//! ```

#![warn(rust_2018_idioms)]

pub(crate) mod filter;
pub(crate) mod local;
pub(crate) mod pool;

pub use core_affinity::CoreId;
pub use filter::{ExecutorFilter, IoEventType};
pub use local::{is_local_executor, spawn_local, yield_local, LocalExecutorBuilder, Task, TaskError};
pub use pool::{ExecuteError, Executor, Job, ThreadPool};
