//! Vigil: the supervision and dispatch core of a voice assistant
//! runtime. Commands flow through a bounded channel into a single
//! supervised dispatch loop, which consults a tiered reasoning gateway
//! and a persistent memory store, and speaks replies through a
//! serialized, cancellable speech sink. A healing arbiter watches the
//! loop from outside and restarts it when it stalls.

pub mod command;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod healing;
pub mod memory;
pub mod output;
pub mod supervisor;

pub use command::{Command, CommandChannel, CommandSource};
pub use config::Config;
pub use context::{ExitRequest, Heartbeat, InterruptFlag, RuntimeContext, EXIT_OK, EXIT_RESTART};
pub use dispatch::Dispatcher;
pub use supervisor::{Lifecycle, RunState, Supervisor};
