//! Deadline-bounded, cancellable execution for agent tools.
//!
//! Every call to [`SandboxExecutor::execute`] takes an explicit deadline and a
//! cancellation token. The process it starts runs in its own process group
//! with a cleared environment and a private scratch directory; on deadline or
//! cancellation the entire group is killed and the call returns promptly
//! with the output captured so far. Nothing the call creates outlives it.
//!
//! [`bounded`] applies the same deadline/cancel discipline to in-process
//! futures such as HTTP fetches.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use superagent_sandbox::{Language, Operation, SandboxConfig, SandboxExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() {
//! let executor = SandboxExecutor::new(SandboxConfig::default());
//! let op = Operation::script(Language::Python, "print('hello')");
//! let result = executor
//!     .execute(&op, Duration::from_secs(10), &CancellationToken::new())
//!     .await;
//! println!("{}", result.to_observation());
//! # }
//! ```

mod bounded;
mod capture;
mod config;
mod error;
mod executor;
mod operation;
mod scope;

pub use bounded::bounded;
pub use capture::Captured;
pub use config::SandboxConfig;
pub use error::{Interrupted, SandboxError, SandboxResult};
pub use executor::SandboxExecutor;
pub use operation::{Language, Operation};
