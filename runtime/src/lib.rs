//! # BPM Connector Runtime
//!
//! The long-running side of a connector.
//!
//! ## Core Components
//!
//! - **Supervisor**: connects, subscribes with a prefetch of one, feeds each
//!   delivery through validation and the injected handler, replies to
//!   synchronous callers, acknowledges, and reconnects on transport failure
//! - **Reconnect policy**: delay between a torn-down session and the next attempt
//! - **Shutdown hook**: closes the current sessions exactly once at process exit
//! - **Counters**: `metrics` counters for deliveries, replies and reconnects
//!
//! ## Example
//!
//! ```ignore
//! use bpm_connector_runtime::Supervisor;
//! use std::sync::Arc;
//!
//! let supervisor = Supervisor::new(config, transport, engine, Arc::new(MyHandler))
//!     .with_logging_transport(logging_transport);
//!
//! // Runs until Ctrl+C or a delivery fails header validation
//! supervisor.run_until(tokio::signal::ctrl_c()).await?;
//! ```

pub mod counters;
pub mod reconnect;
pub mod shutdown;
pub mod supervisor;

pub use counters::describe_metrics;
pub use reconnect::{ReconnectPolicy, ReconnectPolicyBuilder};
pub use shutdown::ShutdownHook;
pub use supervisor::{ConnectorState, PREFETCH_COUNT, Supervisor, SupervisorError};
