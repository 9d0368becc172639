//! # Fleet Runtime
//!
//! Command and event routing glue between the services.
//!
//! ## Modules
//!
//! - `config`: [`RuntimeConfig`] from the environment
//! - `topology`: exchanges, queues, bindings and stream topics declared at startup
//! - `router`: responder side of request/reply, dispatch by routing key
//! - `gateway`: caller side of request/reply, always yields a `ServiceResponse`
//! - `monitor_handler`: monitor commands
//! - `runtime`: [`FleetRuntime`], startup and shutdown
//!
//! ## Command Flow
//!
//! ```text
//! GatewayClient ──rpc(services, monitor.get_dashboard)──► monitor.events
//!                                                              │
//!                                                        CommandRouter
//!                                                              │
//!                                                   MonitorCommandHandler
//!                                                              │
//!       ◄──────────── ServiceResponse on reply_to ─────────────┘
//! ```

pub mod config;
pub mod gateway;
pub mod monitor_handler;
pub mod router;
pub mod runtime;
pub mod topology;

pub use config::{ConfigError, RuntimeConfig};
pub use gateway::GatewayClient;
pub use monitor_handler::{MonitorCommandHandler, MONITOR_PATTERNS};
pub use router::{CommandError, CommandHandler, CommandRouter};
pub use runtime::FleetRuntime;
pub use topology::TopologyPlan;
