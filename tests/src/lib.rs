//! # fleetops Test Suite
//!
//! Flows that cross crate boundaries. Unit tests live next to the code
//! they cover.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── bus_flows.rs       # routing, settlement, request/reply on the topic bus
//!     ├── stream_flows.rs    # keyed ordering and consumer groups on the stream
//!     └── runtime_flows.rs   # gateway → stream → monitor → alerts, end to end
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p fleet-tests
//! cargo test -p fleet-tests integration::runtime_flows
//! ```

pub mod integration;
