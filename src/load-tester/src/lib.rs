//! # Panacea Load Tester
//!
//! Synthetic workload generator for the Panacea insights REST API.
//!
//! Many concurrent virtual users each issue a weighted mix of realistic
//! requests:
//!
//! - a [`DataPool`] supplies real identifiers, read from a fixture or
//!   harvested live from ClickHouse and the target API;
//! - per-endpoint payload generators produce structurally distinct,
//!   randomized bodies and query parameters;
//! - a [`WeightedTaskScheduler`] picks the endpoint each user turn exercises.
//!
//! Responses are only checked for transport-level success.
//!
//! ```text
//!  DataPoolProvider ──► DataPool (Arc, read-only)
//!                            │
//!   LoadRunner ── spawns ──► virtual user ×N
//!                            │  scheduler.select ─► ApiGenerator ─► payload
//!                            ▼
//!                     RequestDispatcher ─► RunMetrics ─► RunSummary
//! ```

pub mod config;
pub mod data_pool;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod payloads;
pub mod provider;
pub mod runner;
pub mod scheduler;
pub mod session;

pub use config::{DataSourceMode, LoadTestConfig};
pub use data_pool::{BundleMeta, DataPool};
pub use dispatcher::{ApiRequest, HttpDispatcher, RequestDispatcher, RequestOutcome};
pub use error::{LoadTestError, Result};
pub use metrics::{RunMetrics, RunSummary};
pub use payloads::{ApiGenerator, ApiMethod, GeneratedPayload, PayloadGenerator, PayloadVariant};
pub use provider::{DataPoolProvider, HttpReportSeedSource, ReferenceStore, ReportSeedSource};
pub use runner::LoadRunner;
pub use scheduler::{TaskDescriptor, TaskKind, WeightedTaskScheduler};
pub use session::{IdRange, UserSession};
