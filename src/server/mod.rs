//! HTTP server for health, metrics and admission endpoints
//!
//! - `/healthz` - Liveness probe (process is running)
//! - `/readyz` - Readiness probe (controller is ready to serve)
//! - `/metrics` - Prometheus metrics in text format
//! - `/validate` - Validating admission webhook for our CRDs
//!
//! Also provides graceful shutdown handling for SIGTERM/SIGINT.

mod health;
pub mod metrics;
pub mod shutdown;
pub mod webhook;

pub use health::{run_health_server, ReadinessState};
pub use metrics::{create_metrics, SharedMetrics};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};
