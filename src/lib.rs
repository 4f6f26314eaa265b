// Switchboard Library - coordination core for cooperating worker processes
// This exposes the core components for testing and integration

pub mod cli;
pub mod config;
pub mod database;
pub mod metrics;
pub mod ownership;
pub mod priority;
pub mod process;
pub mod queue;
pub mod registry;
pub mod shutdown;
pub mod supervisor;
pub mod telemetry;
pub mod worker;

// Re-export key types for easy access
pub use config::{RoleConfig, SwitchboardConfig};
pub use database::DatabaseManager;
pub use metrics::{BottleneckSeverity, MetricsSnapshot, MetricsStore, PerformanceBottleneck};
pub use ownership::{
    OwnershipError, OwnershipGate, OwnershipRule, RuleSet, WriteDecision, WriteRoute, WriteRouter,
};
pub use priority::{Priority, PriorityBucket};
pub use queue::{NewTask, QueueError, Task, TaskQueue, TaskStatus};
pub use registry::{RegistryError, RoleGuard, SingletonRegistry, WorkerRegistration};
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{ProcessSupervisor, RestartPolicy, RolePhase, RoleStatus, SupervisorError};
pub use telemetry::{create_coordination_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use worker::{CommandHandler, TaskHandler, WorkerError, WorkerRuntime};
