// Application Layer - Use Cases and Job Orchestration

pub mod bus;
pub mod control;
pub mod controller;
pub mod dependencies;
pub mod handlers;
pub mod processor;
pub mod queue;
pub mod registry;
pub mod stream;

// Re-exports
pub use bus::{MessageReceiver, NotificationBus, Subscription};
pub use control::{control_channel, ControlRequest, ControlServer, RemoteJobSource};
pub use controller::{
    ControllerConfig, OffscreenController, ProcessorLauncher, WorkerLauncher,
};
pub use dependencies::{
    create_dependencies, CompletionReporter, JobLogger, ProcessDependencies, ProcessFactory,
    ProgressReporter,
};
pub use handlers::default_registry;
pub use processor::{
    shutdown_channel, Processor, ProcessorConfig, ProcessorSlot, ProcessorState, ShutdownSender,
    ShutdownToken,
};
pub use queue::{EnqueueRequest, JobQueue, JobQueueConfig};
pub use registry::{HandlerRegistration, HandlerRegistry, JobHandler, RegistryBuilder};
pub use stream::{
    ExecuteOptions, Execution, JobExecutor, JobOutcome, JobProgressStream, JobSnapshot,
};
