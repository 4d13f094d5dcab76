pub mod consumer;
pub mod queue;
pub mod runner;

pub use consumer::ConsumerWorker;
pub use queue::BoundedQueue;
pub use runner::{run_pipeline, sink_factory, Pipeline, RunError, ShutdownReport};
