//! Durable asynchronous task subsystem: store, queue, workers, janitor.

pub mod handler;
pub mod janitor;
pub mod queue;
pub mod store;
pub mod worker;

pub use handler::OrchestrateHandler;
pub use janitor::{Janitor, JanitorConfig};
pub use queue::MemoryTaskQueue;
pub use store::MemoryTaskStore;
pub use worker::{WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
