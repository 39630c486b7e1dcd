//! Background execution for staging jobs.
//!
//! This crate provides the AI transform seam and the Ractor-based executor
//! pool that runs jobs off the request path.
//!
//! # Architecture
//!
//! - `Executor` - Runs one job: load input, call the adapter, record the result
//! - `PoolActor` - FIFO of dispatched jobs in front of a fixed set of workers
//! - `WorkerActor` - Runs one executor at a time
//!
//! # Usage
//!
//! ```ignore
//! use actors::{Dispatcher, Executor, ExecutorPool};
//!
//! let executor = Arc::new(Executor::new(registry, artifacts, adapter));
//! let pool = ExecutorPool::start(executor, 5).await?;
//! pool.dispatch(job_id)?;
//! ```

mod adapter;
mod dispatch;
mod executor;
mod messages;
pub mod payload;
mod pool;
mod worker;

pub use adapter::{
    AdapterFuture, AdapterResponse, AdapterResult, FnAdapter, PayloadEncoding, TransformAdapter,
};
pub use dispatch::{DispatchError, Dispatcher};
pub use executor::{ExecutionOutcome, Executor};
pub use messages::{PoolMessage, PoolStats, WorkerMessage};
pub use pool::{ExecutorPool, PoolActor};
pub use worker::WorkerActor;
