//! chainlisten-core — shared types and plumbing for the contract listener.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐      ┌──────────────────┐
//! │ HistoricalScanner│      │  LiveSubscriber  │   (chainlisten-evm)
//! └────────┬─────────┘      └────────┬─────────┘
//!          │ RawLog                  │ RawLog
//!          └──────────┬──────────────┘
//!                     ▼
//!        bounded ingestion channel (mpsc)
//!                     │
//!        ┌────────────┼────────────┐
//!        ▼            ▼            ▼
//!     worker 0     worker 1 …   worker N-1        WorkerPool
//!        │  LogHandler (Dispatcher)
//!        ▼
//!   match topic0 → claim(key) in IdempotencyStore → decode → EventHandler
//!        │
//!        ▼
//!   Progress: checkpoint = highest block with nothing left in flight
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod policy;
pub mod pool;
pub mod progress;
pub mod store;
pub mod types;
pub mod value;

pub use config::{DbConfig, ListenerConfig, LogConfig};
pub use error::{
    ConfigError, DecodeError, HandlerError, ListenerError, ScanError, StoreError, TransportError,
};
pub use event::DecodedEvent;
pub use handler::{EventHandler, HandlerRegistry, LogHandler};
pub use policy::{BackoffPolicy, ExponentialBackoff, FixedBackoff};
pub use pool::{ingestion_channel, SharedReceiver, WorkerPool};
pub use progress::{InFlight, Producer, Progress};
pub use store::{IdempotencyStore, SharedStore};
pub use types::{BlockTarget, EventFilter, IdempotencyKey, RawLog};
pub use value::NormalizedValue;
