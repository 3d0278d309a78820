//! chainlisten-evm — node client, historical scanner, live subscriber and
//! ABI dispatch for EVM contract logs.

pub mod builder;
pub mod client;
pub mod decoder;
pub mod dispatch;
pub mod handlers;
pub mod listener;
pub mod normalizer;
pub mod rpc;
pub mod scanner;
pub mod subscriber;
pub mod subscriptions;
pub mod ws;

pub use builder::ListenerBuilder;
pub use client::{LogSubscription, NodeClient, SubscriptionId, SubscriptionItem};
pub use decoder::{EventSignature, SignatureRegistry};
pub use dispatch::{DispatchMetrics, DispatchOutcome, Dispatcher};
pub use handlers::LoggingHandler;
pub use listener::{Listener, RunningListener};
pub use scanner::{HistoricalScanner, ScanSummary};
pub use subscriber::{LiveSubscriber, SubscriptionState};
pub use ws::WsNodeClient;
