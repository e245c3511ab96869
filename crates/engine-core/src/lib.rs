pub mod error;
pub mod export;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod sink;
pub mod state;
