pub mod accumulator;
pub mod breaker;
pub mod error;
pub mod fetch;
pub mod normalize;
pub mod retry;
pub mod sequencer;
pub mod state_manager;
