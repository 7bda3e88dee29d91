pub mod classifier;
pub mod dispatcher;
pub mod engine;
pub mod frontier;
pub mod matcher;
pub mod mutator;
pub mod result_aggregator;
pub mod session;
pub mod state;
pub mod store;
pub mod target_manager;
pub mod throttle;
pub mod verifier;
