// =====================================================
// BULK SNAPSHOT ENGINE
// Reflect -> map -> sync schema -> stream chunks -> reconcile
// =====================================================

pub mod audit;
pub mod coercer;
pub mod connection_resolver;
pub mod engine;
pub mod mapper;
pub mod models;
pub mod planner;
pub mod reflector;
pub mod retry;
pub mod runner;
pub mod schema_sync;
pub mod sink;

#[cfg(test)]
pub mod test_utils;
