//! Model routing: the catalog of provider/model profiles, the circuit
//! breaker that scores recently-failing candidates out of the way, the
//! route planner, and config-store persistence for breaker state.

pub mod breaker;
pub mod catalog;
pub mod router;
pub mod store;

pub use breaker::{BreakerParams, BreakerSnapshot, CircuitBreaker};
pub use catalog::{ModelCapabilities, ModelCatalog, ModelClass, ModelProfile};
pub use router::{plan, RouteCandidate, RouteConstraints, RoutePreference};
pub use store::{
    load_breaker_state, persist_breaker_state, ConfigStore, MemoryConfigStore, BREAKER_STATE_KEY,
};
