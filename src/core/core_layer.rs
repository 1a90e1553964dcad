// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "auth/token_service.rs"]
pub mod auth;

#[path = "proxy/mod.rs"]
pub mod proxy;
