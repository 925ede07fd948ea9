/// Events pushed to viewers.
pub mod events;
/// Health check payloads.
pub mod health;
/// Lock views served by the polling endpoints.
pub mod locks;
