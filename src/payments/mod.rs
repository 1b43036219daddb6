pub mod event_store;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod reconciler;

pub use event_store::*;
pub use handlers::*;
pub use metrics::*;
pub use models::*;
pub use reconciler::*;
