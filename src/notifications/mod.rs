pub mod dispatcher;
pub mod models;
pub mod providers;
pub mod store;

pub use dispatcher::*;
pub use models::*;
pub use providers::*;
pub use store::*;
