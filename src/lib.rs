pub mod admin;
pub mod config;
pub mod error;
pub mod store;
pub mod trading;

pub use config::{AppConfig, EngineConfig};
pub use error::{StoreError, TradeError};
pub use trading::connection::SessionDeps;
pub use trading::registry::SessionRegistry;
