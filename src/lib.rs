pub mod config;
pub mod credit;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod model;
pub mod order;
pub mod participant;
pub mod report;
pub mod service;
pub mod sled_ledger;
pub mod store;
pub mod ticket;
pub mod types;
pub mod utils;

pub use error::{EngineError, Result};
pub use service::Exchain;
