pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod lock;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod scheduler;
pub mod wal;
