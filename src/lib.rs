pub mod config;
pub mod datemath;
pub mod engine;
pub mod housekeeping;
pub mod layout;
pub mod limits;
pub mod location;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod reschedule;
pub mod status;
pub mod store;
pub mod wal;
pub mod wire;
