//! Infrastructure layer - store backends and the services built on them

pub mod document_store;
pub mod logging;
pub mod metrics;
pub mod services;
