//! Core types: queue items, queue sizes, broadcasts, tracing setup

pub mod queue;
pub mod tracing;

pub use queue::{
    Examination, InvoiceDetails, MedicalForm, QueueBroadcast, QueueItem, QueueSize,
    RequestedService,
};
pub use tracing::{LogFormat, TracingConfig, TracingError, init_tracing};
