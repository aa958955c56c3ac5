// Certificate generation for an event's registrants.

pub mod service;

pub use service::{CertificateService, CertificateSettings, GenerationReport};
