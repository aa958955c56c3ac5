pub mod event;
pub mod registration;

pub use event::{Event, EventPatch};
pub use registration::{Registration, RegistrationPatch};
