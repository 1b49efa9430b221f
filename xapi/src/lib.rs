pub mod api;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "test-utilities"))]
pub mod fake;
pub mod types;

pub use api::ControlPlane;
pub use client::XapiClient;
pub use error::{FailureKind, XapiError};
