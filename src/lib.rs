//! pairgate: an authentication broker pairing a browser widget with a
//! mobile authenticator, ratified against blockchain-anchored RSA keys.

pub mod api;
pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
