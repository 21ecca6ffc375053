//! Application layer containing the pairing logic and shared state.

pub mod challenge;
pub mod service;
pub mod sessions;
pub mod state;
pub mod worker;

pub use challenge::{Challenge, ChallengeService, RECORD_SUFFIX_ENC, RECORD_SUFFIX_SIGN};
pub use service::PairingService;
pub use sessions::{SessionMap, SessionRegistry};
pub use state::AppState;
pub use worker::{spawn_sweeper, LivenessSweeper, SweeperConfig};
