// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC Leash
//!
//! Turns a grabbed physbone leash into locomotion input. The avatar's leash
//! parameters arrive over OSC; movement commands go back to the client's
//! `/input` endpoints.
//!
//! # Flow
//!
//! ```text
//! OSCQuery discovery -> PeerFound -> SessionManager -> OscChannel
//!                                                   -> ControlLoop (tick)
//! ```
//!
//! # Configuration File
//!
//! ```json
//! {
//!   "Ip": "127.0.0.1",
//!   "RunDeadzone": 0.7,
//!   "WalkDeadzone": 0.15,
//!   "ActiveDelay": 0.1,
//!   "InactiveDelay": 0.15,
//!   "Logging": false,
//!   "DebugMode": false,
//!   "TargetPrefix": "VRChat-Client-",
//!   "Parameters": {
//!     "Z_Positive": "Leash_Z+",
//!     "Z_Negative": "Leash_Z-",
//!     "X_Positive": "Leash_X+",
//!     "X_Negative": "Leash_X-",
//!     "PhysboneParameter": "Leash"
//!   }
//! }
//! ```

pub mod config;
pub mod control;
pub mod leash;
pub mod osc;
pub mod session;

pub use config::{ConfigError, LeashAddresses, LeashConfig, ParameterAliases};
pub use control::{ControlLoop, ControlSettings};
pub use leash::{classify, GrabPhase, LeashField, LeashHandle, LeashSample, LeashState, Movement};
pub use osc::{OscArg, OscChannel, OscError, OscMessage, OscSender};
pub use session::{SessionError, SessionManager};

use rand::Rng;

/// Prefix of generated instance names.
pub const INSTANCE_PREFIX: &str = "Leash-OSC-";

/// `Leash-OSC-` followed by five digits and one uppercase letter.
pub fn random_instance_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut name = String::from(INSTANCE_PREFIX);
    for _ in 0..5 {
        name.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    name.push(char::from(rng.gen_range(b'A'..=b'Z')));
    name
}
