//! Key Management Service core
//!
//! Session lifecycle management for the RSA-wrapped key handshake, a
//! versioned data-key store backed by a crash-safe snapshot file, and
//! per-capability fixed-window rate limiting.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


pub mod crypto;
pub mod error;
pub mod key_store;
pub mod key_types;
pub mod kms;
pub mod local_store;
pub mod rate_limiter;
pub mod service_integration;
pub mod session;

pub use error::{KmsError, KmsResult};
pub use key_store::{KeyStore, WrappedPayload};
pub use key_types::{DataKey, KeyHandle, KeyId, KeyMetadata, KeyVersionInfo, KeyVersionStatus};
pub use rate_limiter::{FixedWindowLimiter, RateDecision, RateLimiters};
pub use service_integration::*;
pub use session::{ActiveSession, SessionKey, SessionManager, SweeperHandle, TokenRotation};
