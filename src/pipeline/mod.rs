//! Per-entry pipeline stages.
//!
//! Each submodule implements exactly one step. The three stages that touch
//! the outside world sit behind traits so the orchestrator can be driven
//! with fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! image URL ──▶ acquire ──▶ transform ──▶ recognize ──▶ text
//!               (HTTP)      (resize+PNG)  (VLM)
//!                  │            │
//!                  └─ staging ──┘
//! ```
//!
//! 1. [`acquire`]   — download the image into the run's [`staging`] area
//! 2. [`transform`] — resize to the target width and PNG-encode; the decode
//!    and resize run in `spawn_blocking`
//! 3. [`encode`]    — PNG bytes and base64 helpers used by `transform`
//! 4. [`recognize`] — one VLM call per attempt; the only stage that talks to
//!    the model. Its answer is stored exactly as returned.

pub mod acquire;
pub mod encode;
pub mod recognize;
pub mod staging;
pub mod transform;
