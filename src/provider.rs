//! Provider-facing descriptors (data), strategies (behavior), and presets.
//!
//! `descriptor` exposes validated metadata (`ProviderDescriptor`) covering the authorization and
//! token endpoints, supported grant flags, and the client authentication preference.
//! `strategy` defines [`ProviderStrategy`], an HTTP-client-agnostic hook used by the manager to
//! map token endpoint failures into the keeper error taxonomy. `preset` ships ready-made
//! descriptors for known providers.

pub mod descriptor;
pub mod preset;
pub mod strategy;

pub use descriptor::*;
pub use strategy::*;
