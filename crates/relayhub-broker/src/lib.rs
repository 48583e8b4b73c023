//! # relayhub-broker - Source/Surface Multiplexing
//!
//! The subscription broker multiplexes N event sources to M UI surfaces.
//! Each subscription is keyed by (surface, source, event) and moves through
//! the lifecycle `active ⇄ suspended → torn-down`, driven by surface
//! visibility signals and explicit API calls.
//!
//! Sources and surfaces are external collaborators; this crate only defines
//! the seams ([`EventSource`], [`Surface`]) and provides the in-process
//! implementations the host uses ([`EventHub`], [`SignalOutlet`]).

pub mod broker;
pub mod source;
pub mod subscription;
pub mod surface;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use broker::{BrokerStats, SubscriptionBroker};
pub use source::{EventCallback, EventHub, EventSource, ListenerId, SourceKey};
pub use subscription::{SubKey, SubState};
pub use surface::{
    BindingId, SignalCallback, SignalOutlet, Surface, SurfaceId, SurfaceMessage, SurfaceSignal,
};
