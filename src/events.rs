//! Event definitions for the presentation-facing channel.
//!
//! The supervisor and its background tasks push these over a
//! `tokio::sync::mpsc` channel so a frontend can react to state changes
//! without re-reading every field itself.

use crate::state::ServiceSnapshot;

/// Events emitted by the supervisor toward the presentation layer.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A service's observable state differs from the last emission.
    StatusChanged { snapshot: ServiceSnapshot },
    /// The start-all sequence has just launched the named service.
    SequenceStep { id: usize, name: String },
    /// The start-all sequence finished walking the registry.
    SequenceFinished,
}
