//! Request lifecycle state machine.
//!
//! # State Machine
//! ```text
//!     FREE ──post()──> POSTED ──retrieve()──> COMPLETED ──reclaim()──> RECLAIMED
//!       ▲                 │
//!       └───rejected──────┘
//! ```
//!
//! INVARIANT: a POSTED request's header, scatter list and buffer are visible
//! to the device. They must not move, be freed, or be handed to another post
//! until the device returns the request through the used ring.

/// Where a request is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Built, not yet visible to the device.
    Free,
    /// Occupies descriptor slots; device may access it.
    Posted,
    /// Returned through the used ring; driver owns it again.
    Completed,
    /// Buffer handed off, record released.
    Reclaimed,
}

impl RequestState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::Free, Self::Posted)
                | (Self::Posted, Self::Free)
                | (Self::Posted, Self::Completed)
                | (Self::Completed, Self::Reclaimed)
        )
    }

    /// Driver may touch the memory.
    pub fn can_access(self) -> bool {
        matches!(self, Self::Free | Self::Completed)
    }
}
