//! Completion token: the single handle that may close a stream.
//!
//! The bus mints exactly one token at construction and remembers its id.
//! The dispatcher carries the token through every function that is allowed
//! to complete the stream; helpers and services never see one, so closure
//! authority is visible in the signatures.

use uuid::Uuid;

/// Opaque authorization to close a [`StreamBus`](super::StreamBus).
///
/// Not `Clone`: there is one holder. Share it across tasks behind an `Arc`
/// when a workflow genuinely needs to (the bus only ever compares ids).
#[derive(Debug)]
pub struct CompletionToken {
    id: Uuid,
}

impl CompletionToken {
    pub(super) fn mint() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub(super) const fn id(&self) -> Uuid {
        self.id
    }

    /// A token that matches no bus. Only for exercising the ownership
    /// rejection path in tests.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn detached() -> Self {
        Self::mint()
    }
}
