//! Decides whether an inbound event needs a human's attention.
//!
//! Rules are applied in order and the first match wins:
//!
//! 1. Messages written by the watcher's own account are ignored.
//! 2. Ids already in the dedup store are ignored.
//! 3. Direct messages notify as [`Category::DirectMessage`].
//! 4. Messages mentioning the watcher's account notify as [`Category::Mention`].
//! 5. Everything else is ignored.
//!
//! Classification never mutates the store; the caller records the id once a
//! notification attempt has been made.

use tracing::debug;

use crate::dedup::DedupStore;
use crate::types::{Category, Classification, Event, Identity, IgnoreReason};

/// Classifies `event` as seen by the account `self_identity`.
#[must_use]
pub fn classify(event: &Event, self_identity: &Identity, store: &DedupStore) -> Classification {
    if event.author.same_account(self_identity) {
        return Classification::Ignored(IgnoreReason::OwnMessage);
    }

    if store.contains(&event.id) {
        debug!(message_id = %event.id, "Skipping already processed message");
        return Classification::Ignored(IgnoreReason::AlreadyProcessed);
    }

    if event.origin.is_direct_message() {
        return Classification::Notify(Category::DirectMessage);
    }

    if event.mentions(self_identity) {
        return Classification::Notify(Category::Mention);
    }

    Classification::Ignored(IgnoreReason::NotAddressed)
}
