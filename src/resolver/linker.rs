//! Linker: records a new observation, either as a fresh cluster or as a
//! secondary of the cluster it partially matches.

use std::collections::BTreeSet;

use tracing::info;

use crate::config::PrimarySelection;
use crate::contact::{Contact, ContactId, NewContact};
use crate::error::{ExecutionError, IdentityResult};
use crate::storage::ContactStore;
use crate::time::Clock;

use super::lookup::MatchSet;

/// Creates a contact that starts its own cluster.
///
/// # Errors
/// Propagates storage failures.
pub fn create_primary(
    store: &dyn ContactStore,
    clock: &dyn Clock,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> IdentityResult<Contact> {
    let contact = store.insert(NewContact::primary(
        email.map(str::to_owned),
        phone_number.map(str::to_owned),
        clock.now(),
    ))?;
    info!(contact_id = %contact.id, "created primary contact");
    Ok(contact)
}

/// Creates a secondary carrying the request's identifiers under the primary of
/// the matched cluster. Existing rows are never touched.
///
/// # Errors
/// - `BrokenLink` if a match points at a missing or non-primary contact
/// - `AmbiguousPrimary` under [`PrimarySelection::Strict`] when the matches
///   roll up to more than one primary
/// - storage failures
pub fn create_secondary(
    store: &dyn ContactStore,
    clock: &dyn Clock,
    selection: PrimarySelection,
    matches: &MatchSet,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> IdentityResult<Contact> {
    let primary = select_primary(store, selection, matches)?;
    let contact = store.insert(NewContact::secondary(
        email.map(str::to_owned),
        phone_number.map(str::to_owned),
        primary,
        clock.now(),
    ))?;
    info!(contact_id = %contact.id, primary_id = %primary, "created secondary contact");
    Ok(contact)
}

/// Resolves the primary the matched contacts belong to.
///
/// # Errors
/// See [`create_secondary`].
pub fn select_primary(
    store: &dyn ContactStore,
    selection: PrimarySelection,
    matches: &MatchSet,
) -> IdentityResult<ContactId> {
    let union = matches.union();
    let mut primaries = BTreeSet::new();
    let mut last_observed = None;

    for contact in union.values() {
        let primary = resolve_primary(store, contact)?;
        primaries.insert(primary);
        last_observed = Some(primary);
    }

    let Some(last_observed) = last_observed else {
        return Err(ExecutionError::ClusterNotFound {
            identifiers: "an empty match set".to_string(),
        }
        .into());
    };
    if primaries.len() > 1 && selection.is_strict() {
        return Err(ExecutionError::AmbiguousPrimary {
            candidates: primaries.into_iter().collect(),
        }
        .into());
    }
    Ok(last_observed)
}

/// Follows a contact's link to its primary, checking the target really is one.
///
/// # Errors
/// `BrokenLink` if the target is missing or is itself a secondary.
pub fn resolve_primary(store: &dyn ContactStore, contact: &Contact) -> IdentityResult<ContactId> {
    let Some(target) = contact.link().linked_id() else {
        return Ok(contact.id);
    };
    match store.get(target)? {
        Some(primary) if primary.is_primary() => Ok(primary.id),
        _ => Err(ExecutionError::BrokenLink {
            id: contact.id,
            linked_id: target,
        }
        .into()),
    }
}
