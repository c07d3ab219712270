//! Consolidator: reads a cluster and renders its summary.

use crate::consolidated::ConsolidatedContact;
use crate::contact::{Contact, ContactId};
use crate::error::{ExecutionError, IdentityResult};
use crate::storage::ContactStore;

use super::linker::resolve_primary;
use super::lookup::lookup;

/// The primary row and its secondaries (ascending id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Cluster root.
    pub primary: Contact,
    /// Members linked to `primary`.
    pub secondaries: Vec<Contact>,
}

impl Cluster {
    /// All members, primary first.
    pub fn members(&self) -> impl Iterator<Item = &Contact> {
        std::iter::once(&self.primary).chain(&self.secondaries)
    }

    /// Renders the externally visible summary.
    ///
    /// Values keep first-seen order: the primary's, then each secondary's in id
    /// order, skipping absent values and repeats.
    #[must_use]
    pub fn summarize(&self) -> ConsolidatedContact {
        let mut emails: Vec<String> = Vec::new();
        let mut phone_numbers: Vec<String> = Vec::new();
        for contact in self.members() {
            push_distinct(&mut emails, contact.email.as_deref());
            push_distinct(&mut phone_numbers, contact.phone_number.as_deref());
        }
        ConsolidatedContact {
            primary_contact_id: self.primary.id,
            emails,
            phone_numbers,
            secondary_contact_ids: self.secondaries.iter().map(|c| c.id).collect(),
        }
    }
}

fn push_distinct(values: &mut Vec<String>, value: Option<&str>) {
    if let Some(value) = value {
        if !values.iter().any(|v| v == value) {
            values.push(value.to_owned());
        }
    }
}

/// Loads the cluster containing `id`. A secondary id resolves to its primary.
///
/// # Errors
/// - `ContactNotFound` if `id` is unknown
/// - `BrokenLink` if `id` links to a missing or non-primary contact
pub fn load_cluster(store: &dyn ContactStore, id: ContactId) -> IdentityResult<Cluster> {
    let contact = store
        .get(id)?
        .ok_or(ExecutionError::ContactNotFound { id })?;
    let primary_id = resolve_primary(store, &contact)?;
    let primary = if primary_id == contact.id {
        contact
    } else {
        store
            .get(primary_id)?
            .ok_or(ExecutionError::BrokenLink {
                id,
                linked_id: primary_id,
            })?
    };
    let secondaries = store.find_by_linked_id(primary.id)?;
    Ok(Cluster {
        primary,
        secondaries,
    })
}

/// Summarizes the cluster containing `id`.
///
/// # Errors
/// See [`load_cluster`].
pub fn consolidate(store: &dyn ContactStore, id: ContactId) -> IdentityResult<ConsolidatedContact> {
    load_cluster(store, id).map(|cluster| cluster.summarize())
}

/// Summarizes the cluster holding the lowest-id contact that carries `email` or
/// `phone_number`.
///
/// # Errors
/// - `ClusterNotFound` if nothing carries either identifier
/// - see [`load_cluster`]
pub fn consolidate_by_identifiers(
    store: &dyn ContactStore,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> IdentityResult<ConsolidatedContact> {
    let matches = lookup(store, email, phone_number)?;
    let anchor = matches
        .exact()
        .or_else(|| matches.union().keys().next().copied())
        .ok_or_else(|| ExecutionError::ClusterNotFound {
            identifiers: describe(email, phone_number),
        })?;
    consolidate(store, anchor)
}

fn describe(email: Option<&str>, phone_number: Option<&str>) -> String {
    match (email, phone_number) {
        (Some(e), Some(p)) => format!("email '{e}' or phoneNumber '{p}'"),
        (Some(e), None) => format!("email '{e}'"),
        (None, Some(p)) => format!("phoneNumber '{p}'"),
        (None, None) => "no identifiers".to_string(),
    }
}
