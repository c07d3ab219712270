//! Graph audit: checks every cluster invariant over the whole store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, LinkPrecedence};

/// A single broken invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// A secondary without a `linkedId`.
    MissingLink { id: ContactId },
    /// A `linkedId` pointing at no stored contact.
    DanglingLink { id: ContactId, linked_id: ContactId },
    /// A secondary linked to another secondary.
    Chain { id: ContactId, linked_id: ContactId },
    /// A secondary created before its primary.
    NotOldest { primary_id: ContactId, older_id: ContactId },
    /// A primary that carries a `linkedId`.
    UnexpectedLink { id: ContactId, linked_id: ContactId },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingLink { id } => write!(f, "secondary contact {id} has no linked id"),
            Self::DanglingLink { id, linked_id } => {
                write!(f, "contact {id} links to missing contact {linked_id}")
            }
            Self::Chain { id, linked_id } => {
                write!(f, "contact {id} links to secondary contact {linked_id}")
            }
            Self::NotOldest { primary_id, older_id } => {
                write!(f, "primary {primary_id} is newer than its member {older_id}")
            }
            Self::UnexpectedLink { id, linked_id } => {
                write!(f, "primary contact {id} links to {linked_id}")
            }
        }
    }
}

/// Checks `contacts` (any order) and returns every violation found, sorted by
/// the offending contact's id.
#[must_use]
pub fn audit_contacts(contacts: &[Contact]) -> Vec<InvariantViolation> {
    let by_id: BTreeMap<ContactId, &Contact> = contacts.iter().map(|c| (c.id, c)).collect();
    let mut found = Vec::new();

    for contact in by_id.values() {
        match (contact.link_precedence, contact.linked_id) {
            (LinkPrecedence::Primary, None) => {}
            (LinkPrecedence::Primary, Some(linked_id)) => {
                found.push(InvariantViolation::UnexpectedLink {
                    id: contact.id,
                    linked_id,
                });
            }
            (LinkPrecedence::Secondary, None) => {
                found.push(InvariantViolation::MissingLink { id: contact.id });
            }
            (LinkPrecedence::Secondary, Some(linked_id)) => match by_id.get(&linked_id) {
                None => found.push(InvariantViolation::DanglingLink {
                    id: contact.id,
                    linked_id,
                }),
                Some(target) if !target.is_primary() => found.push(InvariantViolation::Chain {
                    id: contact.id,
                    linked_id,
                }),
                Some(primary) => {
                    if (contact.created_at, contact.id) < (primary.created_at, primary.id) {
                        found.push(InvariantViolation::NotOldest {
                            primary_id: primary.id,
                            older_id: contact.id,
                        });
                    }
                }
            },
        }
    }
    found
}
