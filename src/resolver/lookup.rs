//! Lookup: which contacts share the request's email or phone number.

use std::collections::BTreeMap;
use std::fmt;

use crate::contact::{Contact, ContactId};
use crate::storage::{ContactStore, StorageError};

/// How a request relates to the contacts already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Nothing shares either identifier.
    NoMatch,
    /// The given contact carries every supplied identifier.
    Exact(ContactId),
    /// Only one of the identifiers is known; the other is new.
    Partial,
    /// Email and phone number hit contacts, but no single contact has both.
    Bridging,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => write!(f, "no_match"),
            Self::Exact(_) => write!(f, "exact"),
            Self::Partial => write!(f, "partial"),
            Self::Bridging => write!(f, "bridging"),
        }
    }
}

/// Result of a lookup, each list in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchSet {
    /// Contacts whose email equals the requested email.
    pub email_matches: Vec<Contact>,
    /// Contacts whose phone number equals the requested phone number.
    pub phone_matches: Vec<Contact>,
    exact: Option<ContactId>,
}

impl MatchSet {
    /// Returns `true` if neither identifier matched anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.email_matches.is_empty() && self.phone_matches.is_empty()
    }

    /// Lowest-id contact that matches every supplied identifier.
    #[must_use]
    pub const fn exact(&self) -> Option<ContactId> {
        self.exact
    }

    /// Classifies the request.
    #[must_use]
    pub fn kind(&self) -> MatchKind {
        if let Some(id) = self.exact {
            return MatchKind::Exact(id);
        }
        match (self.email_matches.is_empty(), self.phone_matches.is_empty()) {
            (true, true) => MatchKind::NoMatch,
            (false, false) => MatchKind::Bridging,
            _ => MatchKind::Partial,
        }
    }

    /// Union of both lists keyed on id.
    #[must_use]
    pub fn union(&self) -> BTreeMap<ContactId, Contact> {
        self.email_matches
            .iter()
            .chain(&self.phone_matches)
            .map(|c| (c.id, c.clone()))
            .collect()
    }

    /// Number of distinct matched contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.union().len()
    }
}

/// Finds the contacts matching `email` and `phone_number`.
///
/// Comparison is exact; an absent identifier matches nothing.
///
/// # Errors
/// Propagates storage failures.
pub fn lookup(
    store: &dyn ContactStore,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> Result<MatchSet, StorageError> {
    let email_matches = match email {
        Some(email) => store.find_by_email(email)?,
        None => Vec::new(),
    };
    let phone_matches = match phone_number {
        Some(phone) => store.find_by_phone(phone)?,
        None => Vec::new(),
    };

    let carries_all = |c: &Contact| {
        email.map_or(true, |e| c.has_email(e)) && phone_number.map_or(true, |p| c.has_phone_number(p))
    };
    let exact = if email.is_some() || phone_number.is_some() {
        email_matches
            .iter()
            .chain(&phone_matches)
            .filter(|c| carries_all(*c))
            .map(|c| c.id)
            .min()
    } else {
        None
    };

    Ok(MatchSet {
        email_matches,
        phone_matches,
        exact,
    })
}
