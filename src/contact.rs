//! Contact records and identity-cluster links.
//!
//! A [`Contact`] is a single observed (email, phone number) data point. Contacts
//! that describe the same person form a cluster: one primary contact (the oldest)
//! and any number of secondaries that link directly to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned contact identifier.
///
/// Identifiers are assigned in creation order and never reused, so comparing two
/// ids also compares creation order.
///
/// # Examples
///
/// ```
/// use contact_identity::ContactId;
///
/// let a = ContactId::new(1);
/// let b = ContactId::new(2);
/// assert!(a < b);
/// assert_eq!(a.checked_next(), Some(b));
/// assert_eq!(ContactId::new(i64::MAX).checked_next(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(i64);

impl ContactId {
    /// The first id a fresh store hands out.
    pub const FIRST: Self = Self(1);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns the id following this one, or `None` once ids are exhausted.
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(raw) => Some(Self(raw)),
            None => None,
        }
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContactId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<ContactId> for i64 {
    fn from(id: ContactId) -> Self {
        id.0
    }
}

/// Position of a contact within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// The root of a cluster.
    Primary,
    /// A member that links to the cluster's primary.
    Secondary,
}

impl LinkPrecedence {
    /// Returns `true` for [`LinkPrecedence::Primary`].
    pub const fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Returns `true` for [`LinkPrecedence::Secondary`].
    pub const fn is_secondary(&self) -> bool {
        matches!(self, Self::Secondary)
    }
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// The link a contact holds: either it is a primary, or it points at one.
///
/// This is the pair (`link_precedence`, `linked_id`) folded into one value so that
/// "secondary without a target" cannot be expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "precedence", content = "linked_id", rename_all = "snake_case")]
pub enum Link {
    /// Cluster root.
    Primary,
    /// Member of the cluster rooted at the given primary.
    Secondary(ContactId),
}

impl Link {
    /// Precedence corresponding to this link.
    #[must_use]
    pub const fn precedence(&self) -> LinkPrecedence {
        match self {
            Self::Primary => LinkPrecedence::Primary,
            Self::Secondary(_) => LinkPrecedence::Secondary,
        }
    }

    /// Target primary, if this is a secondary link.
    #[must_use]
    pub const fn linked_id(&self) -> Option<ContactId> {
        match self {
            Self::Primary => None,
            Self::Secondary(id) => Some(*id),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary(id) => write!(f, "secondary->{id}"),
        }
    }
}

/// A persisted contact row.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use contact_identity::{Contact, ContactId, NewContact};
///
/// let contact = NewContact::primary(Some("doc@hillvalley.edu".into()), None, Utc::now())
///     .into_contact(ContactId::FIRST);
/// assert!(contact.is_primary());
/// assert_eq!(contact.primary_id(), contact.id);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Store-assigned identifier.
    pub id: ContactId,

    /// Email address, if one was supplied.
    pub email: Option<String>,

    /// Phone number, if one was supplied.
    pub phone_number: Option<String>,

    /// Whether this contact roots its cluster.
    pub link_precedence: LinkPrecedence,

    /// The cluster primary; set iff `link_precedence` is secondary.
    pub linked_id: Option<ContactId>,

    /// When the contact was first recorded.
    pub created_at: DateTime<Utc>,

    /// When the link was last rewritten.
    pub updated_at: DateTime<Utc>,

    /// Reserved for soft deletion.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Contact {
    /// Returns `true` if this contact is its cluster's primary.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.link_precedence.is_primary()
    }

    /// Returns the link as a single value.
    ///
    /// A secondary row that is missing its `linked_id` is reported as a primary;
    /// [`Contact::validate`] rejects such rows before they reach a store.
    #[must_use]
    pub fn link(&self) -> Link {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Secondary, Some(target)) => Link::Secondary(target),
            _ => Link::Primary,
        }
    }

    /// Id of the cluster primary this contact belongs to (itself when primary).
    #[must_use]
    pub fn primary_id(&self) -> ContactId {
        self.link().linked_id().unwrap_or(self.id)
    }

    /// Returns `true` if the email equals `email` exactly.
    #[must_use]
    pub fn has_email(&self, email: &str) -> bool {
        self.email.as_deref() == Some(email)
    }

    /// Returns `true` if the phone number equals `phone_number` exactly.
    #[must_use]
    pub fn has_phone_number(&self, phone_number: &str) -> bool {
        self.phone_number.as_deref() == Some(phone_number)
    }

    /// Rewrites the link, stamping `updated_at`.
    pub fn relink(&mut self, link: Link, at: DateTime<Utc>) {
        self.link_precedence = link.precedence();
        self.linked_id = link.linked_id();
        self.updated_at = at;
    }

    /// Checks that the row is internally consistent.
    ///
    /// # Errors
    /// Returns a description of the first inconsistency found.
    pub fn validate(&self) -> Result<(), String> {
        match (self.link_precedence, self.linked_id) {
            (LinkPrecedence::Primary, Some(target)) => {
                Err(format!("primary contact {} links to {target}", self.id))
            }
            (LinkPrecedence::Secondary, None) => {
                Err(format!("secondary contact {} has no linked id", self.id))
            }
            (LinkPrecedence::Secondary, Some(target)) if target == self.id => {
                Err(format!("contact {} links to itself", self.id))
            }
            _ if self.email.is_none() && self.phone_number.is_none() => {
                Err(format!("contact {} has neither email nor phone number", self.id))
            }
            _ => Ok(()),
        }
    }
}

/// A contact that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    /// Email address.
    pub email: Option<String>,
    /// Phone number.
    pub phone_number: Option<String>,
    /// Initial link.
    pub link: Link,
    /// Creation timestamp (also the initial `updated_at`).
    pub created_at: DateTime<Utc>,
}

impl NewContact {
    /// A contact that starts a new cluster.
    #[must_use]
    pub fn primary(
        email: Option<String>,
        phone_number: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email,
            phone_number,
            link: Link::Primary,
            created_at,
        }
    }

    /// A contact that joins the cluster rooted at `primary`.
    #[must_use]
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary: ContactId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            email,
            phone_number,
            link: Link::Secondary(primary),
            created_at,
        }
    }

    /// Materializes the row under the given id.
    #[must_use]
    pub fn into_contact(self, id: ContactId) -> Contact {
        Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            link_precedence: self.link.precedence(),
            linked_id: self.link.linked_id(),
            created_at: self.created_at,
            updated_at: self.created_at,
            deleted_at: None,
        }
    }
}

/// A link rewrite applied by [`crate::storage::ContactStore::bulk_update`].
///
/// `expected` is the link the caller read; the store rejects the whole batch if
/// the stored row no longer carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    /// Row being rewritten.
    pub id: ContactId,
    /// Link observed when the update was planned.
    pub expected: Link,
    /// Link to write.
    pub link: Link,
    /// New `updated_at`.
    pub updated_at: DateTime<Utc>,
}

impl ContactUpdate {
    /// Plans a rewrite of `contact` to `link`.
    #[must_use]
    pub fn relink(contact: &Contact, link: Link, updated_at: DateTime<Utc>) -> Self {
        Self {
            id: contact.id,
            expected: contact.link(),
            link,
            updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secondary(id: i64, primary: i64) -> Contact {
        NewContact::secondary(
            Some("marty@hillvalley.edu".to_string()),
            None,
            ContactId::new(primary),
            Utc::now(),
        )
        .into_contact(ContactId::new(id))
    }

    #[test]
    fn test_link_roundtrips_through_fields() {
        let contact = secondary(2, 1);
        assert_eq!(contact.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(contact.linked_id, Some(ContactId::new(1)));
        assert_eq!(contact.link(), Link::Secondary(ContactId::new(1)));
        assert_eq!(contact.primary_id(), ContactId::new(1));
    }

    #[test]
    fn test_relink_stamps_updated_at() {
        let mut contact = NewContact::primary(None, Some("123456".to_string()), Utc::now())
            .into_contact(ContactId::new(5));
        let later = contact.created_at + chrono::Duration::seconds(30);
        contact.relink(Link::Secondary(ContactId::new(3)), later);

        assert!(!contact.is_primary());
        assert_eq!(contact.linked_id, Some(ContactId::new(3)));
        assert_eq!(contact.updated_at, later);
        assert!(contact.created_at < contact.updated_at);
    }

    #[test]
    fn test_validate_rejects_inconsistent_rows() {
        let mut contact = secondary(2, 1);
        assert!(contact.validate().is_ok());

        contact.linked_id = None;
        assert!(contact.validate().unwrap_err().contains("no linked id"));

        contact.linked_id = Some(ContactId::new(2));
        assert!(contact.validate().unwrap_err().contains("itself"));

        let mut orphan = secondary(3, 1);
        orphan.email = None;
        assert!(orphan.validate().unwrap_err().contains("neither"));
    }

    #[test]
    fn test_contact_serializes_camel_case() {
        let contact = secondary(2, 1);
        let json = serde_json::to_value(&contact).unwrap();
        assert_eq!(json["linkPrecedence"], "secondary");
        assert_eq!(json["linkedId"], 1);
        assert_eq!(json["phoneNumber"], serde_json::Value::Null);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn test_update_captures_expected_link() {
        let contact = secondary(4, 1);
        let update = ContactUpdate::relink(&contact, Link::Secondary(ContactId::new(2)), Utc::now());
        assert_eq!(update.expected, Link::Secondary(ContactId::new(1)));
        assert_eq!(update.link.linked_id(), Some(ContactId::new(2)));
    }
}
