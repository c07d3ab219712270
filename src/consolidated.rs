//! Externally visible cluster summary.

use serde::{Deserialize, Serialize};

use crate::contact::ContactId;

/// One identity cluster as callers see it.
///
/// Serializes with camelCase keys:
///
/// ```json
/// {
///   "primaryContactId": 1,
///   "emails": ["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"],
///   "phoneNumbers": ["123456"],
///   "secondaryContactIds": [23]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedContact {
    /// Id of the cluster primary.
    pub primary_contact_id: ContactId,
    /// Distinct emails, the primary's first.
    pub emails: Vec<String>,
    /// Distinct phone numbers, the primary's first.
    pub phone_numbers: Vec<String>,
    /// Secondary ids in ascending order.
    pub secondary_contact_ids: Vec<ContactId>,
}

impl ConsolidatedContact {
    /// Total contacts in the cluster.
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.secondary_contact_ids.len()
    }

    /// Always `false`: a cluster has at least its primary.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Wraps the summary in the response envelope.
    #[must_use]
    pub fn into_response(self) -> IdentifyResponse {
        IdentifyResponse { contact: self }
    }
}

/// Response envelope: `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    /// The consolidated cluster.
    pub contact: ConsolidatedContact,
}

impl From<ConsolidatedContact> for IdentifyResponse {
    fn from(contact: ConsolidatedContact) -> Self {
        Self { contact }
    }
}
