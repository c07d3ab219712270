//! Contact index shared by the storage backends.
//!
//! Rows are kept in a `BTreeMap` keyed on [`ContactId`] and every secondary
//! index holds ordered id sets, so all lookups come back in ascending id order
//! without sorting.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, ContactUpdate, Link, NewContact};
use crate::storage::traits::StorageError;

/// Owned, serializable image of an index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    /// Next id the store will assign.
    pub next_id: Option<ContactId>,
    /// All rows in ascending id order.
    pub contacts: Vec<Contact>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ContactIndex {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    next_id: Option<ContactId>,
}

impl ContactIndex {
    pub(crate) fn from_snapshot(snapshot: ContactSnapshot) -> Result<Self, StorageError> {
        let mut index = Self::default();
        for contact in snapshot.contacts {
            index.restore(contact)?;
        }
        if let Some(next) = snapshot.next_id {
            if index.peek_next_id() > next {
                return Err(StorageError::InvalidRecord(format!(
                    "snapshot next_id {next} is behind stored ids"
                )));
            }
            index.next_id = Some(next);
        }
        Ok(index)
    }

    pub(crate) fn snapshot(&self) -> ContactSnapshot {
        ContactSnapshot {
            next_id: Some(self.peek_next_id()),
            contacts: self.by_id.values().cloned().collect(),
        }
    }

    pub(crate) fn peek_next_id(&self) -> ContactId {
        self.next_id.unwrap_or(ContactId::FIRST)
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Validates `contact` and materializes it under the next id without storing it.
    pub(crate) fn prepare_insert(&self, contact: NewContact) -> Result<Contact, StorageError> {
        let row = contact.into_contact(self.peek_next_id());
        successor(row.id)?;
        row.validate().map_err(StorageError::InvalidRecord)?;
        if let Link::Secondary(target) = row.link() {
            self.require_primary(row.id, target, None)?;
        }
        Ok(row)
    }

    /// Stores a row produced by [`ContactIndex::prepare_insert`] or read back from disk.
    pub(crate) fn restore(&mut self, contact: Contact) -> Result<(), StorageError> {
        if self.by_id.contains_key(&contact.id) {
            return Err(StorageError::DuplicateKey(contact.id.to_string()));
        }
        contact.validate().map_err(StorageError::InvalidRecord)?;

        if contact.id >= self.peek_next_id() {
            self.next_id = Some(successor(contact.id)?);
        }
        if let Some(email) = &contact.email {
            self.by_email.entry(email.clone()).or_default().insert(contact.id);
        }
        if let Some(phone) = &contact.phone_number {
            self.by_phone.entry(phone.clone()).or_default().insert(contact.id);
        }
        if let Some(target) = contact.linked_id {
            self.by_linked.entry(target).or_default().insert(contact.id);
        }
        self.by_id.insert(contact.id, contact);
        Ok(())
    }

    pub(crate) fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    pub(crate) fn find_by_email(&self, email: &str) -> Vec<Contact> {
        self.collect(self.by_email.get(email))
    }

    pub(crate) fn find_by_phone(&self, phone_number: &str) -> Vec<Contact> {
        self.collect(self.by_phone.get(phone_number))
    }

    pub(crate) fn find_by_linked_id(&self, primary: ContactId) -> Vec<Contact> {
        self.collect(self.by_linked.get(&primary))
    }

    pub(crate) fn all(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    fn collect(&self, ids: Option<&BTreeSet<ContactId>>) -> Vec<Contact> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.by_id.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    /// Checks a batch against the current rows and returns the rewritten rows.
    ///
    /// Nothing is modified; pass the result to [`ContactIndex::apply_rows`].
    pub(crate) fn prepare_batch(
        &self,
        updates: &[ContactUpdate],
    ) -> Result<Vec<Contact>, StorageError> {
        let mut staged: BTreeMap<ContactId, Contact> = BTreeMap::new();

        for update in updates {
            let current = match staged.get(&update.id) {
                Some(row) => row.clone(),
                None => self
                    .by_id
                    .get(&update.id)
                    .cloned()
                    .ok_or(StorageError::ContactNotFound(update.id))?,
            };
            if current.link() != update.expected {
                return Err(StorageError::StaleWrite { id: update.id });
            }
            let mut next = current;
            next.relink(update.link, update.updated_at);
            next.validate().map_err(StorageError::InvalidRecord)?;
            staged.insert(next.id, next);
        }

        for row in staged.values() {
            if let Link::Secondary(target) = row.link() {
                self.require_primary(row.id, target, Some(&staged))?;
            }
        }

        // A demoted primary may not keep secondaries the batch leaves behind.
        for row in staged.values().filter(|row| !row.is_primary()) {
            let Some(members) = self.by_linked.get(&row.id) else {
                continue;
            };
            for member in members {
                let still_linked = staged
                    .get(member)
                    .map_or(true, |m| m.linked_id == Some(row.id));
                if still_linked {
                    return Err(StorageError::InvalidRecord(format!(
                        "demoting contact {} would leave contact {member} chained to a secondary",
                        row.id
                    )));
                }
            }
        }

        Ok(staged.into_values().collect())
    }

    /// Replaces rows with their rewritten versions. Rows must come from
    /// [`ContactIndex::prepare_batch`] (or a WAL record of one).
    pub(crate) fn apply_rows(&mut self, rows: Vec<Contact>) -> Result<(), StorageError> {
        for row in rows {
            let previous = self
                .by_id
                .get(&row.id)
                .ok_or(StorageError::ContactNotFound(row.id))?;
            if let Some(old_target) = previous.linked_id {
                if let Some(set) = self.by_linked.get_mut(&old_target) {
                    set.remove(&row.id);
                    if set.is_empty() {
                        self.by_linked.remove(&old_target);
                    }
                }
            }
            if let Some(target) = row.linked_id {
                self.by_linked.entry(target).or_default().insert(row.id);
            }
            self.by_id.insert(row.id, row);
        }
        Ok(())
    }

    fn require_primary(
        &self,
        id: ContactId,
        target: ContactId,
        staged: Option<&BTreeMap<ContactId, Contact>>,
    ) -> Result<(), StorageError> {
        let row = staged
            .and_then(|s| s.get(&target))
            .or_else(|| self.by_id.get(&target));
        match row {
            Some(row) if row.is_primary() => Ok(()),
            Some(_) => Err(StorageError::InvalidRecord(format!(
                "contact {id} would link to secondary contact {target}"
            ))),
            None => Err(StorageError::InvalidRecord(format!(
                "contact {id} links to unknown contact {target}"
            ))),
        }
    }
}

fn successor(id: ContactId) -> Result<ContactId, StorageError> {
    id.checked_next().ok_or_else(|| {
        StorageError::InvalidRecord(format!("contact id {id} is the last assignable id"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn insert(index: &mut ContactIndex, contact: NewContact) -> Contact {
        let row = index.prepare_insert(contact).unwrap();
        index.restore(row.clone()).unwrap();
        row
    }

    fn primary(index: &mut ContactIndex, email: &str, phone: &str) -> Contact {
        insert(
            index,
            NewContact::primary(Some(email.to_string()), Some(phone.to_string()), Utc::now()),
        )
    }

    #[test]
    fn test_ids_are_assigned_in_order() {
        let mut index = ContactIndex::default();
        let a = primary(&mut index, "a@x.com", "111");
        let b = primary(&mut index, "b@x.com", "222");
        assert_eq!(a.id, ContactId::FIRST);
        assert_eq!(b.id, ContactId::new(2));
        assert_eq!(index.peek_next_id(), ContactId::new(3));
    }

    #[test]
    fn test_secondary_must_target_a_primary() {
        let mut index = ContactIndex::default();
        let p = primary(&mut index, "a@x.com", "111");
        let s = insert(
            &mut index,
            NewContact::secondary(Some("a@x.com".into()), Some("222".into()), p.id, Utc::now()),
        );

        let err = index
            .prepare_insert(NewContact::secondary(None, Some("333".into()), s.id, Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn test_batch_rejects_stale_expectation() {
        let mut index = ContactIndex::default();
        let p1 = primary(&mut index, "a@x.com", "111");
        let p2 = primary(&mut index, "b@x.com", "222");

        let update = ContactUpdate {
            id: p2.id,
            expected: Link::Secondary(p1.id),
            link: Link::Secondary(p1.id),
            updated_at: Utc::now(),
        };
        let err = index.prepare_batch(&[update]).unwrap_err();
        assert!(matches!(err, StorageError::StaleWrite { id } if id == p2.id));
    }

    #[test]
    fn test_batch_rejects_orphaned_secondaries() {
        let mut index = ContactIndex::default();
        let p1 = primary(&mut index, "a@x.com", "111");
        let p2 = primary(&mut index, "b@x.com", "222");
        insert(
            &mut index,
            NewContact::secondary(Some("c@x.com".into()), Some("222".into()), p2.id, Utc::now()),
        );

        let demote = ContactUpdate::relink(&p2, Link::Secondary(p1.id), Utc::now());
        let err = index.prepare_batch(&[demote]).unwrap_err();
        assert!(err.to_string().contains("chained"));
    }

    #[test]
    fn test_apply_rows_moves_linked_index() {
        let mut index = ContactIndex::default();
        let p1 = primary(&mut index, "a@x.com", "111");
        let p2 = primary(&mut index, "b@x.com", "222");
        let s = insert(
            &mut index,
            NewContact::secondary(Some("c@x.com".into()), Some("222".into()), p2.id, Utc::now()),
        );

        let now = Utc::now();
        let rows = index
            .prepare_batch(&[
                ContactUpdate::relink(&p2, Link::Secondary(p1.id), now),
                ContactUpdate::relink(&s, Link::Secondary(p1.id), now),
            ])
            .unwrap();
        index.apply_rows(rows).unwrap();

        let members: Vec<_> = index.find_by_linked_id(p1.id).iter().map(|c| c.id).collect();
        assert_eq!(members, vec![p2.id, s.id]);
        assert!(index.find_by_linked_id(p2.id).is_empty());
    }

    #[test]
    fn test_id_space_exhaustion_is_an_error() {
        let mut index = ContactIndex::default();
        let last = NewContact::primary(Some("a@x.com".into()), None, Utc::now())
            .into_contact(ContactId::new(i64::MAX));
        let err = index.restore(last).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
        assert_eq!(index.len(), 0);
        assert!(index.find_by_email("a@x.com").is_empty());

        let full = ContactIndex::from_snapshot(ContactSnapshot {
            next_id: Some(ContactId::new(i64::MAX)),
            contacts: Vec::new(),
        })
        .unwrap();
        let err = full
            .prepare_insert(NewContact::primary(None, Some("111".into()), Utc::now()))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord(_)));
    }

    #[test]
    fn test_snapshot_restores_next_id() {
        let mut index = ContactIndex::default();
        primary(&mut index, "a@x.com", "111");
        let mut snapshot = index.snapshot();
        snapshot.next_id = Some(ContactId::new(10));

        let restored = ContactIndex::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored.peek_next_id(), ContactId::new(10));
    }
}
