//! Merger: folds every cluster a bridging request touches into one.
//!
//! The merge is planned against a staging arena and written with a single
//! [`ContactStore::bulk_update`], so either the whole union lands or nothing
//! does.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, info};

use crate::contact::{Contact, ContactId, ContactUpdate, Link};
use crate::error::{ExecutionError, IdentityResult};
use crate::storage::ContactStore;
use crate::time::Clock;

use super::lookup::MatchSet;

/// What a merge changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Primary of the merged cluster.
    pub target: ContactId,
    /// Former primaries that are now secondaries of `target`.
    pub demoted: Vec<ContactId>,
    /// Secondaries moved onto `target`.
    pub repointed: Vec<ContactId>,
    /// Set when `target` was itself a secondary and took over its cluster.
    pub promoted: bool,
}

impl MergeOutcome {
    /// Returns `true` if nothing had to be rewritten.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.demoted.is_empty() && self.repointed.is_empty() && !self.promoted
    }
}

/// Merges the clusters reachable from `matches` under their oldest contact.
///
/// # Errors
/// - `MergeLimitExceeded` if more than `max_steps` contacts would be visited;
///   nothing is written in that case
/// - `ContactNotFound` if a link points at a row that does not exist
/// - storage failures, including `StaleWrite` if another writer changed a row
///   between planning and commit
pub fn merge(
    store: &dyn ContactStore,
    clock: &dyn Clock,
    matches: &MatchSet,
    max_steps: usize,
) -> IdentityResult<MergeOutcome> {
    let mut arena = Arena::new(store);

    let mut gathered = matches.union();
    let linked: BTreeSet<ContactId> = gathered.values().filter_map(|c| c.linked_id).collect();
    for id in linked {
        if !gathered.contains_key(&id) {
            gathered.insert(id, arena.load(id)?);
        }
    }

    let target = gathered
        .values()
        .min_by_key(|c| (c.created_at, c.id))
        .map(|c| c.id)
        .ok_or_else(|| ExecutionError::ClusterNotFound {
            identifiers: "an empty match set".to_string(),
        })?;

    for contact in gathered.into_values() {
        arena.seed(contact);
    }

    let now = clock.now();
    let mut outcome = MergeOutcome {
        target,
        demoted: Vec::new(),
        repointed: Vec::new(),
        promoted: false,
    };
    let mut updates = Vec::new();

    let target_row = arena.load(target)?;
    if let Link::Secondary(previous) = target_row.link() {
        updates.push(ContactUpdate::relink(&target_row, Link::Primary, now));
        outcome.promoted = true;
        debug!(contact_id = %target, previous_primary = %previous, "oldest contact is a secondary");
    }

    let mut queue: VecDeque<ContactId> = arena.seeded().filter(|id| *id != target).collect();
    let mut visited: BTreeSet<ContactId> = BTreeSet::from([target]);
    let mut steps = 0usize;

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        steps += 1;
        if steps > max_steps {
            return Err(ExecutionError::MergeLimitExceeded { max_steps }.into());
        }

        let contact = arena.load(id)?;
        match contact.link() {
            Link::Primary => {
                updates.push(ContactUpdate::relink(&contact, Link::Secondary(target), now));
                outcome.demoted.push(id);
                for member in store.find_by_linked_id(id)? {
                    arena.seed(member.clone());
                    queue.push_back(member.id);
                }
            }
            Link::Secondary(current) if current == target => {}
            Link::Secondary(current) => {
                updates.push(ContactUpdate::relink(&contact, Link::Secondary(target), now));
                outcome.repointed.push(id);
                queue.push_back(current);
            }
        }
    }

    debug!(
        target_id = %target,
        visited = steps,
        updates = updates.len(),
        "planned merge"
    );

    if updates.is_empty() {
        return Ok(outcome);
    }
    store.bulk_update(updates)?;

    if outcome.promoted {
        info!(contact_id = %target, "promoted contact to primary");
    }
    for id in &outcome.demoted {
        info!(contact_id = %id, primary_id = %target, "demoted primary contact");
    }
    outcome.demoted.sort_unstable();
    outcome.repointed.sort_unstable();
    Ok(outcome)
}

/// Contacts read during planning, so each row is fetched once and every update
/// carries the link that was actually observed.
struct Arena<'a> {
    store: &'a dyn ContactStore,
    rows: BTreeMap<ContactId, Contact>,
}

impl<'a> Arena<'a> {
    fn new(store: &'a dyn ContactStore) -> Self {
        Self {
            store,
            rows: BTreeMap::new(),
        }
    }

    fn seed(&mut self, contact: Contact) {
        self.rows.entry(contact.id).or_insert(contact);
    }

    fn seeded(&self) -> impl Iterator<Item = ContactId> + '_ {
        self.rows.keys().copied()
    }

    fn load(&mut self, id: ContactId) -> IdentityResult<Contact> {
        if let Some(row) = self.rows.get(&id) {
            return Ok(row.clone());
        }
        let row = self
            .store
            .get(id)?
            .ok_or(ExecutionError::ContactNotFound { id })?;
        self.rows.insert(id, row.clone());
        Ok(row)
    }
}
