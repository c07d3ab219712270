//! Identity resolver.
//!
//! [`IdentityResolver::identify`] runs Lookup, then Linker or Merger depending on
//! the match, then Consolidator, all under one write gate.

mod audit;
mod consolidator;
mod linker;
mod lookup;
mod merger;

pub use audit::{audit_contacts, InvariantViolation};
pub use consolidator::{consolidate, consolidate_by_identifiers, load_cluster, Cluster};
pub use linker::{create_primary, create_secondary, resolve_primary, select_primary};
pub use lookup::{lookup, MatchKind, MatchSet};
pub use merger::{merge, MergeOutcome};

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::ResolverConfig;
use crate::consolidated::ConsolidatedContact;
use crate::contact::ContactId;
use crate::error::{IdentityError, IdentityResult, ValidationError};
use crate::request::IdentifyRequest;
use crate::storage::ContactStore;
use crate::time::{Clock, SystemClock};

/// Resolves (email, phone number) observations into identity clusters.
///
/// Clones share the store, the clock and the write gate, so any number of
/// threads may call [`identify`](Self::identify) on clones of one resolver.
///
/// The gate is created by [`new`](Self::new) and [`with_config`](Self::with_config).
/// Two resolvers constructed separately over the same store are not serialized
/// against each other: a racing merge surfaces as a retryable `StaleWrite`, and
/// two racing requests for unseen identifiers may each create a primary. Share
/// one resolver by cloning it.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use contact_identity::{IdentifyRequest, IdentityResolver, InMemoryContactStore};
///
/// let resolver = IdentityResolver::new(Arc::new(InMemoryContactStore::new()));
/// let request = IdentifyRequest::builder()
///     .email("lorraine@hillvalley.edu")
///     .phone_number("123456")
///     .build()?;
/// let contact = resolver.identify(request)?;
/// assert!(contact.secondary_contact_ids.is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    write_gate: Arc<Mutex<()>>,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Creates a resolver with the default configuration and the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config: ResolverConfig::default(),
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a resolver with an explicit configuration.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the configuration fails validation.
    pub fn with_config(
        store: Arc<dyn ContactStore>,
        config: ResolverConfig,
    ) -> Result<Self, ValidationError> {
        let config = config.validate()?;
        Ok(Self {
            config,
            ..Self::new(store)
        })
    }

    /// Replaces the clock used to stamp rows.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get a reference to the contact store.
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Active configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolves one observation and returns the consolidated cluster it belongs to.
    ///
    /// # Errors
    /// - `Validation` if the request carries no usable identifier
    /// - `Execution` for ambiguous or broken graphs, merge limits and storage
    ///   failures; a failed request writes nothing
    pub fn identify(&self, request: IdentifyRequest) -> IdentityResult<ConsolidatedContact> {
        let request = request.validate(self.config.max_field_length)?;
        let email = request.email();
        let phone_number = request.phone_number();
        let store = self.store.as_ref();
        let clock = self.clock.as_ref();

        let _gate = self
            .write_gate
            .lock()
            .map_err(|_| IdentityError::internal("write gate poisoned"))?;

        let matches = lookup(store, email, phone_number)?;
        let kind = matches.kind();
        debug!(
            request_id = %request.request_id,
            kind = %kind,
            email_matches = matches.email_matches.len(),
            phone_matches = matches.phone_matches.len(),
            "classified identify request"
        );

        let anchor = match kind {
            MatchKind::NoMatch => {
                let created = create_primary(store, clock, email, phone_number)?;
                return Ok(load_cluster(store, created.id)?.summarize());
            }
            MatchKind::Exact(id) => id,
            MatchKind::Partial => {
                create_secondary(
                    store,
                    clock,
                    self.config.primary_selection,
                    &matches,
                    email,
                    phone_number,
                )?
                .id
            }
            MatchKind::Bridging => {
                merge(store, clock, &matches, self.config.max_merge_steps)?.target
            }
        };

        consolidate(store, anchor).map_err(|err| {
            warn!(request_id = %request.request_id, error = %err, "consolidation failed");
            err
        })
    }

    /// Summarizes the cluster holding the contact carrying `email` or
    /// `phone_number`, without writing anything.
    ///
    /// # Errors
    /// `ClusterNotFound` if nothing matches; see also [`load_cluster`].
    pub fn consolidate(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> IdentityResult<ConsolidatedContact> {
        consolidate_by_identifiers(self.store.as_ref(), email, phone_number)
    }

    /// Loads the cluster containing `id`.
    ///
    /// # Errors
    /// `ContactNotFound` or `BrokenLink`.
    pub fn cluster(&self, id: ContactId) -> IdentityResult<Cluster> {
        load_cluster(self.store.as_ref(), id)
    }

    /// Scans the store for invariant violations.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub fn audit(&self) -> IdentityResult<Vec<InvariantViolation>> {
        let contacts = self.store.all()?;
        let found = audit_contacts(&contacts);
        if !found.is_empty() {
            warn!(violations = found.len(), "contact graph audit found violations");
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrimarySelection;
    use crate::storage::InMemoryContactStore;
    use crate::time::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use tracing_test::traced_test;

    fn resolver() -> IdentityResolver {
        let start = Utc.with_ymd_and_hms(2023, 4, 1, 0, 0, 0).unwrap();
        IdentityResolver::new(Arc::new(InMemoryContactStore::new()))
            .with_clock(Arc::new(ManualClock::new(start, Duration::seconds(1))))
    }

    fn request(email: Option<&str>, phone: Option<&str>) -> IdentifyRequest {
        IdentifyRequest::builder()
            .maybe_email(email.map(String::from))
            .maybe_phone_number(phone.map(String::from))
            .build()
            .unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = ResolverConfig {
            max_merge_steps: 0,
            ..ResolverConfig::default()
        };
        let store: Arc<dyn ContactStore> = Arc::new(InMemoryContactStore::new());
        assert!(IdentityResolver::with_config(store, config).is_err());
    }

    #[test]
    fn test_write_gate_is_shared_by_clones_only() {
        let resolver = resolver();
        let clone = resolver.clone().with_clock(Arc::new(SystemClock));
        assert!(Arc::ptr_eq(&resolver.write_gate, &clone.write_gate));

        let separate = IdentityResolver::new(Arc::clone(resolver.store()));
        assert!(Arc::ptr_eq(resolver.store(), separate.store()));
        assert!(!Arc::ptr_eq(&resolver.write_gate, &separate.write_gate));
    }

    #[test]
    fn test_wire_request_is_validated() {
        let resolver = resolver();
        let raw: IdentifyRequest = serde_json::from_str(r#"{"email": "", "phoneNumber": null}"#).unwrap();
        let err = resolver.identify(raw).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(resolver.store().len().unwrap(), 0);
    }

    #[test]
    fn test_partial_match_creates_secondary() {
        let resolver = resolver();
        resolver
            .identify(request(Some("lorraine@hillvalley.edu"), Some("123456")))
            .unwrap();
        let summary = resolver
            .identify(request(Some("mcfly@hillvalley.edu"), Some("123456")))
            .unwrap();

        assert_eq!(summary.primary_contact_id, ContactId::FIRST);
        assert_eq!(summary.emails, vec!["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"]);
        assert_eq!(summary.phone_numbers, vec!["123456"]);
        assert_eq!(summary.secondary_contact_ids, vec![ContactId::new(2)]);
    }

    #[test]
    fn test_single_field_repeat_creates_nothing() {
        let resolver = resolver();
        resolver
            .identify(request(Some("lorraine@hillvalley.edu"), Some("123456")))
            .unwrap();
        resolver.identify(request(None, Some("123456"))).unwrap();
        resolver
            .identify(request(Some("lorraine@hillvalley.edu"), None))
            .unwrap();
        assert_eq!(resolver.store().len().unwrap(), 1);
    }

    #[test]
    fn test_cluster_and_consolidate_agree() {
        let resolver = resolver();
        resolver.identify(request(Some("a@x.com"), Some("111"))).unwrap();
        resolver.identify(request(Some("b@x.com"), Some("111"))).unwrap();

        let cluster = resolver.cluster(ContactId::new(2)).unwrap();
        assert_eq!(cluster.primary.id, ContactId::FIRST);
        assert_eq!(cluster.members().count(), 2);
        assert_eq!(
            resolver.consolidate(Some("b@x.com"), None).unwrap(),
            cluster.summarize()
        );
    }

    #[test]
    #[traced_test]
    fn test_logs_creation_and_demotion() {
        let resolver = resolver();
        resolver
            .identify(request(Some("george@hillvalley.edu"), Some("919191")))
            .unwrap();
        resolver
            .identify(request(Some("biffsucks@hillvalley.edu"), Some("717171")))
            .unwrap();
        resolver
            .identify(request(Some("george@hillvalley.edu"), Some("717171")))
            .unwrap();

        assert!(logs_contain("created primary contact"));
        assert!(logs_contain("kind=bridging"));
        assert!(logs_contain("demoted primary contact"));
    }

    #[test]
    fn test_last_observed_selection_is_accepted() {
        let config = ResolverConfig {
            primary_selection: PrimarySelection::LastObserved,
            ..ResolverConfig::default()
        };
        let store: Arc<dyn ContactStore> = Arc::new(InMemoryContactStore::new());
        let resolver = IdentityResolver::with_config(store, config).unwrap();
        assert_eq!(
            resolver.config().primary_selection,
            PrimarySelection::LastObserved
        );
        resolver.identify(request(Some("a@x.com"), None)).unwrap();
        assert!(resolver.audit().unwrap().is_empty());
    }
}
