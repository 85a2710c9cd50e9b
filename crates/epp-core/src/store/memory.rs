// # Memory Store
//
// In-memory implementation of Persistence.
//
// ## Purpose
//
// Provides a simple, fast store for tests and for embedding the core
// without a database. Nothing survives a restart.
//
// ## Soft Delete
//
// A soft-deleted domain keeps its row: status becomes `Inactive`, the
// registry id, auth key and registry statuses are cleared.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{Contact, Domain, DomainStatus};
use crate::traits::Persistence;

#[derive(Debug, Default)]
struct Tables {
    domains: HashMap<String, Domain>,
    contacts: HashMap<u64, Contact>,
    next_contact_id: u64,
}

impl Tables {
    fn assign_contact_id(&mut self) -> u64 {
        self.next_contact_id += 1;
        self.next_contact_id
    }
}

/// In-memory persistence implementation
///
/// Tables are `HashMap`s protected by a single `RwLock`. Cloning the store
/// shares the tables.
///
/// # Example
///
/// ```rust,no_run
/// use epp_core::model::Contact;
/// use epp_core::store::MemoryStore;
/// use epp_core::traits::Persistence;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStore::new();
///
///     let contact = store
///         .contact_create(Contact {
///             epp_id: Some("abc123".to_string()),
///             contact_email: "abc@example.com".to_string(),
///             ..Contact::default()
///         })
///         .await?;
///
///     let found = store.contact_find("abc123").await?;
///     assert_eq!(found.map(|c| c.id), Some(contact.id));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of domain records in the store
    pub async fn domain_count(&self) -> usize {
        self.inner.read().await.domains.len()
    }

    /// Get the number of contact records in the store
    pub async fn contact_count(&self) -> usize {
        self.inner.read().await.contacts.len()
    }

    /// All contact records, ordered by local id
    pub async fn contacts(&self) -> Vec<Contact> {
        let guard = self.inner.read().await;
        let mut contacts: Vec<Contact> = guard.contacts.values().cloned().collect();
        contacts.sort_by_key(|c| c.id);
        contacts
    }

    /// Clear all records from the store
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.domains.clear();
        guard.contacts.clear();
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn domain_find(&self, name: &str) -> Result<Option<Domain>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.domains.get(name).cloned())
    }

    async fn domain_create(&self, domain: Domain) -> Result<Domain, Error> {
        let mut guard = self.inner.write().await;
        if guard.domains.contains_key(&domain.name) {
            return Err(Error::persistence(format!(
                "Domain {} already exists",
                domain.name
            )));
        }
        guard.domains.insert(domain.name.clone(), domain.clone());
        Ok(domain)
    }

    async fn domain_save(&self, domain: &Domain) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.domains.insert(domain.name.clone(), domain.clone());
        Ok(())
    }

    async fn domain_delete(&self, name: &str, soft: bool) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if soft {
            if let Some(domain) = guard.domains.get_mut(name) {
                domain.status = DomainStatus::Inactive;
                domain.epp_id = None;
                domain.auth_key = None;
                domain.epp_statuses.clear();
            }
        } else {
            guard.domains.remove(name);
        }
        Ok(())
    }

    async fn domain_list(&self) -> Result<Vec<String>, Error> {
        let guard = self.inner.read().await;
        let mut names: Vec<String> = guard.domains.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn contact_find(&self, epp_id: &str) -> Result<Option<Contact>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .contacts
            .values()
            .find(|c| c.known_epp_id() == Some(epp_id))
            .cloned())
    }

    async fn contact_create(&self, mut contact: Contact) -> Result<Contact, Error> {
        let mut guard = self.inner.write().await;
        contact.id = guard.assign_contact_id();
        guard.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn contact_save(&self, contact: &Contact) -> Result<Contact, Error> {
        let mut guard = self.inner.write().await;
        let mut contact = contact.clone();
        if contact.id == 0 {
            contact.id = guard.assign_contact_id();
        }
        guard.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContactKind;

    #[tokio::test]
    async fn test_memory_store_domains() {
        let store = MemoryStore::new();

        let domain = Domain::new("example.ai", "owner@example.com");
        store.domain_create(domain.clone()).await.unwrap();
        assert_eq!(store.domain_count().await, 1);

        // Duplicate create is rejected
        assert!(store.domain_create(domain).await.is_err());

        let found = store.domain_find("example.ai").await.unwrap().unwrap();
        assert_eq!(found.zone, "ai");

        store.domain_delete("example.ai", false).await.unwrap();
        assert_eq!(store.domain_count().await, 0);
    }

    #[tokio::test]
    async fn test_memory_store_soft_delete() {
        let store = MemoryStore::new();

        let mut domain = Domain::new("example.ai", "owner@example.com");
        domain.epp_id = Some("D1-AI".to_string());
        domain.status = DomainStatus::Active;
        store.domain_save(&domain).await.unwrap();

        store.domain_delete("example.ai", true).await.unwrap();

        let found = store.domain_find("example.ai").await.unwrap().unwrap();
        assert_eq!(found.status, DomainStatus::Inactive);
        assert_eq!(found.epp_id, None);
    }

    #[tokio::test]
    async fn test_memory_store_contacts() {
        let store = MemoryStore::new();

        let saved = store
            .contact_save(&Contact {
                epp_id: Some("reg1".to_string()),
                kind: ContactKind::Registrant,
                ..Contact::default()
            })
            .await
            .unwrap();
        assert_ne!(saved.id, 0);

        let other = store.contact_create(Contact::default()).await.unwrap();
        assert_ne!(other.id, saved.id);

        assert!(store.registrant_find("reg1").await.unwrap().is_some());
        assert!(store.registrant_find("missing").await.unwrap().is_none());

        // Saving again with the same id updates in place
        let mut updated = saved.clone();
        updated.person_name = "Alice".to_string();
        store.contact_save(&updated).await.unwrap();
        assert_eq!(store.contact_count().await, 2);
        assert_eq!(
            store.contact_find("reg1").await.unwrap().unwrap().person_name,
            "Alice"
        );
    }
}
