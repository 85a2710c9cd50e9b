// # Persistence Trait
//
// Defines the interface to the registrar database.
//
// ## Purpose
//
// The state machines never issue queries. They read and write domain,
// contact and registrant records through this trait only, so the
// relational layer stays an external collaborator.
//
// ## Implementations
//
// - In-memory: [`MemoryStore`](crate::store::MemoryStore) (tests, embedding)
// - Production: the back-office database layer
//
// ## Usage
//
// ```rust
// use epp_core::model::Domain;
// use epp_core::store::MemoryStore;
// use epp_core::traits::Persistence;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let store = MemoryStore::new();
//     store.domain_create(Domain::new("example.ai", "owner@example.com")).await?;
//     assert!(store.domain_find("example.ai").await?.is_some());
//     Ok(())
// }
// ```

use async_trait::async_trait;

use crate::model::{Contact, ContactKind, Domain};

/// Trait for persistence implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Concurrent conversations on the same domain are serialized by the
/// façade, not by the store.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Find a domain by name
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Domain))`: The stored record
    /// - `Ok(None)`: No record found
    /// - `Err(Error)`: Storage error
    async fn domain_find(&self, name: &str) -> Result<Option<Domain>, crate::Error>;

    /// Insert a new domain record
    ///
    /// Fails if a record with the same name already exists.
    async fn domain_create(&self, domain: Domain) -> Result<Domain, crate::Error>;

    /// Create or update a domain record
    async fn domain_save(&self, domain: &Domain) -> Result<(), crate::Error>;

    /// Remove a domain record
    ///
    /// # Parameters
    ///
    /// - `name`: Domain name
    /// - `soft`: Keep the row but mark it inactive and forget registry state
    async fn domain_delete(&self, name: &str, soft: bool) -> Result<(), crate::Error>;

    /// List all domain names in the store
    async fn domain_list(&self) -> Result<Vec<String>, crate::Error>;

    /// Find a contact or registrant by registry id
    async fn contact_find(&self, epp_id: &str) -> Result<Option<Contact>, crate::Error>;

    /// Insert a new contact record, assigning its local id
    async fn contact_create(&self, contact: Contact) -> Result<Contact, crate::Error>;

    /// Create or update a contact record keyed by local id
    async fn contact_save(&self, contact: &Contact) -> Result<Contact, crate::Error>;

    /// Find a registrant by registry id
    async fn registrant_find(&self, epp_id: &str) -> Result<Option<Contact>, crate::Error> {
        Ok(self
            .contact_find(epp_id)
            .await?
            .filter(|contact| contact.kind == ContactKind::Registrant))
    }
}
