//! Registry vs. local diff for `domain_update`
//!
//! Contacts are compared per role, the registrant by id, nameservers as
//! case-insensitive sets. The result is a [`DomainUpdate`] that is empty
//! when the registry already matches.

use std::collections::BTreeMap;

use crate::epp::{ContactRef, DomainInfo, DomainUpdate};
use crate::model::{ContactRole, Domain};

/// Which parts of a domain a diff may touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffScope {
    /// Role contacts and registrant
    pub contacts: bool,
    pub nameservers: bool,
}

impl DiffScope {
    pub const ALL: DiffScope = DiffScope {
        contacts: true,
        nameservers: true,
    };

    pub const CONTACTS: DiffScope = DiffScope {
        contacts: true,
        nameservers: false,
    };

    pub const NAMESERVERS: DiffScope = DiffScope {
        contacts: false,
        nameservers: true,
    };
}

/// Contact associations to add and remove, compared role by role
pub fn contacts(
    current: &BTreeMap<ContactRole, String>,
    target: &BTreeMap<ContactRole, String>,
) -> (Vec<ContactRef>, Vec<ContactRef>) {
    let mut add = Vec::new();
    let mut remove = Vec::new();

    for role in ContactRole::ALL {
        match (current.get(&role), target.get(&role)) {
            (Some(have), Some(want)) if have == want => {}
            (Some(have), Some(want)) => {
                remove.push(ContactRef::new(role, have.clone()));
                add.push(ContactRef::new(role, want.clone()));
            }
            (Some(have), None) => remove.push(ContactRef::new(role, have.clone())),
            (None, Some(want)) => add.push(ContactRef::new(role, want.clone())),
            (None, None) => {}
        }
    }

    (add, remove)
}

/// New registrant id, if the registry holds a different one
pub fn registrant(current: Option<&str>, target: Option<&str>) -> Option<String> {
    match target {
        Some(want) if current != Some(want) => Some(want.to_string()),
        _ => None,
    }
}

/// Hosts to add and remove so the registry holds exactly `target`
pub fn nameservers(current: &[String], target: &[String]) -> (Vec<String>, Vec<String>) {
    let current: Vec<String> = current.iter().map(|ns| ns.to_lowercase()).collect();
    let target: Vec<String> = target.iter().map(|ns| ns.to_lowercase()).collect();

    let add = target
        .iter()
        .filter(|ns| !current.contains(ns))
        .cloned()
        .collect();
    let remove = current
        .iter()
        .filter(|ns| !target.contains(ns))
        .cloned()
        .collect();
    (add, remove)
}

/// Update bringing the registry copy `info` in line with the local `domain`
pub fn domain_update(info: &DomainInfo, domain: &Domain, scope: DiffScope) -> DomainUpdate {
    let mut update = DomainUpdate::new(&info.name);

    if scope.contacts {
        let (add, remove) = contacts(&info.contacts, &domain.contacts.epp_ids());
        update.add_contacts = add;
        update.remove_contacts = remove;
        update.change_registrant =
            registrant(info.registrant.as_deref(), domain.registrant_epp_id());
    }

    if scope.nameservers {
        let (add, remove) = nameservers(&info.nameservers, &domain.nameserver_list());
        update.add_nameservers = add;
        update.remove_nameservers = remove;
    }

    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contact;

    fn ids(pairs: &[(ContactRole, &str)]) -> BTreeMap<ContactRole, String> {
        pairs.iter().map(|(role, id)| (*role, id.to_string())).collect()
    }

    #[test]
    fn test_contacts_diff_is_role_keyed() {
        let current = ids(&[(ContactRole::Admin, "a1"), (ContactRole::Tech, "t1")]);
        let target = ids(&[(ContactRole::Admin, "a1"), (ContactRole::Billing, "b1"), (ContactRole::Tech, "t2")]);

        let (add, remove) = contacts(&current, &target);

        assert_eq!(
            add,
            vec![ContactRef::new(ContactRole::Billing, "b1"), ContactRef::new(ContactRole::Tech, "t2")]
        );
        assert_eq!(remove, vec![ContactRef::new(ContactRole::Tech, "t1")]);
    }

    #[test]
    fn test_same_id_in_another_role_is_a_change() {
        let current = ids(&[(ContactRole::Admin, "x")]);
        let target = ids(&[(ContactRole::Tech, "x")]);

        let (add, remove) = contacts(&current, &target);
        assert_eq!(add, vec![ContactRef::new(ContactRole::Tech, "x")]);
        assert_eq!(remove, vec![ContactRef::new(ContactRole::Admin, "x")]);
    }

    #[test]
    fn test_registrant_compared_by_id() {
        assert_eq!(registrant(Some("r1"), Some("r1")), None);
        assert_eq!(registrant(Some("r1"), Some("r2")), Some("r2".to_string()));
        assert_eq!(registrant(None, Some("r2")), Some("r2".to_string()));
        assert_eq!(registrant(Some("r1"), None), None);
    }

    #[test]
    fn test_nameservers_ignore_case() {
        let (add, remove) = nameservers(
            &["NS1.example.com".to_string(), "ns2.example.com".to_string()],
            &["ns1.example.com".to_string(), "ns3.example.com".to_string()],
        );
        assert_eq!(add, vec!["ns3.example.com"]);
        assert_eq!(remove, vec!["ns2.example.com"]);
    }

    #[test]
    fn test_domain_update_respects_scope() {
        let info = DomainInfo {
            name: "example.ai".to_string(),
            registrant: Some("r1".to_string()),
            contacts: ids(&[(ContactRole::Admin, "a1")]),
            nameservers: vec!["ns1.example.com".to_string()],
            ..DomainInfo::default()
        };
        let mut domain = Domain::new("example.ai", "owner@example.com");
        domain.registrant = Some(Contact {
            epp_id: Some("r2".to_string()),
            ..Contact::default()
        });
        domain.nameservers = vec!["ns2.example.com".to_string()];

        let update = domain_update(&info, &domain, DiffScope::NAMESERVERS);
        assert!(update.change_registrant.is_none());
        assert!(update.remove_contacts.is_empty());
        assert_eq!(update.add_nameservers, vec!["ns2.example.com"]);

        let update = domain_update(&info, &domain, DiffScope::ALL);
        assert_eq!(update.change_registrant.as_deref(), Some("r2"));
        assert_eq!(update.remove_contacts, vec![ContactRef::new(ContactRole::Admin, "a1")]);
    }
}
