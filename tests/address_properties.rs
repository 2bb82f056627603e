//! Property tests for path addressing.

use docwire::Address;
use proptest::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn component() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,12}"
}

fn components() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(component(), 1..8)
}

fn hash_of(address: &Address) -> u64 {
    let mut hasher = DefaultHasher::new();
    address.hash(&mut hasher);
    hasher.finish()
}

proptest! {
    #[test]
    fn parse_inverts_path(parts in components()) {
        let address = Address::from_components(parts.clone()).unwrap();
        prop_assert_eq!(Address::parse(&address.path()).unwrap(), address.clone());
        prop_assert_eq!(address.components(), parts.as_slice());
    }

    #[test]
    fn surrounding_slashes_are_ignored(parts in components()) {
        let path = parts.join("/");
        let plain = Address::parse(&path).unwrap();
        prop_assert_eq!(Address::parse(&format!("/{}", path)).unwrap(), plain.clone());
        prop_assert_eq!(Address::parse(&format!("{}/", path)).unwrap(), plain.clone());
        prop_assert_eq!(Address::parse(&format!("/{}/", path)).unwrap(), plain);
    }

    #[test]
    fn parent_undoes_join(parts in components(), last in component()) {
        let base = Address::from_components(parts).unwrap();
        let child = base.join(&last).unwrap();

        prop_assert_eq!(child.len(), base.len() + 1);
        prop_assert_eq!(child.last_component(), last.as_str());
        prop_assert_eq!(child.parent(), Some(base.clone()));
        prop_assert_ne!(child.is_document(), base.is_document());
    }

    #[test]
    fn identity_ignores_construction(parts in components()) {
        let parsed = Address::parse(&parts.join("/")).unwrap();

        let mut joined = Address::from_components([parts[0].clone()]).unwrap();
        for part in &parts[1..] {
            joined = joined.join(part).unwrap();
        }

        let child = if parts.len() > 1 {
            Address::from_components([parts[0].clone()])
                .unwrap()
                .child(&parts[1..].join("/"))
                .unwrap()
        } else {
            parsed.clone()
        };

        prop_assert_eq!(&parsed, &joined);
        prop_assert_eq!(&parsed, &child);
        prop_assert_eq!(hash_of(&parsed), hash_of(&joined));
        prop_assert_eq!(hash_of(&parsed), hash_of(&child));
    }

    #[test]
    fn parity_follows_length(parts in components()) {
        let address = Address::from_components(parts.clone()).unwrap();
        prop_assert_eq!(address.is_document(), parts.len() % 2 == 0);
        prop_assert_eq!(address.is_collection(), parts.len() % 2 == 1);
    }

    #[test]
    fn empty_interior_component_is_rejected(
        head in components(),
        tail in components(),
    ) {
        let path = format!("{}//{}", head.join("/"), tail.join("/"));
        prop_assert!(Address::parse(&path).is_err());
    }
}

#[test]
fn top_level_collection_has_no_parent() {
    let users = Address::parse("users").unwrap();
    assert!(users.is_collection());
    assert_eq!(users.parent(), None);
}
