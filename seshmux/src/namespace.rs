//! Identity-scoped wrapper over a page origin's key/value storage.
//!
//! Every key a page sees as `K` is physically stored as `__SID_<id>__K`.
//! Length, enumeration, and `clear` are honestly scoped: they report and
//! touch only the attached identity's keys. Before an identity is attached,
//! every operation fails loudly; there is no shared default scope.

use seshmux_core::IdentityId;

/// The ambient per-origin key/value store, as provided by the host.
///
/// `keys` returns physical keys in the store's enumeration order; the
/// wrapper derives scoped length, index access, and clearing from it.
pub trait OriginStorage {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&mut self, key: &str, value: &str);

    fn remove_item(&mut self, key: &str);

    fn keys(&self) -> Vec<String>;
}

/// The error type for namespaced storage operations.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("storage accessed before an identity was attached")]
    IdentityUnavailable,
}

const PREFIX_HEAD: &str = "__SID_";
const PREFIX_TAIL: &str = "__";

/// The physical-key prefix for an identity.
#[must_use]
pub fn key_prefix(identity: IdentityId) -> String {
    format!("{PREFIX_HEAD}{identity}{PREFIX_TAIL}")
}

/// A transparent, identity-scoped view over an [`OriginStorage`].
pub struct NamespacedStorage<S> {
    inner: S,
    prefix: Option<String>,
}

impl<S: OriginStorage> NamespacedStorage<S> {
    /// A view with no identity yet; every operation errors until
    /// [`attach`](NamespacedStorage::attach) is called.
    #[must_use]
    pub fn detached(inner: S) -> Self {
        NamespacedStorage {
            inner,
            prefix: None,
        }
    }

    #[must_use]
    pub fn attached(inner: S, identity: IdentityId) -> Self {
        NamespacedStorage {
            inner,
            prefix: Some(key_prefix(identity)),
        }
    }

    pub fn attach(&mut self, identity: IdentityId) {
        self.prefix = Some(key_prefix(identity));
    }

    fn prefix(&self) -> Result<&str, NamespaceError> {
        self.prefix
            .as_deref()
            .ok_or(NamespaceError::IdentityUnavailable)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, NamespaceError> {
        let prefix = self.prefix()?;
        Ok(self.inner.get_item(&format!("{prefix}{key}")))
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), NamespaceError> {
        let physical = format!("{}{key}", self.prefix()?);
        self.inner.set_item(&physical, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<(), NamespaceError> {
        let physical = format!("{}{key}", self.prefix()?);
        self.inner.remove_item(&physical);
        Ok(())
    }

    /// The scoped key names, prefixes stripped, in the store's enumeration
    /// order.
    pub fn keys(&self) -> Result<Vec<String>, NamespaceError> {
        let prefix = self.prefix()?;
        Ok(self
            .inner
            .keys()
            .into_iter()
            .filter_map(|key| key.strip_prefix(prefix).map(str::to_owned))
            .collect())
    }

    /// Number of keys belonging to the attached identity.
    pub fn len(&self) -> Result<usize, NamespaceError> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, NamespaceError> {
        Ok(self.keys()?.is_empty())
    }

    /// The scoped key at index `i`, mirroring the ambient store's
    /// key-at-index accessor.
    pub fn key_at(&self, i: usize) -> Result<Option<String>, NamespaceError> {
        Ok(self.keys()?.into_iter().nth(i))
    }

    /// Removes only the attached identity's keys; other identities' keys on
    /// the same origin are untouched.
    pub fn clear(&mut self) -> Result<(), NamespaceError> {
        let prefix = self.prefix()?.to_owned();
        let doomed: Vec<String> = self
            .inner
            .keys()
            .into_iter()
            .filter(|key| key.starts_with(&prefix))
            .collect();
        for key in doomed {
            self.inner.remove_item(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use seshmux_core::IdentityId;

    use super::*;

    #[derive(Default)]
    struct MapStorage(BTreeMap<String, String>);

    impl OriginStorage for MapStorage {
        fn get_item(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }

        fn set_item(&mut self, key: &str, value: &str) {
            self.0.insert(key.to_owned(), value.to_owned());
        }

        fn remove_item(&mut self, key: &str) {
            self.0.remove(key);
        }

        fn keys(&self) -> Vec<String> {
            self.0.keys().cloned().collect()
        }
    }

    fn id(seed: u16) -> IdentityId {
        IdentityId::from_parts(1_000, seed, 9)
    }

    #[test]
    fn reads_and_writes_are_prefixed() {
        let mut storage = NamespacedStorage::attached(MapStorage::default(), id(1));
        storage.set("theme", "dark").unwrap();
        assert_eq!(storage.get("theme").unwrap().as_deref(), Some("dark"));

        // The physical key carries the identity prefix.
        let physical = storage.inner.keys();
        assert_eq!(physical.len(), 1);
        assert!(physical[0].starts_with("__SID_"));
        assert!(physical[0].ends_with("__theme"));
    }

    #[test]
    fn identities_cannot_see_each_other() {
        let mut inner = MapStorage::default();
        inner.set_item(&format!("{}k", key_prefix(id(1))), "a-value");

        let storage_b = NamespacedStorage::attached(inner, id(2));
        assert_eq!(storage_b.get("k").unwrap(), None);
        assert_eq!(storage_b.len().unwrap(), 0);
    }

    #[test]
    fn enumeration_is_scoped_and_stripped() {
        let mut inner = MapStorage::default();
        inner.set_item(&format!("{}alpha", key_prefix(id(1))), "1");
        inner.set_item(&format!("{}beta", key_prefix(id(1))), "2");
        inner.set_item(&format!("{}other", key_prefix(id(2))), "3");
        inner.set_item("unprefixed", "4");

        let storage = NamespacedStorage::attached(inner, id(1));
        assert_eq!(storage.keys().unwrap(), vec!["alpha", "beta"]);
        assert_eq!(storage.len().unwrap(), 2);
        assert_eq!(storage.key_at(1).unwrap().as_deref(), Some("beta"));
        assert_eq!(storage.key_at(2).unwrap(), None);
    }

    #[test]
    fn clear_touches_only_own_keys() {
        let mut inner = MapStorage::default();
        inner.set_item(&format!("{}mine", key_prefix(id(1))), "1");
        inner.set_item(&format!("{}other", key_prefix(id(2))), "2");
        inner.set_item("unprefixed", "3");

        let mut storage = NamespacedStorage::attached(inner, id(1));
        storage.clear().unwrap();
        assert_eq!(storage.len().unwrap(), 0);
        assert_eq!(storage.inner.0.len(), 2);
    }

    #[test]
    fn detached_storage_fails_loudly() {
        let mut storage = NamespacedStorage::detached(MapStorage::default());
        assert_eq!(storage.get("k"), Err(NamespaceError::IdentityUnavailable));
        assert_eq!(
            storage.set("k", "v"),
            Err(NamespaceError::IdentityUnavailable)
        );
        assert_eq!(storage.keys(), Err(NamespaceError::IdentityUnavailable));
        assert_eq!(storage.clear(), Err(NamespaceError::IdentityUnavailable));

        storage.attach(id(1));
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    }
}
