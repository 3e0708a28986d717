//! Index definitions and key encodings.
//!
//! An index maps an object to a [`KeySet`] of byte keys. Keys compare
//! byte-lexicographically, so every encoder here is order-preserving:
//! iterating an index visits values in their natural order.

use std::fmt;
use std::marker::PhantomData;

use crate::Revision;

/// Name of the built-in index that orders rows by the revision that last
/// changed them. Query it with [`Query::revision`].
pub const REVISION_INDEX: &str = "__revision__";

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// An encoded, ordered index key.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(Vec<u8>);

impl Key {
    /// Create a key from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The empty key. Sorts before every other key.
    pub const fn empty() -> Self {
        Self(Vec::new())
    }

    /// Get the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the encoding in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if this key begins with `prefix`.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Append another key, producing a composite key ordered by `self` first.
    #[must_use]
    pub fn concat(mut self, other: &Self) -> Self {
        self.0.extend_from_slice(&other.0);
        self
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        self.0.iter().try_for_each(|b| write!(f, "{b:02x}"))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

/// The keys one object occupies in an index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet(Vec<Key>);

impl KeySet {
    /// Create a key set from several keys.
    pub fn new(keys: impl IntoIterator<Item = Key>) -> Self {
        Self(keys.into_iter().collect())
    }

    /// Create a key set holding a single key.
    pub fn single(key: Key) -> Self {
        Self(vec![key])
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.0.contains(key)
    }

    /// Iterate the keys.
    pub fn iter(&self) -> std::slice::Iter<'_, Key> {
        self.0.iter()
    }
}

impl From<Key> for KeySet {
    fn from(key: Key) -> Self {
        Self::single(key)
    }
}

impl FromIterator<Key> for KeySet {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl IntoIterator for KeySet {
    type Item = Key;
    type IntoIter = std::vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Encode a `u16` as 2 big-endian bytes.
pub fn uint16(value: u16) -> Key {
    Key(value.to_be_bytes().to_vec())
}

/// Encode a `u32` as 4 big-endian bytes.
pub fn uint32(value: u32) -> Key {
    Key(value.to_be_bytes().to_vec())
}

/// Encode a `u64` as 8 big-endian bytes.
pub fn uint64(value: u64) -> Key {
    Key(value.to_be_bytes().to_vec())
}

/// Encode an `i64` so that negative values sort before positive ones.
pub fn int64(value: i64) -> Key {
    let flipped = u64::from_be_bytes(value.to_be_bytes()) ^ SIGN_BIT;
    Key(flipped.to_be_bytes().to_vec())
}

/// Encode a string as its UTF-8 bytes.
pub fn string(value: &str) -> Key {
    Key(value.as_bytes().to_vec())
}

/// Encode raw bytes as-is.
pub fn bytes(value: &[u8]) -> Key {
    Key(value.to_vec())
}

/// Encode a bool as one byte, `false` before `true`.
pub fn boolean(value: bool) -> Key {
    Key(vec![u8::from(value)])
}

/// A typed index declaration.
///
/// `O` is the object type, `Q` the query key type. `from_object` extracts the
/// keys an object occupies; `from_key` encodes a query key the same way.
pub struct Index<O, Q: ?Sized> {
    /// Index name, unique within a table.
    pub name: &'static str,
    /// Keys of an object in this index.
    pub from_object: fn(&O) -> KeySet,
    /// Encoding of a query key.
    pub from_key: fn(&Q) -> Key,
    /// At most one object per key.
    ///
    /// When two objects claim the same key the later write wins. The loser
    /// keeps its row but not the key, and rewrites of the loser that keep the
    /// key do not take it back.
    pub unique: bool,
}

impl<O, Q: ?Sized> Index<O, Q> {
    /// Build a query for `key` against this index.
    pub fn query(&self, key: &Q) -> Query<O> {
        Query::new(self.name, (self.from_key)(key))
    }

    /// The untyped form stored by tables.
    pub const fn indexer(&self) -> Indexer<O> {
        Indexer {
            name: self.name,
            from_object: self.from_object,
            unique: self.unique,
        }
    }
}

impl<O, Q: ?Sized> Clone for Index<O, Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O, Q: ?Sized> Copy for Index<O, Q> {}

impl<O, Q: ?Sized> fmt::Debug for Index<O, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}

/// Index declaration with the query key type erased.
pub struct Indexer<O> {
    pub(crate) name: &'static str,
    pub(crate) from_object: fn(&O) -> KeySet,
    pub(crate) unique: bool,
}

impl<O> Indexer<O> {
    /// Index name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the index is unique.
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    pub(crate) fn keys(&self, object: &O) -> KeySet {
        (self.from_object)(object)
    }
}

impl<O> Clone for Indexer<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for Indexer<O> {}

impl<O> fmt::Debug for Indexer<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indexer")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .finish_non_exhaustive()
    }
}

impl<O, Q: ?Sized> From<Index<O, Q>> for Indexer<O> {
    fn from(index: Index<O, Q>) -> Self {
        index.indexer()
    }
}

/// An encoded lookup against one index of a table holding `O`.
pub struct Query<O> {
    index: &'static str,
    key: Key,
    _object: PhantomData<fn(&O)>,
}

impl<O> Query<O> {
    /// Create a query from an index name and an already-encoded key.
    pub const fn new(index: &'static str, key: Key) -> Self {
        Self {
            index,
            key,
            _object: PhantomData,
        }
    }

    /// Query the built-in revision index, starting at `revision`.
    ///
    /// Used with `lower_bound` to visit rows changed at or after `revision`.
    pub fn revision(revision: Revision) -> Self {
        Self::new(REVISION_INDEX, uint64(revision))
    }

    /// Index this query targets.
    pub const fn index(&self) -> &'static str {
        self.index
    }

    /// Encoded query key.
    pub const fn key(&self) -> &Key {
        &self.key
    }
}

impl<O> Clone for Query<O> {
    fn clone(&self) -> Self {
        Self::new(self.index, self.key.clone())
    }
}

impl<O> fmt::Debug for Query<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("index", &self.index)
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Host {
        id: u32,
        labels: Vec<&'static str>,
    }

    #[test]
    fn test_uint_encoding_is_big_endian() {
        assert_eq!(uint32(1).as_bytes(), &[0, 0, 0, 1]);
        assert_eq!(uint16(0x0102).as_bytes(), &[1, 2]);
        assert!(uint32(255) < uint32(256));
    }

    #[test]
    fn test_int64_orders_negative_first() {
        assert!(int64(-1) < int64(0));
        assert!(int64(i64::MIN) < int64(-1));
        assert!(int64(0) < int64(i64::MAX));
    }

    #[test]
    fn test_boolean_order() {
        assert!(boolean(false) < boolean(true));
    }

    #[test]
    fn test_key_prefix_and_concat() {
        let composite = string("eth").concat(&uint16(7));
        assert!(composite.starts_with(&string("eth")));
        assert!(!composite.starts_with(&string("lo")));
        assert_eq!(composite.len(), 5);
    }

    #[test]
    fn test_key_display_is_hex() {
        assert_eq!(bytes(&[0xab, 0x01]).to_string(), "0xab01");
    }

    #[test]
    fn test_index_query_uses_from_key() {
        let by_id = Index::<Host, u32> {
            name: "id",
            from_object: |h| KeySet::single(uint32(h.id)),
            from_key: |k| uint32(*k),
            unique: true,
        };
        let query = by_id.query(&7);
        assert_eq!(query.index(), "id");
        assert_eq!(query.key(), &uint32(7));
    }

    #[test]
    fn test_multi_key_index() {
        let by_label = Index::<Host, str> {
            name: "label",
            from_object: |h| h.labels.iter().map(|l| string(l)).collect(),
            from_key: string,
            unique: false,
        };
        let host = Host {
            id: 1,
            labels: vec!["web", "prod"],
        };
        let keys = by_label.indexer().keys(&host);
        assert_eq!(keys.len(), 2);
        assert_eq!(by_label.query("web").key(), &string("web"));
        assert_eq!(host.id, 1);
    }

    #[test]
    fn test_revision_query_targets_reserved_index() {
        let query = Query::<Host>::revision(42);
        assert_eq!(query.index(), REVISION_INDEX);
        assert_eq!(query.key(), &uint64(42));
    }
}
