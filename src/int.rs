//! Maps keyed by primitive integers.
//!
//! Integer keys are always held strongly and are hashed by [`IntHash`], which mixes the
//! integer's bits directly instead of going through a [`HashingStrategy`] chosen at
//! construction.

use crate::concurrent::ConcurrentRefHashMap;
use crate::error::Result;
use crate::local::RefHashMap;
use crate::policy::{Policy, Soft, Strong, Weak};
use crate::snapshot::Snapshot;
use crate::strategy::{spread, HashingStrategy};
use std::fmt;
use std::hash::Hash;

mod sealed {
    pub trait Sealed {}
}

/// A primitive integer usable as a key of [`IntRefHashMap`] and [`ConcurrentIntRefHashMap`].
pub trait IntKey:
    sealed::Sealed + Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
    /// The integer's bits, sign-extended for signed types.
    fn bits(self) -> u64;
}

macro_rules! int_key {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl IntKey for $t {
                #[inline]
                fn bits(self) -> u64 {
                    self as u64
                }
            }
        )*
    };
}

int_key!(i32, i64, u32, u64, isize, usize);

/// Exact hashing for integer keys: equality is `==`.
#[derive(Copy, Clone, Debug, Default)]
pub struct IntHash;

impl<I: IntKey> HashingStrategy<I> for IntHash {
    fn hash(&self, value: &I) -> u64 {
        spread(value.bits())
    }

    fn equals(&self, a: &I, b: &I) -> bool {
        a == b
    }
}

/// A single-threaded map from integers to values held according to `VP`.
pub struct IntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    inner: RefHashMap<I, V, Strong, VP, IntHash>,
}

impl<I, V, VP> IntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    pub fn new() -> Self {
        Self {
            inner: RefHashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RefHashMap::with_capacity(capacity),
        }
    }

    /// See [`RefHashMap::with_soft_capacity`].
    pub fn with_soft_capacity(self, capacity: usize) -> Self {
        Self {
            inner: self.inner.with_soft_capacity(capacity),
        }
    }

    pub fn get(&self, key: I) -> Option<VP::Owned> {
        self.inner.get(&key)
    }

    pub fn get_or_default(&self, key: I, default: VP::Owned) -> VP::Owned {
        self.inner.get_or_default(&key, default)
    }

    pub fn put(&mut self, key: I, value: VP::Owned) -> Option<VP::Owned> {
        self.inner.put(key, value)
    }

    pub fn put_all<It>(&mut self, entries: It)
    where
        It: IntoIterator<Item = (I, VP::Owned)>,
    {
        self.inner.put_all(entries)
    }

    pub fn remove(&mut self, key: I) -> Option<VP::Owned> {
        self.inner.remove(&key)
    }

    pub fn clear(&mut self) {
        self.inner.clear()
    }

    pub fn len(&mut self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.inner.is_empty()
    }

    /// See [`RefHashMap::contains_key`].
    pub fn contains_key(&self, key: I) -> Result<bool> {
        self.inner.contains_key(&key)
    }

    /// See [`RefHashMap::contains_value`].
    pub fn contains_value(&self, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.inner.contains_value(value)
    }

    pub fn keys(&self) -> Snapshot<I> {
        self.inner.keys()
    }

    pub fn values(&self) -> Snapshot<VP::Owned> {
        self.inner.values()
    }

    pub fn entries(&self) -> Snapshot<(I, VP::Owned)> {
        self.inner.entries()
    }

    pub fn drain_reclaimed(&mut self) -> usize {
        self.inner.drain_reclaimed()
    }

    pub fn release_soft(&self) -> usize {
        self.inner.release_soft()
    }
}

impl<I, V, VP> Default for IntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, V, VP> fmt::Debug for IntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
    VP::Owned: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

/// A concurrent map from integers to values held according to `VP`.
pub struct ConcurrentIntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    inner: ConcurrentRefHashMap<I, V, Strong, VP, IntHash>,
}

impl<I, V, VP> ConcurrentIntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    pub fn new() -> Self {
        Self {
            inner: ConcurrentRefHashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: ConcurrentRefHashMap::with_capacity(capacity),
        }
    }

    pub fn with_soft_capacity(self, capacity: usize) -> Self {
        Self {
            inner: self.inner.with_soft_capacity(capacity),
        }
    }

    pub fn get(&self, key: I) -> Option<VP::Owned> {
        self.inner.get(&key)
    }

    pub fn get_or_default(&self, key: I, default: VP::Owned) -> VP::Owned {
        self.inner.get_or_default(&key, default)
    }

    pub fn put(&self, key: I, value: VP::Owned) -> Option<VP::Owned> {
        self.inner.put(key, value)
    }

    /// See [`ConcurrentRefHashMap::put_if_absent`].
    pub fn put_if_absent(&self, key: I, value: VP::Owned) -> Option<VP::Owned> {
        self.inner.put_if_absent(key, value)
    }

    pub fn get_or_insert(&self, key: I, value: VP::Owned) -> VP::Owned {
        self.inner.get_or_insert(key, value)
    }

    /// Always fails, see [`ConcurrentRefHashMap::put_all`].
    pub fn put_all<It>(&self, entries: It) -> Result<()>
    where
        It: IntoIterator<Item = (I, VP::Owned)>,
    {
        self.inner.put_all(entries)
    }

    pub fn remove(&self, key: I) -> Option<VP::Owned> {
        self.inner.remove(&key)
    }

    pub fn remove_if(&self, key: I, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.inner.remove_if(&key, value)
    }

    pub fn replace_if(&self, key: I, old: &V, new: VP::Owned) -> bool
    where
        V: PartialEq,
    {
        self.inner.replace_if(&key, old, new)
    }

    pub fn replace(&self, key: I, value: VP::Owned) -> Option<VP::Owned> {
        self.inner.replace(&key, value)
    }

    pub fn clear(&self) {
        self.inner.clear()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains_key(&self, key: I) -> Result<bool> {
        self.inner.contains_key(&key)
    }

    pub fn contains_value(&self, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        self.inner.contains_value(value)
    }

    pub fn keys(&self) -> Snapshot<I> {
        self.inner.keys()
    }

    pub fn values(&self) -> Snapshot<VP::Owned> {
        self.inner.values()
    }

    pub fn entries(&self) -> Snapshot<(I, VP::Owned)> {
        self.inner.entries()
    }

    pub fn drain_reclaimed(&self) -> usize {
        self.inner.drain_reclaimed()
    }

    pub fn release_soft(&self) -> usize {
        self.inner.release_soft()
    }
}

impl<I, V, VP> Default for ConcurrentIntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<I, V, VP> fmt::Debug for ConcurrentIntRefHashMap<I, V, VP>
where
    I: IntKey,
    VP: Policy<V>,
    VP::Owned: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.inner, f)
    }
}

/// An integer-keyed map whose values are held weakly.
pub type IntWeakValueHashMap<V, I = i32> = IntRefHashMap<I, V, Weak>;
/// An integer-keyed map whose values are held softly.
pub type IntSoftValueHashMap<V, I = i32> = IntRefHashMap<I, V, Soft>;
/// A concurrent integer-keyed map whose values are held weakly.
pub type ConcurrentIntWeakValueHashMap<V, I = i32> = ConcurrentIntRefHashMap<I, V, Weak>;
/// A concurrent integer-keyed map whose values are held softly.
pub type ConcurrentIntSoftValueHashMap<V, I = i32> = ConcurrentIntRefHashMap<I, V, Soft>;
