//! Pluggable hashing and equality for map keys.
//!
//! A map is given exactly one [`HashingStrategy`] when it is constructed, and every key handle it
//! creates computes its hash through that strategy exactly once. The strategy must therefore be
//! consistent (`equals(a, b)` implies `hash(a) == hash(b)`) and free of side effects. A strategy
//! that violates this is a programming error which is not detected; lookups will silently miss.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// A hash/equality pair used to index keys.
pub trait HashingStrategy<T: ?Sized> {
    /// Returns the hash of `value`.
    fn hash(&self, value: &T) -> u64;

    /// Returns `true` if `a` and `b` should be considered the same key.
    fn equals(&self, a: &T, b: &T) -> bool;
}

/// The canonical strategy: the key's own [`Hash`] and [`Eq`] implementations, hashed through a
/// [`BuildHasher`].
#[derive(Clone, Debug, Default)]
pub struct Canonical<S = crate::DefaultHashBuilder> {
    build_hasher: S,
}

impl<S> Canonical<S> {
    /// Creates a canonical strategy that hashes keys with `build_hasher`.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }
}

impl<T, S> HashingStrategy<T> for Canonical<S>
where
    T: ?Sized + Hash + Eq,
    S: BuildHasher,
{
    fn hash(&self, value: &T) -> u64 {
        self.build_hasher.hash_one(value)
    }

    fn equals(&self, a: &T, b: &T) -> bool {
        a == b
    }
}

/// Address identity.
///
/// Two keys are equal only if they are the same object. This is only meaningful for maps whose
/// keys are held by reference (weak or soft keys), since only there the referent has a stable
/// address for as long as it is alive.
#[derive(Copy, Clone, Debug, Default)]
pub struct Identity;

impl<T: ?Sized> HashingStrategy<T> for Identity {
    fn hash(&self, value: &T) -> u64 {
        spread((value as *const T).cast::<()>() as usize as u64)
    }

    fn equals(&self, a: &T, b: &T) -> bool {
        std::ptr::addr_eq(a as *const T, b as *const T)
    }
}

/// ASCII-case-insensitive string keys.
#[derive(Clone, Debug, Default)]
pub struct CaseInsensitive {
    build_hasher: crate::DefaultHashBuilder,
}

impl HashingStrategy<str> for CaseInsensitive {
    fn hash(&self, value: &str) -> u64 {
        let mut h = self.build_hasher.build_hasher();
        for b in value.bytes() {
            h.write_u8(b.to_ascii_lowercase());
        }
        // mirror str's own Hash impl so that "ab" + "c" and "a" + "bc" differ as prefixes
        h.write_u8(0xff);
        h.finish()
    }

    fn equals(&self, a: &str, b: &str) -> bool {
        a.eq_ignore_ascii_case(b)
    }
}

impl HashingStrategy<String> for CaseInsensitive {
    fn hash(&self, value: &String) -> u64 {
        HashingStrategy::<str>::hash(self, value.as_str())
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        HashingStrategy::<str>::equals(self, a.as_str(), b.as_str())
    }
}

/// A strategy assembled from a caller-supplied hash function and equality function.
#[derive(Clone)]
pub struct FnStrategy<H, E> {
    hash: H,
    equals: E,
}

impl<H, E> FnStrategy<H, E> {
    /// Creates a strategy from `hash` and `equals`.
    ///
    /// The two functions must agree: keys for which `equals` returns `true` must hash the same.
    pub fn new(hash: H, equals: E) -> Self {
        Self { hash, equals }
    }
}

impl<H, E> fmt::Debug for FnStrategy<H, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStrategy").finish_non_exhaustive()
    }
}

impl<T, H, E> HashingStrategy<T> for FnStrategy<H, E>
where
    T: ?Sized,
    H: Fn(&T) -> u64,
    E: Fn(&T, &T) -> bool,
{
    fn hash(&self, value: &T) -> u64 {
        (self.hash)(value)
    }

    fn equals(&self, a: &T, b: &T) -> bool {
        (self.equals)(a, b)
    }
}

/// Spreads the entropy of `h` into its low bits, which are the ones used to pick a bin.
#[inline]
pub(crate) fn spread(h: u64) -> u64 {
    let h = h ^ (h >> 33);
    let h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^ (h >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_is_consistent() {
        let s = Canonical::<crate::DefaultHashBuilder>::default();
        assert!(s.equals("a", "a"));
        assert!(!s.equals("a", "b"));
        assert_eq!(
            HashingStrategy::<str>::hash(&s, "hello"),
            HashingStrategy::<str>::hash(&s, "hello")
        );
    }

    #[test]
    fn identity_distinguishes_equal_values() {
        let a = String::from("x");
        let b = String::from("x");
        assert!(Identity.equals(&a, &a));
        assert!(!Identity.equals(&a, &b));
        assert_eq!(Identity.hash(&a), Identity.hash(&a));
    }

    #[test]
    fn case_insensitive() {
        let s = CaseInsensitive::default();
        assert!(HashingStrategy::<str>::equals(&s, "Hello", "hELLO"));
        assert_eq!(
            HashingStrategy::<str>::hash(&s, "Hello"),
            HashingStrategy::<str>::hash(&s, "hELLO")
        );
        assert!(!HashingStrategy::<str>::equals(&s, "Hello", "Help"));
    }

    #[test]
    fn fn_strategy() {
        let s = FnStrategy::new(|x: &i32| (*x % 10) as u64, |a: &i32, b: &i32| a % 10 == b % 10);
        assert!(s.equals(&3, &13));
        assert_eq!(s.hash(&3), s.hash(&13));
    }
}
