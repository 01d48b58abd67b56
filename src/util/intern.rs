use std::{collections::HashMap, fmt, num::NonZeroU32, rc::Rc};

/// A handle to an interned identifier. To retrieve the backing string, use
/// [`Interner::get`].
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    // Here we use a NonZeroU32 to leverage niche layout optimization.
    handle: NonZeroU32,
}

impl Symbol {
    pub(crate) const fn unchecked_new(handle: NonZeroU32) -> Symbol {
        Symbol { handle }
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.handle)
    }
}

impl From<&Symbol> for Symbol {
    fn from(value: &Symbol) -> Symbol {
        *value
    }
}

/// Deduplicating storage for identifier text. Equal strings intern to the
/// same [`Symbol`], so name equality is a handle comparison.
pub struct Interner {
    map: HashMap<Rc<str>, NonZeroU32>,
    vec: Vec<Rc<str>>,
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (i, interned) in self.vec.iter().enumerate() {
            let i = i + 1;
            map.entry(&i, &interned);
        }
        map.finish()
    }
}

impl Interner {
    pub fn with_capacity(capacity: usize) -> Interner {
        Interner {
            map: HashMap::with_capacity(capacity),
            vec: Vec::with_capacity(capacity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.vec.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.vec.clear();
    }

    /// Interns the provided string, returning a handle which can be used to
    /// retrieve it later.
    pub fn intern(&mut self, value: &str) -> Symbol {
        if let Some(handle) = self.map.get(value) {
            return Symbol::unchecked_new(*handle);
        }
        let key: Rc<str> = value.into();
        let i = {
            let len = u32::try_from(self.vec.len()).expect("interner out of capacity");
            // SAFETY: This will never be zero due to the +1.
            unsafe { NonZeroU32::new_unchecked(len + 1) }
        };
        self.vec.push(Rc::clone(&key));
        self.map.insert(key, i);
        Symbol::unchecked_new(i)
    }

    /// Returns the corresponding string for the provided [`Symbol`] handle.
    /// Panics if not found.
    pub fn get(&self, handle: impl Into<Symbol>) -> &str {
        let handle: Symbol = handle.into();
        let handle = handle.handle.get() - 1;
        &self.vec[handle as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interner_dedups_equal_strings() {
        let mut i = Interner::with_capacity(3);

        let hello1 = i.intern("hello");
        let world1 = i.intern("world");
        let bang1 = i.intern("!");

        let hello2 = i.intern("hello");
        let world2 = i.intern("world");
        let bang2 = i.intern("!");

        assert_eq!(i.get(hello1), i.get(hello2));
        assert_eq!(i.get(world1), i.get(world2));
        assert_eq!(i.get(bang1), i.get(bang2));

        assert_eq!(hello1, hello2);
        assert_eq!(world1, world2);
        assert_eq!(bang1, bang2);
        assert_ne!(hello1, world1);
    }
}
