use std::{
    fmt::Debug,
    mem::size_of
};

/// How a [`CompressedPair`] ends up storing its members.
///
/// Zero-sized members take no space in a Rust struct, so every layout is just two fields.
/// The classification is kept so callers (and tests) can check what a given pair costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairLayout {
    BothStateful,
    FirstStateless,
    SecondStateless,
    BothStateless
}

impl PairLayout {
    pub const fn of<F, S>() -> Self {
        match (size_of::<F>() == 0, size_of::<S>() == 0) {
            (false, false) => Self::BothStateful,
            (true, false) => Self::FirstStateless,
            (false, true) => Self::SecondStateless,
            (true, true) => Self::BothStateless
        }
    }
}

// libc++ __compressed_pair
/// Two-slot value holder where an empty policy object (a stateless deleter, an allocator
/// handle such as `Global`) adds nothing to the size of the pair.
#[derive(Default, Clone, PartialEq, Eq)]
pub struct CompressedPair<F, S> {
    first: F,
    second: S
}

impl<F, S> CompressedPair<F, S> {
    pub const LAYOUT: PairLayout = PairLayout::of::<F, S>();

    pub fn new(first: F, second: S) -> Self { Self { first, second } }

    pub fn first(&self) -> &F { &self.first }
    pub fn first_mut(&mut self) -> &mut F { &mut self.first }
    pub fn second(&self) -> &S { &self.second }
    pub fn second_mut(&mut self) -> &mut S { &mut self.second }

    /// Borrow both members at once.
    pub fn both_mut(&mut self) -> (&mut F, &mut S) { (&mut self.first, &mut self.second) }

    pub fn into_parts(self) -> (F, S) { (self.first, self.second) }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.first, &mut other.first);
        std::mem::swap(&mut self.second, &mut other.second);
    }

    pub fn layout(&self) -> PairLayout { Self::LAYOUT }
}

impl<F, S> Debug for CompressedPair<F, S>
where F: Debug,
      S: Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CompressedPair {{ first: {:?}, second: {:?}, layout: {:?} }}",
            self.first, self.second, Self::LAYOUT)
    }
}
