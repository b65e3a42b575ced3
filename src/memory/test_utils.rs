use allocator_api2::alloc::{ AllocError, Allocator, Global };
use std::{
    alloc::Layout,
    cell::Cell,
    fmt::{ Debug, Display },
    ptr::NonNull,
    rc::Rc
};

/// Shared tally of how many [`Tracked`] values have been dropped.
#[derive(Debug, Clone, Default)]
pub(crate) struct DropCounter {
    drops: Rc<Cell<usize>>
}

impl DropCounter {
    pub(crate) fn new() -> Self { Self::default() }
    pub(crate) fn drops(&self) -> usize { self.drops.get() }
    pub(crate) fn track<T>(&self, value: T) -> Tracked<T> {
        Tracked { value, drops: self.drops.clone() }
    }
}

pub(crate) struct Tracked<T> {
    pub(crate) value: T,
    drops: Rc<Cell<usize>>
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

impl<T> Debug for Tracked<T>
where T: Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tracked({:?})", self.value)
    }
}

impl<T> Display for Tracked<T>
where T: Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// Global allocator wrapper that records every allocation and deallocation.
#[derive(Debug, Clone, Default)]
pub(crate) struct CountingAllocator {
    allocations: Rc<Cell<usize>>,
    deallocations: Rc<Cell<usize>>
}

impl CountingAllocator {
    pub(crate) fn new() -> Self { Self::default() }
    pub(crate) fn allocations(&self) -> usize { self.allocations.get() }
    pub(crate) fn deallocations(&self) -> usize { self.deallocations.get() }
    pub(crate) fn live(&self) -> usize { self.allocations() - self.deallocations() }
}

unsafe impl Allocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        self.allocations.set(self.allocations.get() + 1);
        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.deallocations.set(self.deallocations.get() + 1);
        unsafe { Global.deallocate(ptr, layout) }
    }
}
