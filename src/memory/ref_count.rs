//! Control blocks shared by [`SharedPtr`](super::shared_ptr::SharedPtr) and
//! [`WeakPtr`](super::weak_ptr::WeakPtr).
//!
//! Every block starts with a [`RefCountBase`] header holding the strong and weak counts and a
//! pointer to a static [`BlockVTable`] for the concrete block type. Handles only ever hold a
//! `NonNull<RefCountBase>`, so they stay generic over the pointee alone, whichever block
//! variant and allocator created the object.
//!
//! The object dies when the strong count reaches zero. The block dies when both counts are
//! zero, freed by whichever handle performs that last decrement.
use allocator_api2::{
    alloc::Allocator,
    boxed::Box as AllocBox
};
use std::{
    cell::{ Cell, UnsafeCell },
    marker::PhantomData,
    mem::{ ManuallyDrop, MaybeUninit },
    ptr::{ self, NonNull }
};

/// Dispatch table for a concrete [`ControlBlock`] type.
pub struct BlockVTable {
    delete_data: unsafe fn(NonNull<RefCountBase>),
    destroy: unsafe fn(NonNull<RefCountBase>)
}

struct VTableOf<B>(PhantomData<B>);

impl<B> VTableOf<B>
where B: ControlBlock
{
    const VTABLE: BlockVTable = BlockVTable {
        delete_data: delete_data_shim::<B>,
        destroy: destroy_shim::<B>
    };
}

unsafe fn delete_data_shim<B>(rep: NonNull<RefCountBase>)
where B: ControlBlock
{
    unsafe { rep.cast::<B>().as_ref().delete_data() }
}

unsafe fn destroy_shim<B>(rep: NonNull<RefCountBase>)
where B: ControlBlock
{
    unsafe { B::destroy(rep.cast::<B>()) }
}

/// A concrete control block layout.
///
/// # Safety
/// Implementors must be `#[repr(C)]` with a [`RefCountBase`] created by
/// [`RefCountBase::new::<Self>`] as their first field.
pub unsafe trait ControlBlock: Sized {
    /// Drop the managed object. Must be a no-op on every call after the first.
    ///
    /// # Safety
    /// The block must be live. Only called once the strong count is zero.
    unsafe fn delete_data(&self);

    /// Free the block's own allocation (dropping the object first if it is still alive).
    ///
    /// # Safety
    /// `this` must be the allocation the block was created in, with no live handles left.
    unsafe fn destroy(this: NonNull<Self>);
}

// std::_Ref_count_base
#[repr(C)]
pub struct RefCountBase {
    vtable: &'static BlockVTable,
    uses: Cell<usize>,
    weaks: Cell<usize>
}

impl RefCountBase {
    /// Header for a block of type `B`, starting with `uses` strong references and no weak ones.
    pub fn new<B>(uses: usize) -> Self
    where B: ControlBlock
    {
        Self {
            vtable: &VTableOf::<B>::VTABLE,
            uses: Cell::new(uses),
            weaks: Cell::new(0)
        }
    }

    pub fn increment_shared(&self) { self.uses.set(self.uses.get() + 1) }
    pub fn shared_count(&self) -> usize { self.uses.get() }
    pub fn increment_weak(&self) { self.weaks.set(self.weaks.get() + 1) }
    pub fn decrement_weak(&self) { self.weaks.set(self.weaks.get() - 1) }
    pub fn weak_count(&self) -> usize { self.weaks.get() }

    pub fn can_block_be_deleted(&self) -> bool {
        self.uses.get() == 0 && self.weaks.get() == 0
    }

    /// Drop one strong reference, destroying the object if it was the last. The block stays
    /// allocated even when both counts end up at zero; freeing it is up to the caller.
    ///
    /// # Safety
    /// `rep` must be live and the caller must own one strong reference.
    pub unsafe fn decrement_shared(rep: NonNull<Self>) {
        let base = unsafe { rep.as_ref() };
        let uses = base.uses.get() - 1;
        base.uses.set(uses);
        if uses == 0 {
            // Hold the block while the object's destructor runs: a weak handle dropped from
            // inside it must not be the one that frees the block.
            base.increment_weak();
            unsafe { Self::delete_data(rep) };
            base.decrement_weak();
        }
    }

    /// # Safety
    /// `rep` must be live.
    pub unsafe fn delete_data(rep: NonNull<Self>) {
        log::trace!("RefCountBase: deleting data of block {:p}", rep);
        let delete_data = unsafe { rep.as_ref() }.vtable.delete_data;
        unsafe { delete_data(rep) }
    }

    /// # Safety
    /// `rep` must be live and [`can_block_be_deleted`](Self::can_block_be_deleted) must hold.
    pub unsafe fn destroy(rep: NonNull<Self>) {
        log::trace!("RefCountBase: releasing block {:p}", rep);
        let destroy = unsafe { rep.as_ref() }.vtable.destroy;
        unsafe { destroy(rep) }
    }

    /// Drop a strong reference and free the block if nothing references it anymore.
    ///
    /// # Safety
    /// `rep` must be live and the caller must own one strong reference.
    pub unsafe fn release_shared(rep: NonNull<Self>) {
        unsafe {
            Self::decrement_shared(rep);
            if rep.as_ref().can_block_be_deleted() {
                Self::destroy(rep);
            }
        }
    }

    /// Drop a weak reference, freeing the block if nothing references it anymore and
    /// `owns_block` allows it.
    ///
    /// # Safety
    /// `rep` must be live and the caller must own one weak reference.
    pub unsafe fn release_weak(rep: NonNull<Self>, owns_block: bool) {
        unsafe {
            let base = rep.as_ref();
            base.decrement_weak();
            if base.can_block_be_deleted() && owns_block {
                Self::destroy(rep);
            }
        }
    }
}

/// Move `block` into an allocation from `alloc` and return a pointer to its header.
fn allocate_block<B, A>(block: B, alloc: A) -> NonNull<RefCountBase>
where B: ControlBlock,
      A: Allocator
{
    let raw = AllocBox::into_raw(AllocBox::new_in(block, alloc));
    log::trace!("RefCountBase: allocated block {:p}", raw);
    // into_raw never returns null
    unsafe { NonNull::new_unchecked(raw).cast() }
}

// std::_Ref_count
/// Block for an object that lives in its own, separate allocation.
#[repr(C)]
pub struct RefCountPtr<T, A>
where T: ?Sized,
      A: Allocator + Clone
{
    base: RefCountBase,
    _allocator: ManuallyDrop<A>,
    // nulled once the object is deleted
    ptr: Cell<Option<NonNull<T>>>
}

impl<T, A> RefCountPtr<T, A>
where T: ?Sized,
      A: Allocator + Clone
{
    /// Take ownership of `value` in a new block with one strong reference. Returns the block
    /// and the address of the object. The block is allocated with the same allocator as `value`.
    pub fn new_in(value: AllocBox<T, A>) -> (NonNull<RefCountBase>, NonNull<T>) {
        let (raw, alloc) = AllocBox::into_raw_with_allocator(value);
        // into_raw never returns null
        let obj = unsafe { NonNull::new_unchecked(raw) };
        let block = Self {
            base: RefCountBase::new::<Self>(1),
            _allocator: ManuallyDrop::new(alloc.clone()),
            ptr: Cell::new(Some(obj))
        };
        (allocate_block(block, alloc), obj)
    }
}

unsafe impl<T, A> ControlBlock for RefCountPtr<T, A>
where T: ?Sized,
      A: Allocator + Clone
{
    unsafe fn delete_data(&self) {
        if let Some(obj) = self.ptr.take() {
            drop(unsafe { AllocBox::from_raw_in(obj.as_ptr(), (*self._allocator).clone()) })
        }
    }

    unsafe fn destroy(this: NonNull<Self>) {
        unsafe {
            this.as_ref().delete_data();
            let alloc = ManuallyDrop::take(&mut (*this.as_ptr())._allocator);
            drop(AllocBox::from_raw_in(this.as_ptr(), alloc));
        }
    }
}

// std::_Ref_count_obj2
/// Block with inline storage for the object, created by `make_shared` in a single allocation.
#[repr(C)]
pub struct RefCountObject<T, A>
where A: Allocator + Clone
{
    base: RefCountBase,
    deleted: Cell<bool>,
    _allocator: ManuallyDrop<A>,
    storage: UnsafeCell<MaybeUninit<T>>
}

/// Frees a block whose object was never constructed, if construction unwinds.
struct ConstructGuard<T, A>
where A: Allocator + Clone
{
    rep: NonNull<RefCountBase>,
    _data: PhantomData<RefCountObject<T, A>>
}

impl<T, A> Drop for ConstructGuard<T, A>
where A: Allocator + Clone
{
    fn drop(&mut self) {
        log::trace!("RefCountObject: construction failed, releasing block {:p}", self.rep);
        unsafe { RefCountObject::<T, A>::destroy(self.rep.cast()) }
    }
}

impl<T, A> RefCountObject<T, A>
where A: Allocator + Clone
{
    /// Allocate a block, then construct the object in place with `f`. If `f` fails or panics the
    /// block is freed before the failure propagates.
    pub fn try_new_in<E, F>(f: F, alloc: A) -> Result<(NonNull<RefCountBase>, NonNull<T>), E>
    where F: FnOnce() -> Result<T, E>
    {
        let block = Self {
            base: RefCountBase::new::<Self>(1),
            // nothing to drop until the object exists
            deleted: Cell::new(true),
            _allocator: ManuallyDrop::new(alloc.clone()),
            storage: UnsafeCell::new(MaybeUninit::uninit())
        };
        let rep = allocate_block(block, alloc);
        let guard = ConstructGuard::<T, A> { rep, _data: PhantomData };
        let value = f()?;
        std::mem::forget(guard);
        unsafe {
            let this = rep.cast::<Self>().as_ref();
            let obj = (*this.storage.get()).write(value);
            this.deleted.set(false);
            Ok((rep, NonNull::from(obj)))
        }
    }
}

unsafe impl<T, A> ControlBlock for RefCountObject<T, A>
where A: Allocator + Clone
{
    unsafe fn delete_data(&self) {
        if !self.deleted.replace(true) {
            unsafe { ptr::drop_in_place((*self.storage.get()).as_mut_ptr()) }
        }
    }

    unsafe fn destroy(this: NonNull<Self>) {
        unsafe {
            let alloc = ManuallyDrop::take(&mut (*this.as_ptr())._allocator);
            drop(AllocBox::from_raw_in(this.as_ptr(), alloc));
        }
    }
}

impl<T, A> Drop for RefCountObject<T, A>
where A: Allocator + Clone
{
    fn drop(&mut self) {
        unsafe { self.delete_data() }
    }
}
