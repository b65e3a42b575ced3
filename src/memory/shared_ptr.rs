use allocator_api2::{
    alloc::{ Allocator, Global },
    boxed::Box as AllocBox
};
use crate::memory::{
    error::BadWeakPtr,
    ref_count::{ RefCountBase, RefCountObject, RefCountPtr },
    weak_ptr::WeakPtr
};
use std::{
    convert::Infallible,
    fmt::{ Debug, Display, Pointer },
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr::NonNull
};

// std::shared_ptr
/// Reference counting smart pointer with a separate control block.
///
/// The handle stores the address it observes (`_ptr`) and the block that governs the object's
/// lifetime (`_rep`). These normally point at the same object, but an aliasing handle (see
/// [`project`](SharedPtr::project)) can observe a field or a trait object view while keeping
/// the whole original object alive.
pub struct SharedPtr<T>
where T: ?Sized
{
    pub(crate) _ptr: Option<NonNull<T>>,
    pub(crate) _rep: Option<NonNull<RefCountBase>>,
    _data: PhantomData<T>
}

impl<T> SharedPtr<T> {
    /// Construct an object of type T and wrap it in a SharedPtr, allocating the control block and
    /// the object together (`std::make_shared`).
    pub fn make_shared(data: T) -> Self { Self::make_shared_in(data, Global) }

    pub fn make_shared_in<A>(data: T, alloc: A) -> Self
    where A: Allocator + Clone + 'static
    {
        match Self::try_make_shared_with_in(|| Ok::<T, Infallible>(data), alloc) {
            Ok(v) => v,
            Err(e) => match e {}
        }
    }

    /// Like [`make_shared`](Self::make_shared), but the object is built by `f` after the block
    /// has been allocated.
    pub fn make_shared_with<F>(f: F) -> Self
    where F: FnOnce() -> T
    {
        match Self::try_make_shared_with(|| Ok::<T, Infallible>(f())) {
            Ok(v) => v,
            Err(e) => match e {}
        }
    }

    pub fn try_make_shared_with<E, F>(f: F) -> Result<Self, E>
    where F: FnOnce() -> Result<T, E>
    {
        Self::try_make_shared_with_in(f, Global)
    }

    /// Allocate one block holding both the counts and storage for T, then construct T inside it
    /// with `f`. If `f` returns an error (or panics) the block is freed and the error is
    /// returned unchanged.
    pub fn try_make_shared_with_in<E, F, A>(f: F, alloc: A) -> Result<Self, E>
    where F: FnOnce() -> Result<T, E>,
          A: Allocator + Clone + 'static
    {
        let (rep, obj) = RefCountObject::try_new_in(f, alloc)?;
        Ok(unsafe { Self::from_parts(Some(obj), Some(rep)) })
    }
}

impl<T> SharedPtr<T>
where T: ?Sized
{
    pub const fn null() -> Self {
        Self { _ptr: None, _rep: None, _data: PhantomData }
    }

    /// # Safety
    /// The caller hands over one strong reference on `rep`, and `ptr` must stay valid for as
    /// long as the object governed by `rep` is alive.
    pub(crate) unsafe fn from_parts(ptr: Option<NonNull<T>>, rep: Option<NonNull<RefCountBase>>) -> Self {
        Self { _ptr: ptr, _rep: rep, _data: PhantomData }
    }

    /// Take ownership of an object that already lives on the heap. The control block is a
    /// separate allocation.
    pub fn from_box(value: Box<T>) -> Self {
        let raw = Box::into_raw(value);
        Self::from_box_in(unsafe { AllocBox::from_raw_in(raw, Global) })
    }

    pub fn from_box_in<A>(value: AllocBox<T, A>) -> Self
    where A: Allocator + Clone + 'static
    {
        let (rep, obj) = RefCountPtr::new_in(value);
        unsafe { Self::from_parts(Some(obj), Some(rep)) }
    }

    /// Take ownership of a `Y` but observe it as a `T`. The block still destroys the object as a
    /// `Y`, so `T` can be a trait object or any other view of it. `Y` disappears from the
    /// handle's type, so it may not hold borrows.
    pub fn from_box_as<Y, F>(value: Box<Y>, upcast: F) -> Self
    where Y: ?Sized + 'static,
          F: for<'a> FnOnce(&'a Y) -> &'a T
    {
        SharedPtr::from_box(value).map(upcast)
    }

    /// Share ownership with `other` while observing `ptr`, which may be null. The object owned
    /// by `other` keeps governing when destruction happens.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as the object owned by `other` is alive. `Y` is not part
    /// of the returned handle's type, so every borrow held by the object owned by `other` must
    /// outlive the returned handle and all of its copies.
    pub unsafe fn aliasing<Y>(other: &SharedPtr<Y>, ptr: *const T) -> Self
    where Y: ?Sized
    {
        if let Some(rep) = other._rep {
            unsafe { rep.as_ref() }.increment_shared();
        }
        unsafe { Self::from_parts(NonNull::new(ptr as *mut T), other._rep) }
    }

    /// Promote a weak pointer, failing with [`BadWeakPtr`] if the object is already gone.
    /// [`WeakPtr::lock`] is the variant that returns an empty pointer instead.
    pub fn from_weak(weak: &WeakPtr<T>) -> Result<Self, BadWeakPtr> {
        if weak.expired() {
            return Err(BadWeakPtr);
        }
        if let Some(rep) = weak._rep {
            unsafe { rep.as_ref() }.increment_shared();
        }
        Ok(unsafe { Self::from_parts(weak._ptr, weak._rep) })
    }

    /// Convert into a pointer that observes `f`'s view of the object, sharing the same block.
    ///
    /// The owned object is still dropped through the block once the last handle goes, but its
    /// type is gone from `SharedPtr<U>`. Only objects without borrows can be mapped:
    ///
    /// ```compile_fail
    /// # use cpp_memory::memory::shared_ptr::SharedPtr;
    /// struct Borrower<'a>(&'a String, u32);
    /// let view: SharedPtr<u32>;
    /// {
    ///     let name = String::from("guard");
    ///     let owner = SharedPtr::make_shared(Borrower(&name, 5));
    ///     // Error: `name` does not live long enough
    ///     view = owner.map(|b| &b.1);
    /// }
    /// drop(view);
    /// ```
    pub fn map<U, F>(self, f: F) -> SharedPtr<U>
    where T: 'static,
          U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        let ptr = self._ptr.map(|p| NonNull::from(f(unsafe { p.as_ref() })));
        let this = ManuallyDrop::new(self);
        unsafe { SharedPtr::from_parts(ptr, this._rep) }
    }

    /// Aliasing copy: a new strong reference to the same block that observes `f`'s view.
    /// Same restriction as [`map`](Self::map):
    ///
    /// ```compile_fail
    /// # use cpp_memory::memory::shared_ptr::SharedPtr;
    /// let count = 3u32;
    /// let owner = SharedPtr::make_shared((&count, 1u8));
    /// // Error: borrowed value does not live long enough
    /// let field: SharedPtr<u8> = owner.project(|pair| &pair.1);
    /// ```
    pub fn project<U, F>(&self, f: F) -> SharedPtr<U>
    where T: 'static,
          U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        self.clone().map(f)
    }

    pub fn reset(&mut self) {
        self._ptr = None;
        if let Some(rep) = self._rep.take() {
            unsafe { RefCountBase::release_shared(rep) }
        }
    }

    /// Release the current object and take sole ownership of `value`.
    pub fn reset_with(&mut self, value: Box<T>) {
        self.reset();
        *self = Self::from_box(value);
    }

    pub fn reset_with_in<A>(&mut self, value: AllocBox<T, A>)
    where A: Allocator + Clone + 'static
    {
        self.reset();
        *self = Self::from_box_in(value);
    }

    pub fn swap(&mut self, other: &mut Self) {
        std::mem::swap(&mut self._ptr, &mut other._ptr);
        std::mem::swap(&mut self._rep, &mut other._rep);
    }

    pub fn get(&self) -> Option<&T> { self._ptr.map(|p| unsafe { &*p.as_ptr() }) }
    pub fn as_ptr(&self) -> Option<NonNull<T>> { self._ptr }

    pub fn use_count(&self) -> usize {
        self._rep.map_or(0, |rep| unsafe { rep.as_ref() }.shared_count())
    }
    pub fn weak_count(&self) -> usize {
        self._rep.map_or(0, |rep| unsafe { rep.as_ref() }.weak_count())
    }
    pub fn unique(&self) -> bool { self.use_count() == 1 }

    /// True if no control block is held. A pointer made by [`aliasing`](Self::aliasing) with a
    /// null address still holds a block and is not empty.
    pub fn is_empty(&self) -> bool { self._rep.is_none() }

    /// Whether both pointers observe the same address.
    pub fn ptr_eq<U>(&self, other: &SharedPtr<U>) -> bool
    where U: ?Sized
    {
        self._ptr.map(|p| p.cast::<u8>()) == other._ptr.map(|p| p.cast::<u8>())
    }

    /// Whether both pointers share one control block.
    pub fn owner_eq<U>(&self, other: &SharedPtr<U>) -> bool
    where U: ?Sized
    {
        self._rep == other._rep
    }

    pub fn downgrade(&self) -> WeakPtr<T> { WeakPtr::from(self) }
}

impl<T> Clone for SharedPtr<T>
where T: ?Sized
{
    fn clone(&self) -> Self {
        if let Some(rep) = self._rep {
            unsafe { rep.as_ref() }.increment_shared();
        }
        unsafe { Self::from_parts(self._ptr, self._rep) }
    }
}

impl<T> Drop for SharedPtr<T>
where T: ?Sized
{
    fn drop(&mut self) { self.reset() }
}

impl<T> Default for SharedPtr<T>
where T: ?Sized
{
    fn default() -> Self { Self::null() }
}

impl<T> Deref for SharedPtr<T>
where T: ?Sized
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("Tried to dereference a null SharedPtr")
        }
    }
}

impl<T, U> PartialEq<SharedPtr<U>> for SharedPtr<T>
where T: ?Sized,
      U: ?Sized
{
    fn eq(&self, other: &SharedPtr<U>) -> bool { self.ptr_eq(other) }
}

impl<T> Debug for SharedPtr<T>
where T: ?Sized + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedPtr {{ data: {:?}, strong: {}, weak: {} }}",
            self.get(), self.use_count(), self.weak_count())
    }
}

impl<T> Display for SharedPtr<T>
where T: ?Sized + Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "nullptr")
        }
    }
}

impl<T> Pointer for SharedPtr<T>
where T: ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self._ptr {
            Some(p) => Pointer::fmt(&p, f),
            None => Pointer::fmt(&std::ptr::null::<u8>(), f)
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::SharedPtr;
    use crate::memory::{
        error::BadWeakPtr,
        test_utils::{ CountingAllocator, DropCounter, Tracked }
    };
    use allocator_api2::boxed::Box as AllocBox;
    use std::{
        cell::Cell,
        error::Error,
        fmt::Display
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    fn check_strong_count(get: usize, expect: usize) {
        assert!(get == expect, "Strong count should be {} instead of {}", expect, get);
    }
    fn check_weak_count(get: usize, expect: usize) {
        assert!(get == expect, "Weak count should be {} instead of {}", expect, get);
    }

    trait Named {
        fn name(&self) -> String;
    }

    impl<T> Named for Tracked<T>
    where T: Display
    {
        fn name(&self) -> String { format!("tracked {}", self.value) }
    }

    struct Pair {
        left: u32,
        right: String
    }

    #[test]
    fn copy_and_reset_scenario() -> TestReturn {
        let counter = DropCounter::new();
        let mut sp1 = SharedPtr::make_shared(counter.track(String::from("Player")));
        let mut sp2 = sp1.clone();
        check_strong_count(sp1.use_count(), 2);
        check_strong_count(sp2.use_count(), 2);
        assert!(sp1 == sp2, "Copies should observe the same object");
        sp1.reset();
        check_strong_count(sp1.use_count(), 0);
        check_strong_count(sp2.use_count(), 1);
        assert!(sp1.is_empty(), "Reset pointer should be empty");
        assert!(counter.drops() == 0, "Object should still be alive");
        assert!(sp2.value == "Player", "Value should be \"Player\" instead of {}", sp2.value);
        sp2.reset();
        assert!(counter.drops() == 1, "Object should be destroyed after the last reset");
        Ok(())
    }

    #[test]
    fn use_count_tracks_live_copies() -> TestReturn {
        let counter = DropCounter::new();
        let first = SharedPtr::make_shared(counter.track(1));
        let mut copies = vec![];
        for i in 0..5 {
            copies.push(first.clone());
            check_strong_count(first.use_count(), i + 2);
        }
        let moved = copies.pop();
        check_strong_count(first.use_count(), 6);
        drop(moved);
        check_strong_count(first.use_count(), 5);
        let mut taken = std::mem::take(&mut copies[0]);
        assert!(copies[0].is_empty(), "Moved-from pointer should be empty");
        check_strong_count(taken.use_count(), 5);
        let mut other = SharedPtr::null();
        taken.swap(&mut other);
        assert!(taken.is_empty() && !other.is_empty(), "Swap should exchange ownership");
        check_strong_count(other.use_count(), 5);
        drop(copies);
        drop(other);
        check_strong_count(first.use_count(), 1);
        drop(first);
        assert!(counter.drops() == 1, "Object should be destroyed exactly once");
        Ok(())
    }

    #[test]
    fn make_shared_allocates_once() -> TestReturn {
        let alloc = CountingAllocator::new();
        {
            let sp = SharedPtr::make_shared_in([7u64; 4], alloc.clone());
            let _copy = sp.clone();
            assert!(alloc.allocations() == 1, "make_shared should perform exactly one allocation instead of {}",
                alloc.allocations());
            assert!(sp[3] == 7, "Constructed value should be readable");
        }
        assert!(alloc.live() == 0, "Block should be freed after the last owner drops");
        Ok(())
    }

    #[test]
    fn from_box_uses_detached_block() -> TestReturn {
        let alloc = CountingAllocator::new();
        let counter = DropCounter::new();
        {
            let sp = SharedPtr::from_box_in(AllocBox::new_in(counter.track(3), alloc.clone()));
            assert!(alloc.allocations() == 2, "Object and block should be separate allocations");
            let weak = sp.downgrade();
            drop(sp);
            assert!(counter.drops() == 1, "Object should die with its last strong reference");
            assert!(alloc.live() == 1, "Block should survive while a weak reference remains");
            drop(weak);
        }
        assert!(alloc.live() == 0, "Block should be freed with the last weak reference");
        Ok(())
    }

    #[test]
    fn failed_construction_propagates() -> TestReturn {
        let alloc = CountingAllocator::new();
        let result = SharedPtr::<String>::try_make_shared_with_in(|| Err("constructor failed"), alloc.clone());
        assert!(matches!(result, Err("constructor failed")), "Constructor error should be returned unchanged");
        assert!(alloc.allocations() == 1 && alloc.live() == 0, "Block should be freed after a failed construction");
        let built = SharedPtr::<String>::try_make_shared_with(|| Ok::<_, ()>(String::from("ok")));
        assert!(built.map(|s| *s == "ok").unwrap_or(false), "Successful construction should yield the value");
        Ok(())
    }

    #[test]
    fn derived_observed_as_base() -> TestReturn {
        let counter = DropCounter::new();
        let named: SharedPtr<dyn Named> = SharedPtr::from_box_as(Box::new(counter.track(5)), |t| t as &dyn Named);
        assert!(named.name() == "tracked 5", "Trait object view should dispatch to the concrete type");
        let copy = named.clone();
        drop(named);
        assert!(counter.drops() == 0, "Object should be alive while a copy exists");
        drop(copy);
        assert!(counter.drops() == 1, "Concrete object should be destroyed through the block");

        let sp = SharedPtr::make_shared(counter.track(6));
        let as_dyn: SharedPtr<dyn Named> = sp.clone().map(|t| t as &dyn Named);
        check_strong_count(sp.use_count(), 2);
        assert!(as_dyn.owner_eq(&sp), "Converted pointer should share the block");
        Ok(())
    }

    #[test]
    fn aliasing_keeps_owner_alive() -> TestReturn {
        let drops = DropCounter::new();
        let owner = SharedPtr::make_shared(drops.track(Pair { left: 4, right: String::from("right") }));
        let right: SharedPtr<String> = owner.project(|p| &p.value.right);
        let left: SharedPtr<u32> = unsafe { SharedPtr::aliasing(&owner, &owner.value.left) };
        check_strong_count(owner.use_count(), 3);
        drop(owner);
        assert!(drops.drops() == 0, "Aliased views should keep the whole object alive");
        assert!(*right == "right" && *left == 4, "Aliased views should observe the fields");
        drop(right);
        drop(left);
        assert!(drops.drops() == 1, "Object should be destroyed after the last view drops");
        Ok(())
    }

    #[test]
    fn aliasing_null_still_owns() -> TestReturn {
        let owner = SharedPtr::make_shared(10);
        let view: SharedPtr<u8> = unsafe { SharedPtr::aliasing(&owner, std::ptr::null()) };
        assert!(!view.is_empty(), "Aliased null pointer should still hold a block");
        assert!(view.get().is_none(), "Aliased null pointer should observe nothing");
        check_strong_count(view.use_count(), 2);
        Ok(())
    }

    #[test]
    fn promotion_from_weak() -> TestReturn {
        let sp = SharedPtr::make_shared(Cell::new(1));
        let weak = sp.downgrade();
        let promoted = SharedPtr::from_weak(&weak)?;
        promoted.set(2);
        assert!(sp.get().map(Cell::get) == Some(2), "Promoted pointer should share the object");
        check_strong_count(sp.use_count(), 2);
        check_weak_count(sp.weak_count(), 1);
        drop(sp);
        drop(promoted);
        assert!(matches!(SharedPtr::from_weak(&weak), Err(BadWeakPtr)), "Promoting an expired pointer should fail");
        Ok(())
    }

    #[test]
    fn reset_with_new_object() -> TestReturn {
        let counter = DropCounter::new();
        let mut sp = SharedPtr::make_shared(counter.track(1));
        let keep = sp.clone();
        sp.reset_with(Box::new(counter.track(2)));
        assert!(counter.drops() == 0, "Old object should live on through the other owner");
        check_strong_count(sp.use_count(), 1);
        check_strong_count(keep.use_count(), 1);
        assert!(sp.value == 2 && keep.value == 1, "Each pointer should observe its own object");
        drop(keep);
        assert!(counter.drops() == 1, "Old object should be destroyed by its last owner");
        let alloc = CountingAllocator::new();
        sp.reset_with_in(AllocBox::new_in(counter.track(3), alloc.clone()));
        assert!(counter.drops() == 2, "Replaced object should be destroyed");
        drop(sp);
        assert!(alloc.live() == 0, "Allocator-backed object and block should be freed");
        Ok(())
    }

    #[test]
    fn null_pointer_observers() -> TestReturn {
        let sp: SharedPtr<i32> = SharedPtr::default();
        assert!(sp.is_empty(), "Default pointer should be empty");
        check_strong_count(sp.use_count(), 0);
        assert!(sp.get().is_none(), "Default pointer should observe nothing");
        assert!(format!("{}", sp) == "nullptr", "Null pointer should display as nullptr");
        let weak = sp.downgrade();
        assert!(weak.expired(), "Weak pointer from a null pointer should be expired");
        Ok(())
    }

    #[test]
    fn make_shared_with_constructs_in_place() -> TestReturn {
        let sp = SharedPtr::make_shared_with(|| vec![1, 2, 3]);
        assert!(sp.len() == 3, "Vector should have 3 elements instead of {}", sp.len());
        println!("{:?}", sp);
        Ok(())
    }
}
