use allocator_api2::{
    alloc::Allocator,
    boxed::Box as AllocBox
};
use crate::memory::compressed_pair::CompressedPair;
use std::{
    fmt::{ Debug, Display },
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::{ Deref, DerefMut, Index, IndexMut },
    ptr::{ self, NonNull }
};

/// Destruction policy invoked by [`UniquePtr`] on the pointer it owns.
pub trait Deleter<T: ?Sized> {
    /// # Safety
    /// `ptr` must be exclusively owned by the caller, allocated the way this deleter expects,
    /// and never used again afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

// std::default_delete
/// Frees a pointer that came out of a global [`Box`]. For `T = [U]` this is the array form.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDeleter;

impl<T: ?Sized> Deleter<T> for DefaultDeleter {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) })
    }
}

/// Frees a pointer that came out of an `allocator_api2` box allocated in `A`.
#[derive(Debug, Default, Clone)]
pub struct AllocDeleter<A>
where A: Allocator + Clone
{
    alloc: A
}

impl<A> AllocDeleter<A>
where A: Allocator + Clone
{
    pub fn new(alloc: A) -> Self { Self { alloc } }
    pub fn allocator(&self) -> &A { &self.alloc }
}

impl<T, A> Deleter<T> for AllocDeleter<A>
where T: ?Sized,
      A: Allocator + Clone
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(unsafe { AllocBox::from_raw_in(ptr.as_ptr(), self.alloc.clone()) })
    }
}

impl<T, F> Deleter<T> for F
where T: ?Sized,
      F: FnMut(NonNull<T>)
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) { self(ptr) }
}

// std::unique_ptr
/// Exclusive owner of a heap object. The deleter runs exactly once per owned pointer, on
/// [`reset`](UniquePtr::reset), reassignment or drop, and never on null.
pub struct UniquePtr<T, D = DefaultDeleter>
where T: ?Sized,
      D: Deleter<T>
{
    data: CompressedPair<Option<NonNull<T>>, D>,
    _data: PhantomData<T>
}

impl<T> UniquePtr<T, DefaultDeleter> {
    /// Move `value` onto the heap and take ownership of it (`std::make_unique`).
    pub fn new(value: T) -> Self { Self::from_box(Box::new(value)) }
}

impl<T> UniquePtr<T, DefaultDeleter>
where T: ?Sized
{
    pub fn from_box(value: Box<T>) -> Self {
        unsafe { Self::from_raw_with_deleter(Some(NonNull::from(Box::leak(value))), DefaultDeleter) }
    }

    pub fn into_box(mut self) -> Option<Box<T>> {
        self.release().map(|p| unsafe { Box::from_raw(p.as_ptr()) })
    }
}

impl<T, A> UniquePtr<T, AllocDeleter<A>>
where T: ?Sized,
      A: Allocator + Clone
{
    pub fn from_box_in(value: AllocBox<T, A>) -> Self {
        let (ptr, alloc) = AllocBox::into_raw_with_allocator(value);
        unsafe { Self::from_raw_with_deleter(NonNull::new(ptr), AllocDeleter::new(alloc)) }
    }
}

impl<T, D> UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    pub fn null() -> Self where D: Default { Self::with_deleter(D::default()) }

    pub fn with_deleter(deleter: D) -> Self {
        Self { data: CompressedPair::new(None, deleter), _data: PhantomData }
    }

    /// # Safety
    /// `ptr` must be exclusively owned and releasable by `D::default()`.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self where D: Default {
        unsafe { Self::from_raw_with_deleter(Some(ptr), D::default()) }
    }

    /// # Safety
    /// `ptr`, if present, must be exclusively owned and releasable by `deleter`.
    pub unsafe fn from_raw_with_deleter(ptr: Option<NonNull<T>>, deleter: D) -> Self {
        Self { data: CompressedPair::new(ptr, deleter), _data: PhantomData }
    }

    /// Give up ownership without running the deleter.
    pub fn release(&mut self) -> Option<NonNull<T>> { self.data.first_mut().take() }

    pub fn reset(&mut self) { unsafe { self.reset_raw(None) } }

    /// Replace the owned pointer. The new pointer is stored before the deleter runs on the old
    /// one, so a deleter that looks back at this `UniquePtr` sees the new state.
    ///
    /// # Safety
    /// `ptr`, if present, must be exclusively owned and releasable by this pointer's deleter.
    pub unsafe fn reset_raw(&mut self, ptr: Option<NonNull<T>>) {
        let (slot, deleter) = self.data.both_mut();
        if let Some(old) = std::mem::replace(slot, ptr) {
            log::trace!("UniquePtr: deleting {:p}", old);
            unsafe { deleter.delete(old) }
        }
    }

    pub fn swap(&mut self, other: &mut Self) { self.data.swap(&mut other.data) }

    pub fn get(&self) -> Option<&T> { self.data.first().map(|p| unsafe { &*p.as_ptr() }) }
    pub fn get_mut(&mut self) -> Option<&mut T> { self.data.first().map(|p| unsafe { &mut *p.as_ptr() }) }
    pub fn as_ptr(&self) -> Option<NonNull<T>> { *self.data.first() }
    pub fn is_null(&self) -> bool { self.data.first().is_none() }

    pub fn deleter(&self) -> &D { self.data.second() }
    /// Mutable access to the deleter, for deleters that carry state of their own.
    ///
    /// ```compile_fail
    /// # use cpp_memory::memory::unique_ptr::{ AllocDeleter, UniquePtr };
    /// # use allocator_api2::{ alloc::Global, boxed::Box };
    /// let mut ptr = UniquePtr::from_box_in(Box::new_in(7u32, Global));
    /// // Error: call to unsafe function
    /// *ptr.deleter_mut() = AllocDeleter::new(Global);
    /// ```
    ///
    /// # Safety
    /// Whatever the deleter is left as must still be able to free the pointer currently owned.
    /// Replacing an [`AllocDeleter`] with one over a different allocator instance breaks this.
    pub unsafe fn deleter_mut(&mut self) -> &mut D { self.data.second_mut() }

    /// Move ownership into a `UniquePtr` of a different pointee type, converting the deleter.
    /// This is the derived-to-base move: `f` is normally an unsizing coercion such as
    /// `|p| -> NonNull<dyn Trait> { p }`.
    ///
    /// # Safety
    /// `f` must return a pointer to the same allocation that `E` is able to free.
    pub unsafe fn cast<U, E, F>(self, f: F) -> UniquePtr<U, E>
    where U: ?Sized,
          E: Deleter<U> + From<D>,
          F: FnOnce(NonNull<T>) -> NonNull<U>
    {
        let this = ManuallyDrop::new(self);
        let ptr = this.data.first().map(f);
        let deleter = unsafe { ptr::read(this.data.second()) };
        unsafe { UniquePtr::from_raw_with_deleter(ptr, E::from(deleter)) }
    }
}

impl<T> UniquePtr<[T], DefaultDeleter> {
    pub fn from_vec(vec: Vec<T>) -> Self { Self::from_box(vec.into_boxed_slice()) }

    pub fn new_slice_default(len: usize) -> Self
    where T: Default
    {
        Self::from_vec((0..len).map(|_| T::default()).collect())
    }
}

impl<T, D> UniquePtr<[T], D>
where D: Deleter<[T]>
{
    pub fn len(&self) -> usize { self.get().map_or(0, |s| s.len()) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T, D> Index<usize> for UniquePtr<[T], D>
where D: Deleter<[T]>
{
    type Output = T;
    fn index(&self, index: usize) -> &Self::Output {
        match self.get() {
            Some(v) => &v[index],
            None => panic!("Tried to index a null UniquePtr")
        }
    }
}

impl<T, D> IndexMut<usize> for UniquePtr<[T], D>
where D: Deleter<[T]>
{
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        match self.get_mut() {
            Some(v) => &mut v[index],
            None => panic!("Tried to index a null UniquePtr")
        }
    }
}

impl<T, D> Drop for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn drop(&mut self) { self.reset() }
}

impl<T, D> Default for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T> + Default
{
    fn default() -> Self { Self::null() }
}

impl<T, D> Deref for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("Tried to dereference a null UniquePtr")
        }
    }
}

impl<T, D> DerefMut for UniquePtr<T, D>
where T: ?Sized,
      D: Deleter<T>
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.get_mut() {
            Some(v) => v,
            None => panic!("Tried to dereference a null UniquePtr")
        }
    }
}

impl<T, D> Debug for UniquePtr<T, D>
where T: ?Sized + Debug,
      D: Deleter<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UniquePtr {{ data: {:?} }}", self.get())
    }
}

impl<T, D> Display for UniquePtr<T, D>
where T: ?Sized + Display,
      D: Deleter<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "nullptr")
        }
    }
}
