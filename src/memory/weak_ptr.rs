use crate::memory::{
    ref_count::RefCountBase,
    shared_ptr::SharedPtr
};
use std::{
    fmt::Debug,
    mem::ManuallyDrop,
    ptr::NonNull
};

// std::weak_ptr
/// Non-owning observer of an object managed by [`SharedPtr`]. It keeps the control block alive
/// but never the object itself.
pub struct WeakPtr<T>
where T: ?Sized
{
    pub(crate) _ptr: Option<NonNull<T>>,
    pub(crate) _rep: Option<NonNull<RefCountBase>>,
    // false for the back-reference stored by EnableSharedFromThis, which lives inside the
    // object and must leave freeing the block to the strong side
    owns_block: bool
}

impl<T> WeakPtr<T>
where T: ?Sized
{
    pub const fn new() -> Self {
        Self { _ptr: None, _rep: None, owns_block: true }
    }

    /// Weak reference to a block this handle is not allowed to free.
    ///
    /// # Safety
    /// `rep` must be live and `ptr` must be the object (or a view of the object) it governs.
    pub(crate) unsafe fn foreign(ptr: NonNull<T>, rep: NonNull<RefCountBase>) -> Self {
        unsafe { rep.as_ref() }.increment_weak();
        Self { _ptr: Some(ptr), _rep: Some(rep), owns_block: false }
    }

    pub fn reset(&mut self) {
        self._ptr = None;
        if let Some(rep) = self._rep.take() {
            unsafe { RefCountBase::release_weak(rep, self.owns_block) }
        }
    }

    pub fn swap(&mut self, other: &mut Self) { std::mem::swap(self, other) }

    pub fn use_count(&self) -> usize {
        self._rep.map_or(0, |rep| unsafe { rep.as_ref() }.shared_count())
    }
    pub fn weak_count(&self) -> usize {
        self._rep.map_or(0, |rep| unsafe { rep.as_ref() }.weak_count())
    }

    pub fn expired(&self) -> bool { self.use_count() == 0 }

    /// Try to get a strong reference. Returns an empty [`SharedPtr`] if the object is gone;
    /// [`SharedPtr::from_weak`] reports that case as an error instead.
    pub fn lock(&self) -> SharedPtr<T> {
        SharedPtr::from_weak(self).unwrap_or_default()
    }

    /// Convert into a weak pointer that observes `f`'s view of the object, keeping the same
    /// block. If the object is already gone `f` is not called and the result observes nothing,
    /// but it still holds the block and reports the same counts.
    pub fn map<U, F>(self, f: F) -> WeakPtr<U>
    where T: 'static,
          U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        let ptr = match self.expired() {
            true => None,
            false => self._ptr.map(|p| NonNull::from(f(unsafe { p.as_ref() })))
        };
        let this = ManuallyDrop::new(self);
        WeakPtr { _ptr: ptr, _rep: this._rep, owns_block: this.owns_block }
    }

    /// Copy observing `f`'s view of the object. See [`map`](Self::map).
    pub fn project<U, F>(&self, f: F) -> WeakPtr<U>
    where T: 'static,
          U: ?Sized,
          F: for<'a> FnOnce(&'a T) -> &'a U
    {
        self.clone().map(f)
    }

    /// Whether both pointers observe the same address.
    pub fn ptr_eq<U>(&self, other: &WeakPtr<U>) -> bool
    where U: ?Sized
    {
        self._ptr.map(|p| p.cast::<u8>()) == other._ptr.map(|p| p.cast::<u8>())
    }

    /// Whether both pointers share one control block.
    pub fn owner_eq<U>(&self, other: &WeakPtr<U>) -> bool
    where U: ?Sized
    {
        self._rep == other._rep
    }

    pub(crate) fn owns_block(&self) -> bool { self.owns_block }
}

impl<T> Clone for WeakPtr<T>
where T: ?Sized
{
    fn clone(&self) -> Self {
        if let Some(rep) = self._rep {
            unsafe { rep.as_ref() }.increment_weak();
        }
        Self { _ptr: self._ptr, _rep: self._rep, owns_block: true }
    }
}

impl<T> From<&SharedPtr<T>> for WeakPtr<T>
where T: ?Sized
{
    fn from(value: &SharedPtr<T>) -> Self {
        if let Some(rep) = value._rep {
            unsafe { rep.as_ref() }.increment_weak();
        }
        Self { _ptr: value._ptr, _rep: value._rep, owns_block: true }
    }
}

impl<T> Drop for WeakPtr<T>
where T: ?Sized
{
    fn drop(&mut self) { self.reset() }
}

impl<T> Default for WeakPtr<T>
where T: ?Sized
{
    fn default() -> Self { Self::new() }
}

impl<T> Debug for WeakPtr<T>
where T: ?Sized + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (uses, weaks) = (self.use_count(), self.weak_count());
        let strong = self.lock();
        write!(f, "WeakPtr {{ data: {:?}, strong: {}, weak: {} }}", strong.get(), uses, weaks)
    }
}
