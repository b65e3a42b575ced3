use allocator_api2::alloc::Allocator;
use crate::memory::{
    error::BadWeakPtr,
    ref_count::RefCountBase,
    shared_ptr::SharedPtr,
    weak_ptr::WeakPtr
};
use std::{
    cell::OnceCell,
    fmt::Debug,
    ptr::NonNull
};

// std::enable_shared_from_this
/// Back-reference an object keeps to its own control block, so that it can hand out further
/// [`SharedPtr`]/[`WeakPtr`] handles to itself that share the existing counts.
///
/// Embed one as a field, implement [`SharedFromThis`], and create the object through
/// [`SharedPtr::make_shared_enabled`] or [`SharedPtr::from_box_enabled`]. Those factories fill
/// in the back-reference once the block exists; the object's own constructor cannot, since it
/// runs before there is anything to point at.
pub struct EnableSharedFromThis<T>
where T: ?Sized
{
    weak_this: OnceCell<WeakPtr<T>>
}

impl<T> EnableSharedFromThis<T>
where T: ?Sized
{
    pub const fn new() -> Self { Self { weak_this: OnceCell::new() } }

    /// Whether an owning [`SharedPtr`] has been attached yet.
    pub fn is_bound(&self) -> bool { self.weak_this.get().is_some() }

    /// # Safety
    /// `rep` must be the live block that owns the object at `ptr`, and that object must be the
    /// one containing `self`.
    pub(crate) unsafe fn bind(&self, ptr: NonNull<T>, rep: NonNull<RefCountBase>) {
        if !self.is_bound() {
            let _ = self.weak_this.set(unsafe { WeakPtr::foreign(ptr, rep) });
        }
    }
}

impl<T> Default for EnableSharedFromThis<T>
where T: ?Sized
{
    fn default() -> Self { Self::new() }
}

/// A copy of an object is a different object: it starts out unbound.
impl<T> Clone for EnableSharedFromThis<T>
where T: ?Sized
{
    fn clone(&self) -> Self { Self::new() }
}

impl<T> Debug for EnableSharedFromThis<T>
where T: ?Sized
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnableSharedFromThis {{ bound: {} }}", self.is_bound())
    }
}

/// Access to an object's [`EnableSharedFromThis`] field.
///
/// The back-reference is only filled in by [`SharedPtr::make_shared_enabled`],
/// [`SharedPtr::make_shared_enabled_in`], [`SharedPtr::from_box_enabled`] and
/// [`SharedPtr::reset_with_enabled`]. The plain factories (`make_shared`, `from_box`,
/// `reset_with` and their `_in` forms) do not know about it: an object created through them is
/// owned normally, but `shared_from_this` on it keeps returning [`BadWeakPtr`].
pub trait SharedFromThis {
    fn enable_shared_from_this(&self) -> &EnableSharedFromThis<Self>;

    /// A new strong reference to this object. Fails with [`BadWeakPtr`] if no [`SharedPtr`]
    /// owns the object yet (it was not created through an enabled factory) or it is already
    /// being destroyed.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, BadWeakPtr> {
        match self.enable_shared_from_this().weak_this.get() {
            Some(weak) => SharedPtr::from_weak(weak),
            None => Err(BadWeakPtr)
        }
    }

    /// A new weak reference to this object, empty if no [`SharedPtr`] owns it yet.
    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.enable_shared_from_this().weak_this.get().cloned().unwrap_or_default()
    }
}

impl<T> SharedPtr<T>
where T: SharedFromThis
{
    /// [`make_shared`](SharedPtr::make_shared) for objects that observe themselves.
    pub fn make_shared_enabled(data: T) -> Self { Self::make_shared(data).enable_shared() }

    pub fn make_shared_enabled_in<A>(data: T, alloc: A) -> Self
    where A: Allocator + Clone + 'static
    {
        Self::make_shared_in(data, alloc).enable_shared()
    }
}

impl<T> SharedPtr<T>
where T: ?Sized + SharedFromThis
{
    /// [`from_box`](SharedPtr::from_box) for objects that observe themselves.
    pub fn from_box_enabled(value: Box<T>) -> Self { Self::from_box(value).enable_shared() }

    /// [`reset_with`](SharedPtr::reset_with) for objects that observe themselves.
    pub fn reset_with_enabled(&mut self, value: Box<T>) {
        self.reset_with(value);
        if let (Some(ptr), Some(rep)) = (self._ptr, self._rep) {
            unsafe { ptr.as_ref().enable_shared_from_this().bind(ptr, rep) }
        }
    }

    fn enable_shared(self) -> Self {
        if let (Some(ptr), Some(rep)) = (self._ptr, self._rep) {
            unsafe { ptr.as_ref().enable_shared_from_this().bind(ptr, rep) }
        }
        self
    }
}
