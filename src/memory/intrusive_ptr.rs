use std::{
    cell::Cell,
    fmt::{ Debug, Display },
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr::NonNull
};

/// Counting strategy stored inside an intrusively counted object.
pub trait Counter: Default {
    /// Returns the new count.
    fn inc_ref(&self) -> usize;
    /// Returns the new count.
    fn dec_ref(&self) -> usize;
    fn ref_count(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct SimpleCounter {
    count: Cell<usize>
}

impl Counter for SimpleCounter {
    fn inc_ref(&self) -> usize {
        self.count.set(self.count.get() + 1);
        self.count.get()
    }

    fn dec_ref(&self) -> usize {
        self.count.set(self.count.get() - 1);
        self.count.get()
    }

    fn ref_count(&self) -> usize { self.count.get() }
}

/// What happens to an intrusively counted object once its count reaches zero.
pub trait Destroy<T: ?Sized> {
    fn destroy(object: Box<T>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultDelete;

impl<T: ?Sized> Destroy<T> for DefaultDelete {
    fn destroy(object: Box<T>) { drop(object) }
}

/// Reference count embedded in the object it counts.
///
/// Cloning gives a fresh, zero count: a copy of an object is not referenced by anyone yet.
#[derive(Debug, Default)]
pub struct RefCounted<C = SimpleCounter>
where C: Counter
{
    counter: C
}

pub type SimpleRefCounted = RefCounted<SimpleCounter>;

impl<C> RefCounted<C>
where C: Counter
{
    pub fn new() -> Self { Self { counter: C::default() } }
    pub fn inc_ref(&self) -> usize { self.counter.inc_ref() }
    pub fn dec_ref(&self) -> usize { self.counter.dec_ref() }
    pub fn ref_count(&self) -> usize { self.counter.ref_count() }
}

impl<C> Clone for RefCounted<C>
where C: Counter
{
    fn clone(&self) -> Self { Self::new() }
}

/// Everything [`IntrusivePtr`] needs from its pointee. Object safe, so a trait with this as a
/// supertrait can be used as `IntrusivePtr<dyn Trait>`.
///
/// Usually implemented through [`Intrusive`] rather than by hand.
pub trait IntrusiveObject {
    fn inc_ref(&self) -> usize;
    fn dec_ref(&self) -> usize;
    fn ref_count(&self) -> usize;
    /// Called once the count has dropped to zero.
    fn destroy(self: Box<Self>);
}

/// Hooks an embedded [`RefCounted`] and a [`Destroy`] policy up to [`IntrusiveObject`].
pub trait Intrusive: Sized {
    type Counter: Counter;
    type Deleter: Destroy<Self>;
    fn ref_counted(&self) -> &RefCounted<Self::Counter>;
}

impl<T> IntrusiveObject for T
where T: Intrusive
{
    fn inc_ref(&self) -> usize { self.ref_counted().inc_ref() }
    fn dec_ref(&self) -> usize { self.ref_counted().dec_ref() }
    fn ref_count(&self) -> usize { self.ref_counted().ref_count() }

    fn destroy(self: Box<Self>) {
        log::trace!("IntrusivePtr: destroying {:p}", &*self);
        T::Deleter::destroy(self)
    }
}

/// Drop one reference to `ptr`, destroying the object if it was the last.
///
/// # Safety
/// `ptr` must be a live, box-allocated object on which the caller owns one reference.
unsafe fn release<T>(ptr: NonNull<T>)
where T: ?Sized + IntrusiveObject
{
    if unsafe { ptr.as_ref() }.dec_ref() == 0 {
        unsafe { Box::from_raw(ptr.as_ptr()) }.destroy()
    }
}

/// Reference counting pointer whose count lives inside the pointee.
pub struct IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    _ptr: Option<NonNull<T>>,
    _data: PhantomData<T>
}

impl<T> IntrusivePtr<T>
where T: IntrusiveObject
{
    /// Move `value` onto the heap and take the first reference to it.
    pub fn make_intrusive(value: T) -> Self { Self::from_box(Box::new(value)) }
}

impl<T> IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    pub const fn null() -> Self { Self { _ptr: None, _data: PhantomData } }

    pub fn from_box(value: Box<T>) -> Self {
        unsafe { Self::from_raw(NonNull::from(Box::leak(value))) }
    }

    /// Take a new reference to an object that may already be referenced elsewhere. Since the
    /// count lives in the object, a bare pointer to it is enough.
    ///
    /// # Safety
    /// `ptr` must point to a live object that was allocated in a global [`Box`].
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self {
        unsafe { ptr.as_ref() }.inc_ref();
        Self { _ptr: Some(ptr), _data: PhantomData }
    }

    pub fn reset(&mut self) {
        if let Some(ptr) = self._ptr.take() {
            unsafe { release(ptr) }
        }
    }

    /// Point at `ptr` instead, taking a reference to it before the old one is released.
    ///
    /// # Safety
    /// Same as [`from_raw`](Self::from_raw).
    pub unsafe fn reset_raw(&mut self, ptr: Option<NonNull<T>>) {
        if let Some(ptr) = ptr {
            unsafe { ptr.as_ref() }.inc_ref();
        }
        if let Some(old) = std::mem::replace(&mut self._ptr, ptr) {
            unsafe { release(old) }
        }
    }

    pub fn swap(&mut self, other: &mut Self) { std::mem::swap(&mut self._ptr, &mut other._ptr) }

    pub fn get(&self) -> Option<&T> { self._ptr.map(|p| unsafe { &*p.as_ptr() }) }
    pub fn as_ptr(&self) -> Option<NonNull<T>> { self._ptr }
    pub fn is_null(&self) -> bool { self._ptr.is_none() }

    pub fn use_count(&self) -> usize { self.get().map_or(0, |v| v.ref_count()) }

    /// Move this reference into a pointer of another type, normally an unsizing coercion such
    /// as `|p| -> NonNull<dyn Trait> { p }`.
    ///
    /// # Safety
    /// `f` must return the same object, viewed as a type whose [`IntrusiveObject`] impl counts
    /// and destroys it the same way.
    pub unsafe fn cast<U, F>(self, f: F) -> IntrusivePtr<U>
    where U: ?Sized + IntrusiveObject,
          F: FnOnce(NonNull<T>) -> NonNull<U>
    {
        let this = ManuallyDrop::new(self);
        IntrusivePtr { _ptr: this._ptr.map(f), _data: PhantomData }
    }
}

impl<T> Clone for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    fn clone(&self) -> Self {
        match self._ptr {
            Some(ptr) => unsafe { Self::from_raw(ptr) },
            None => Self::null()
        }
    }
}

impl<T> Drop for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    fn drop(&mut self) { self.reset() }
}

impl<T> Default for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    fn default() -> Self { Self::null() }
}

impl<T> Deref for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        match self.get() {
            Some(v) => v,
            None => panic!("Tried to dereference a null IntrusivePtr")
        }
    }
}

impl<T, U> PartialEq<IntrusivePtr<U>> for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject,
      U: ?Sized + IntrusiveObject
{
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        self._ptr.map(|p| p.cast::<u8>()) == other._ptr.map(|p| p.cast::<u8>())
    }
}

impl<T> Debug for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject + Debug
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntrusivePtr {{ data: {:?}, refs: {} }}", self.get(), self.use_count())
    }
}

impl<T> Display for IntrusivePtr<T>
where T: ?Sized + IntrusiveObject + Display
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(v) => write!(f, "{}", v),
            None => write!(f, "nullptr")
        }
    }
}

#[cfg(test)]
pub mod tests {
    use super::{ DefaultDelete, Destroy, Intrusive, IntrusiveObject, IntrusivePtr, RefCounted, SimpleCounter, SimpleRefCounted };
    use crate::memory::test_utils::{ DropCounter, Tracked };
    use std::{
        cell::Cell,
        error::Error,
        ptr::NonNull,
        rc::Rc
    };
    type TestReturn = Result<(), Box<dyn Error>>;

    fn check_ref_count(get: usize, expect: usize) {
        assert!(get == expect, "Reference count should be {} instead of {}", expect, get);
    }

    struct Probe {
        refs: SimpleRefCounted,
        destroyed: Rc<Cell<usize>>
    }

    struct CountingDestroy;

    impl Destroy<Probe> for CountingDestroy {
        fn destroy(object: Box<Probe>) {
            object.destroyed.set(object.destroyed.get() + 1);
        }
    }

    impl Intrusive for Probe {
        type Counter = SimpleCounter;
        type Deleter = CountingDestroy;
        fn ref_counted(&self) -> &RefCounted<SimpleCounter> { &self.refs }
    }

    #[derive(Clone)]
    struct Widget {
        refs: SimpleRefCounted,
        id: u32,
        _tracked: Rc<Tracked<()>>
    }

    impl Intrusive for Widget {
        type Counter = SimpleCounter;
        type Deleter = DefaultDelete;
        fn ref_counted(&self) -> &RefCounted<SimpleCounter> { &self.refs }
    }

    trait Labelled: IntrusiveObject {
        fn label(&self) -> String;
    }

    impl Labelled for Widget {
        fn label(&self) -> String { format!("widget {}", self.id) }
    }

    fn widget(id: u32, counter: &DropCounter) -> Widget {
        Widget { refs: RefCounted::new(), id, _tracked: Rc::new(counter.track(())) }
    }

    #[test]
    fn copies_share_embedded_count() -> TestReturn {
        let destroyed = Rc::new(Cell::new(0));
        let ptr = IntrusivePtr::make_intrusive(Probe { refs: RefCounted::new(), destroyed: destroyed.clone() });
        check_ref_count(ptr.use_count(), 1);
        let copies: Vec<_> = (0..3).map(|_| ptr.clone()).collect();
        check_ref_count(ptr.use_count(), 4);
        for (i, copy) in copies.into_iter().enumerate() {
            drop(copy);
            check_ref_count(ptr.use_count(), 3 - i);
        }
        assert!(destroyed.get() == 0, "Object should be alive while referenced");
        drop(ptr);
        assert!(destroyed.get() == 1, "Deletion policy should run exactly once");
        Ok(())
    }

    #[test]
    fn adopt_from_raw_pointer() -> TestReturn {
        let counter = DropCounter::new();
        let first = IntrusivePtr::make_intrusive(widget(1, &counter));
        let raw = first.as_ptr().ok_or("pointer should not be null")?;
        let second = unsafe { IntrusivePtr::from_raw(raw) };
        check_ref_count(second.use_count(), 2);
        assert!(first == second, "Both pointers should refer to the same object");
        drop(first);
        assert!(counter.drops() == 0, "Object should survive while the adopted pointer lives");
        drop(second);
        assert!(counter.drops() == 1, "Object should be destroyed with the last reference");
        Ok(())
    }

    #[test]
    fn reset_and_swap() -> TestReturn {
        let counter = DropCounter::new();
        let mut a = IntrusivePtr::make_intrusive(widget(1, &counter));
        let mut b = IntrusivePtr::make_intrusive(widget(2, &counter));
        a.swap(&mut b);
        assert!(a.id == 2 && b.id == 1, "Swap should exchange objects");
        let same = a.as_ptr();
        unsafe { a.reset_raw(same) };
        check_ref_count(a.use_count(), 1);
        assert!(counter.drops() == 0, "Resetting to the same object should keep it alive");
        let other = b.as_ptr();
        unsafe { a.reset_raw(other) };
        assert!(counter.drops() == 1, "Resetting should release the previous object");
        check_ref_count(b.use_count(), 2);
        a.reset();
        assert!(a.is_null() && a.use_count() == 0, "Reset pointer should be null");
        check_ref_count(b.use_count(), 1);
        Ok(())
    }

    #[test]
    fn trait_object_view() -> TestReturn {
        let counter = DropCounter::new();
        let concrete = IntrusivePtr::make_intrusive(widget(9, &counter));
        let keep = concrete.clone();
        let labelled: IntrusivePtr<dyn Labelled> = unsafe { concrete.cast(|p| -> NonNull<dyn Labelled> { p }) };
        assert!(labelled.label() == "widget 9", "Trait object should dispatch to the widget");
        check_ref_count(labelled.use_count(), 2);
        drop(keep);
        check_ref_count(labelled.use_count(), 1);
        drop(labelled);
        assert!(counter.drops() == 1, "Widget should be destroyed through the trait object");
        Ok(())
    }

    #[test]
    fn cloned_object_gets_fresh_count() -> TestReturn {
        let counter = DropCounter::new();
        let original = IntrusivePtr::make_intrusive(widget(3, &counter));
        let _copy = original.clone();
        let duplicate = IntrusivePtr::make_intrusive((*original).clone());
        check_ref_count(original.use_count(), 2);
        check_ref_count(duplicate.use_count(), 1);
        assert!(original != duplicate, "Cloned object should be a separate allocation");
        Ok(())
    }

    #[test]
    fn null_pointer() -> TestReturn {
        let ptr: IntrusivePtr<Widget> = IntrusivePtr::default();
        assert!(ptr.is_null(), "Default pointer should be null");
        check_ref_count(ptr.use_count(), 0);
        let copy = ptr.clone();
        assert!(copy.get().is_none(), "Copy of a null pointer should be null");
        Ok(())
    }
}
