use thiserror::Error;

// std::bad_weak_ptr
/// Returned when a [`WeakPtr`](super::weak_ptr::WeakPtr) is promoted directly into a
/// [`SharedPtr`](super::shared_ptr::SharedPtr) after the object it observed has been destroyed,
/// or when an object asks for a shared handle to itself before any `SharedPtr` owns it.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("bad weak ptr")]
pub struct BadWeakPtr;
