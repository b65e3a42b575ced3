//! C++-style ownership primitives: `UniquePtr`, `SharedPtr`/`WeakPtr` with a detached
//! control block, `IntrusivePtr` and `EnableSharedFromThis`.
//!
//! Everything in this crate is single-threaded. Reference counts are plain `Cell<usize>`
//! arithmetic and none of the handle types are `Send` or `Sync`.
pub mod memory {
    pub mod compressed_pair;
    pub mod enable_shared;
    pub mod error;
    pub mod intrusive_ptr;
    pub mod ref_count;
    pub mod shared_ptr;
    pub mod unique_ptr;
    pub mod weak_ptr;
    #[cfg(test)]
    pub(crate) mod test_utils;
}
