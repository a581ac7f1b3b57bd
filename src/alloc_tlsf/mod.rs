//! TLSF (two-level segregated fit) dynamic allocator (§4.2).
//!
//! [`tlsf::Tlsf`] is the pure algorithm: it operates on a caller-supplied
//! byte pool and never touches a global, so it can be instantiated with a
//! small pool and exercised under `cargo test` without a booted target.
//! [`global`] wraps a single instance behind [`crate::sync::SpinLock`] and
//! exposes it as the crate's `#[global_allocator]`, the same role the
//! teacher's `memory/heap.rs` gives `LockedHeap`.

pub mod global;
pub mod kernel_alloc;
pub mod tlsf;

pub use tlsf::{AllocError, IntegrityError, Stats, Tlsf};
