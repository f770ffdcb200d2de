#![forbid(unsafe_code)]
//! alloctrack-heap: a small managed heap for hosting tracked code.
//!
//! Objects are allocated through [`Heap::alloc`] and stay alive while any
//! [`Obj`] handle to them exists. Reclamation happens only in a collection
//! pass, which reports each reclaimed object to the subscribed observer
//! against the thread that allocated it.

pub mod heap;

pub use heap::{Heap, HeapStats, Obj};
