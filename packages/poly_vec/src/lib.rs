//! A contiguous container of heterogeneous objects that share a common capability set.
//!
//! [`PolyVec<B>`] stores objects of *different* concrete types inline, back to back, in a
//! single growable byte buffer. Each object is reachable through the capability set `B`
//! (typically a trait object type such as `dyn Shape`), so you get the convenience of
//! `Vec<Box<dyn Shape>>` without one heap allocation per element.
//!
//! # Key Features
//!
//! - **Inline heterogeneous storage**: occupants of any size and alignment live in one buffer
//! - **Stable slot indices**: an index identifies its occupant until that occupant is freed
//! - **Slot reuse without compaction**: freed slots are recycled first-fit; nothing is moved
//! - **Explicit append**: the `*_back` insertion variants skip the free list
//! - **Raw placement**: [`PolyVec::memplace()`] copies a byte image described by a [`Dispatch`]
//! - **Compact slot table**: the [`Offset`] type parameter selects 8, 16, 32 or 64 bit offsets
//! - **Word granularity**: [`Granularity::Word`] stretches the addressable range of narrow offsets
//! - **Checked access**: out-of-range indices produce a structured [`Error`]
//! - **Flexible drop policies**: [`DropPolicy`] governs occupants left at teardown
//! - **Thread mobility**: the container can be moved between threads (but not shared)
//!
//! # Slots
//!
//! Every insertion creates or reuses a *slot*: a byte range in the buffer plus a liveness
//! marker. Slots are numbered from zero in creation order and keep their byte range until
//! [`PolyVec::free_all()`] or [`PolyVec::clear()`] resets the container. Freeing a slot drops
//! its occupant and offers the slot for reuse; [`PolyVec::len()`] still counts it.
//!
//! # Examples
//!
//! ## Storing trait objects
//!
//! ```rust
//! use poly_vec::{PolyVec, occupant};
//!
//! trait Animal {
//!     fn sound(&self) -> &'static str;
//! }
//!
//! struct Cat;
//! struct Cow {
//!     _weight_kg: u32,
//! }
//!
//! impl Animal for Cat {
//!     fn sound(&self) -> &'static str {
//!         "meow"
//!     }
//! }
//!
//! impl Animal for Cow {
//!     fn sound(&self) -> &'static str {
//!         "moo"
//!     }
//! }
//!
//! occupant!(dyn Animal: Cat, Cow);
//!
//! let mut farm = PolyVec::<dyn Animal>::new();
//! farm.push(Cat).unwrap();
//! farm.push(Cow { _weight_kg: 700 }).unwrap();
//!
//! let sounds: Vec<&str> = farm.iter().map(Animal::sound).collect();
//! assert_eq!(sounds, ["meow", "moo"]);
//! ```
//!
//! ## Freeing and reusing slots
//!
//! ```rust
//! use poly_vec::PolyVec;
//!
//! let mut vec = PolyVec::<String>::new();
//!
//! let a = vec.push("a".to_string()).unwrap();
//! let b = vec.push("b".to_string()).unwrap();
//!
//! vec.free(a).unwrap();
//! assert!(vec.is_free(a).unwrap());
//! assert_eq!(vec.live_len(), 1);
//!
//! // `push()` reuses the freed slot, `push_back()` always appends.
//! assert_eq!(vec.push("c".to_string()).unwrap(), a);
//! assert_eq!(vec.push_back("d".to_string()).unwrap(), 2);
//!
//! assert_eq!(vec[b], "b");
//! ```
//!
//! ## Narrow offsets
//!
//! ```rust
//! use poly_vec::{Error, PolyVec};
//!
//! // 8-bit offsets address at most 255 bytes.
//! let mut vec = PolyVec::<[u8; 100], u8>::new();
//!
//! vec.push([1; 100]).unwrap();
//! vec.push([2; 100]).unwrap();
//!
//! assert!(matches!(
//!     vec.push([3; 100]),
//!     Err(Error::CapacityExceeded { .. })
//! ));
//! ```
//!
//! # Thread safety
//!
//! [`PolyVec`] is [`Send`] when `B` is, so a container can be handed to another thread. It is
//! never [`Sync`]; wrap it in a mutex to share it.

mod buffer;
mod builder;
mod dispatch;
mod drop_policy;
mod error;
mod granularity;
mod iter;
mod occupant;
mod offset;
mod vec;

pub use builder::*;
pub use dispatch::Dispatch;
pub use drop_policy::*;
pub use error::*;
pub use granularity::*;
pub use iter::{Indices, Iter, IterMut};
pub use occupant::Occupant;
pub use offset::*;
pub use vec::PolyVec;
