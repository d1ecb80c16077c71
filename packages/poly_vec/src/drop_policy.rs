/// Determines occupant dropping behavior when the container is dropped.
///
/// By default, the container drops every still-live occupant when it is dropped.
///
/// # Examples
///
/// ```
/// use std::fmt::Debug;
///
/// use poly_vec::{DropPolicy, PolyVec};
///
/// // The drop policy is set at container creation time.
/// let vec = PolyVec::<dyn Debug>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The container will drop its live occupants when the container is dropped. This is
    /// the default.
    #[default]
    MayDropItems,

    /// The container will panic if it still contains live occupants when it is dropped.
    ///
    /// The occupants are still destroyed and the memory released before the panic. This
    /// is a guard for code that expects every slot to be freed explicitly, e.g. because
    /// raw pointers to occupants are handed out of band.
    MustNotDropItems,
}
