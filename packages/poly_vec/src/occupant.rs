use std::ptr::NonNull;

/// A concrete type that can be stored in a [`PolyVec<B>`][crate::PolyVec].
///
/// The container never remembers the concrete type of an occupant. Instead, it remembers
/// how to view the occupant's bytes as the capability set `B` (typically a `dyn Trait`),
/// which is all it needs to hand out references and to drop the occupant.
///
/// Every sized type is an occupant of a container of itself. For trait object capability
/// sets, use the [`occupant!`][crate::occupant] macro, which implements this trait with
/// the compiler's unsizing coercion:
///
/// ```
/// use poly_vec::{PolyVec, occupant};
///
/// trait Greeter {
///     fn greet(&self) -> String;
/// }
///
/// struct English;
/// struct Dutch(u32);
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         "hello".to_string()
///     }
/// }
///
/// impl Greeter for Dutch {
///     fn greet(&self) -> String {
///         format!("hallo {}", self.0)
///     }
/// }
///
/// occupant!(dyn Greeter: English, Dutch);
///
/// let mut vec = PolyVec::<dyn Greeter>::new();
/// vec.push_back(English).unwrap();
/// vec.push_back(Dutch(5)).unwrap();
///
/// let greetings: Vec<String> = vec.iter().map(Greeter::greet).collect();
/// assert_eq!(greetings, ["hello", "hallo 5"]);
/// ```
///
/// # Safety
///
/// `upcast()` must return a pointer to the same object at the same address, only changing
/// the static type (and attaching pointer metadata). The container drops occupants through
/// the returned pointer, so returning anything else is undefined behavior.
pub unsafe trait Occupant<B: ?Sized> {
    /// Views a pointer to `Self` as a pointer to the capability set `B`.
    fn upcast(this: NonNull<Self>) -> NonNull<B>;
}

// SAFETY: The identity conversion returns the input pointer unchanged.
unsafe impl<T> Occupant<T> for T {
    #[inline]
    fn upcast(this: NonNull<Self>) -> NonNull<T> {
        this
    }
}

/// Implements [`Occupant`] for one or more concrete types against a trait object
/// capability set.
///
/// The generated implementations rely on the unsizing coercion, so the concrete types
/// must implement the trait named by the capability set.
///
/// # Example
///
/// ```
/// use std::fmt::Display;
///
/// use poly_vec::{PolyVec, occupant};
///
/// struct Meters(f64);
///
/// impl Display for Meters {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "{} m", self.0)
///     }
/// }
///
/// occupant!(dyn Display: Meters);
///
/// let mut vec = PolyVec::<dyn Display>::new();
/// let index = vec.push(Meters(1.5)).unwrap();
/// assert_eq!(vec[index].to_string(), "1.5 m");
/// ```
#[macro_export]
macro_rules! occupant {
    ($base:ty: $($occupant:ty),+ $(,)?) => {
        $(
            // SAFETY: The unsizing coercion keeps the address and only attaches metadata.
            unsafe impl $crate::Occupant<$base> for $occupant {
                #[inline]
                fn upcast(this: ::std::ptr::NonNull<Self>) -> ::std::ptr::NonNull<$base> {
                    this
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use super::*;

    #[derive(Debug)]
    struct Marker(u16);

    occupant!(dyn Debug: Marker, String);

    #[test]
    fn identity_upcast_keeps_address() {
        let mut value = 42_u64;
        let ptr = NonNull::from(&mut value);

        assert_eq!(<u64 as Occupant<u64>>::upcast(ptr), ptr);
    }

    #[test]
    fn macro_upcast_keeps_address_and_attaches_vtable() {
        let mut value = Marker(7);
        let ptr = NonNull::from(&mut value);

        let upcast = <Marker as Occupant<dyn Debug>>::upcast(ptr);
        assert_eq!(upcast.cast::<Marker>(), ptr);

        // SAFETY: The pointer came from a live local and no other references exist.
        let debug = unsafe { upcast.as_ref() };
        assert_eq!(format!("{debug:?}"), "Marker(7)");
    }

    #[test]
    fn macro_accepts_multiple_types() {
        let mut value = "text".to_string();
        let ptr = NonNull::from(&mut value);

        let upcast = <String as Occupant<dyn Debug>>::upcast(ptr);

        // SAFETY: The pointer came from a live local and no other references exist.
        let debug = unsafe { upcast.as_ref() };
        assert_eq!(format!("{debug:?}"), "\"text\"");
    }
}
