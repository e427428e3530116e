//! # Internal Macros
//!
//! Small macros shared across the crate: zerocopy getter generation for the
//! on-disk structs, and the verifier's record-and-fail helper.

/// Generates getter methods for zerocopy little-endian fields.
///
/// The on-disk structs store multi-byte fields as
/// `zerocopy::little_endian::{U16, U32, U64}`; this expands to plain getters
/// returning the native integer type.
#[macro_export]
macro_rules! zerocopy_getters {
    ($($field:ident : $native_ty:ty),* $(,)?) => {
        $(
            #[inline]
            pub fn $field(&self) -> $native_ty {
                self.$field.get()
            }
        )*
    };
}

/// Records a finding in the sink and returns the same message as an error.
///
/// Structural verification failures are reported twice on purpose: once into
/// the findings sink, which accumulates every message produced during a run,
/// and once as the `eyre` error that unwinds the traversal back to the
/// driver.
#[macro_export]
macro_rules! verify_bail {
    ($sink:expr, $kind:expr, $($arg:tt)*) => {
        return Err($sink.record($kind, format!($($arg)*)))
    };
}
