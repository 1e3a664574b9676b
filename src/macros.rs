//! Accessor generation for big-endian header fields.
//!
//! Header structs store multi-byte scalars as `zerocopy::big_endian`
//! wrappers so the in-memory representation matches the on-disk bytes.
//! `be_accessors!` generates the host-order getter/setter pairs, keeping
//! the conversion at exactly one place per field.
//!
//! ```ignore
//! use zerocopy::big_endian::{U16, U32};
//!
//! #[repr(C)]
//! struct Header {
//!     slot_count: U16,
//!     next: U32,
//! }
//!
//! impl Header {
//!     be_accessors! {
//!         slot_count: u16,
//!         next: u32,
//!     }
//! }
//! // generates slot_count()/set_slot_count(), next()/set_next()
//! ```

/// Generates getter and setter methods for zerocopy big-endian fields.
#[macro_export]
macro_rules! be_accessors {
    (@impl $field:ident, u16) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u16 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u16) {
                self.$field = ::zerocopy::big_endian::U16::new(val);
            }
        }
    };
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::big_endian::U32::new(val);
            }
        }
    };
    (@impl $field:ident, u64) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u64 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u64) {
                self.$field = ::zerocopy::big_endian::U64::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::be_accessors!(@impl $field, $ty);
        )*
    };
}
