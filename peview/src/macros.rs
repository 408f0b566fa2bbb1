/// Defines a packed little-endian on-disk record.
///
/// Each field is given with its byte offset within the record; the offsets are not checked
/// against each other, so keep them in sync with the documented layout.
macro_rules! define_raw_struct {
    (
        $(#[$meta:meta])*
        $name:ident, $size:expr, {
            $(
                $(#[$field_meta:meta])*
                $field:ident : $type:ty = $offset:expr
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
        pub struct $name {
            $(
                $(#[$field_meta])*
                pub $field: $type,
            )*
        }
        impl $crate::from_byte_slice::FromByteSlice for $name {
            const SIZE: usize = $size;

            fn from_le_byte_slice(bytes: &[u8]) -> Self {
                Self {
                    $(
                        $field: <$type as $crate::from_byte_slice::FromByteSlice>::from_le_byte_slice(&bytes[$offset..]),
                    )*
                }
            }

            fn write_le_byte_slice(&self, bytes: &mut [u8]) {
                $(
                    $crate::from_byte_slice::FromByteSlice::write_le_byte_slice(&self.$field, &mut bytes[$offset..]);
                )*
            }
        }
    };
}


/// Getter/setter pairs for fields of a structure's span at fixed offsets.
macro_rules! span_fields {
    ($($(#[$meta:meta])* $getter:ident, $setter:ident : $type:ty = $offset:expr;)*) => {
        $(
            $(#[$meta])*
            pub fn $getter(&self) -> $type { self.span.read($offset) }
            pub fn $setter(&mut self, value: $type) { self.span.write($offset, value) }
        )*
    };
}
