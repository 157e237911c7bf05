//! Declarative helpers for the small enums that mirror wire values.

/// Defines an enum whose variants map to integer values as they appear in
/// `dat`/`res`/`cmd` arrays.
///
/// Generates `code()`, `from_code()`, `name()`, `ALL`, conversions to and
/// from `i64`, and `Display`.
macro_rules! define_wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = ($code:expr, $label:expr) ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn code(self) -> i64 {
                match self {
                    $($name::$variant => $code),+
                }
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $(c if c == $code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl TryFrom<i64> for $name {
            type Error = $crate::error::GreeError;

            fn try_from(code: i64) -> $crate::error::Result<Self> {
                Self::from_code(code).ok_or_else(|| {
                    $crate::error::GreeError::InvalidArgument(format!(
                        "{} is not a valid {} value",
                        code,
                        stringify!($name)
                    ))
                })
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.code()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

/// Defines the set of inner packet types, keyed by their `t` field.
macro_rules! define_packet_type {
    ( $( $variant:ident = $tag:expr ),+ $(,)? ) => {
        /// Value of the `t` field of an inner packet.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PacketType {
            $( $variant ),+
        }

        impl PacketType {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(PacketType::$variant => $tag),+
                }
            }

            pub fn from_tag(tag: &str) -> Option<Self> {
                match tag {
                    $($tag => Some(PacketType::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for PacketType {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
