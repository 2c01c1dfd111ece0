//! Newtype generators for fixed-size binary values.

/// Public fixed-size value: `Copy`, Crockford `Display`, serde via [`crate::crock`].
macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, $crate::error::EncodingError> {
                bytes
                    .try_into()
                    .map(Self)
                    .map_err(|_| $crate::error::EncodingError::WrongLength {
                        expected: $len,
                        actual: bytes.len(),
                    })
            }

            pub fn from_crock(s: &str) -> Result<Self, $crate::error::EncodingError> {
                $crate::crock::decode_fixed::<$len>(s).map(Self)
            }

            pub fn to_crock(&self) -> String {
                $crate::crock::encode(&self.0)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_crock())
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let enc = self.to_crock();
                write!(f, "{}({})", stringify!($name), &enc[..enc.len().min(12)])
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::EncodingError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_crock(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                $crate::crock::serialize_bytes(&self.0, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                $crate::crock::deserialize_fixed::<D, $len>(deserializer).map(Self)
            }
        }
    };
}

/// Secret fixed-size value: zeroized on drop, redacted `Debug`, no `Copy`.
///
/// Secrets still serialize because the wallet must persist coin and reserve keys.
macro_rules! secret_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn from_crock(s: &str) -> Result<Self, $crate::error::EncodingError> {
                $crate::crock::decode_fixed::<$len>(s).map(Self)
            }

            pub fn to_crock(&self) -> String {
                $crate::crock::encode(&self.0)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}(<redacted>)", stringify!($name))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                $crate::crock::serialize_bytes(&self.0, serializer)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                $crate::crock::deserialize_fixed::<D, $len>(deserializer).map(Self)
            }
        }
    };
}
