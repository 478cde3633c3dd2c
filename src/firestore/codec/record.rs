use super::schema::RecordSchema;

/// An application type stored as a wire map.
///
/// The schema is declared once per type and resolved lazily by each [`super::Codec`] under its
/// naming policy. Pair the impl with [`crate::impl_record_codec!`] so the type can also appear as a
/// member of other records and inside collections.
pub trait Record: Default + Send + Sync + 'static {
    fn schema() -> RecordSchema<Self>;

    /// Called once for every member whose wire value changed during a patch.
    fn property_changed(&mut self, _member: &str) {}
}

/// Implements `FieldCodec` for one or more [`Record`] types.
#[macro_export]
macro_rules! impl_record_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::firestore::codec::FieldCodec for $ty {
                fn encode_value(
                    &self,
                    codec: &$crate::firestore::codec::Codec,
                ) -> $crate::firestore::FirestoreResult<$crate::firestore::FirestoreValue> {
                    codec.encode_record(self)
                }

                fn decode_value(
                    value: &$crate::firestore::FirestoreValue,
                    codec: &$crate::firestore::codec::Codec,
                ) -> $crate::firestore::FirestoreResult<Self> {
                    codec.decode_record(value)
                }

                fn from_null() -> $crate::firestore::FirestoreResult<Self> {
                    Ok(<$ty as ::std::default::Default>::default())
                }

                fn patch_value(
                    &mut self,
                    value: &$crate::firestore::FirestoreValue,
                    codec: &$crate::firestore::codec::Codec,
                ) -> $crate::firestore::FirestoreResult<bool> {
                    codec.apply_record(self, value)
                }
            }
        )+
    };
}

/// Implements `FieldCodec` for types that are only ever converted by a registered
/// `ValueConverter`; using such a type with a codec lacking the converter is a conversion error.
#[macro_export]
macro_rules! impl_converted_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::firestore::codec::FieldCodec for $ty {
                fn encode_value(
                    &self,
                    _codec: &$crate::firestore::codec::Codec,
                ) -> $crate::firestore::FirestoreResult<$crate::firestore::FirestoreValue> {
                    Err($crate::firestore::codec::missing_converter::<$ty>())
                }

                fn decode_value(
                    _value: &$crate::firestore::FirestoreValue,
                    _codec: &$crate::firestore::codec::Codec,
                ) -> $crate::firestore::FirestoreResult<Self> {
                    Err($crate::firestore::codec::missing_converter::<$ty>())
                }

                fn from_null() -> $crate::firestore::FirestoreResult<Self> {
                    Err($crate::firestore::codec::missing_converter::<$ty>())
                }
            }
        )+
    };
}
