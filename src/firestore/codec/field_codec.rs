use std::any::type_name;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;

use crate::firestore::api::DocumentReference;
use crate::firestore::error::{conversion_failed, FirestoreError, FirestoreResult};
use crate::firestore::model::{GeoPoint, Timestamp};
use crate::firestore::value::{BytesValue, FirestoreValue, MapValue, ValueKind};

use super::codec::Codec;

/// Built-in conversion between a Rust type and wire values.
///
/// [`Codec`] consults registered converters first and routes `Null` to
/// [`FieldCodec::from_null`], so implementations only see non-null values in
/// [`FieldCodec::decode_value`] and [`FieldCodec::patch_value`].
pub trait FieldCodec: Send + Sync + 'static {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue>;

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self>
    where
        Self: Sized;

    /// The value a wire `Null` decodes to.
    fn from_null() -> FirestoreResult<Self>
    where
        Self: Sized;

    /// Updates `self` from `value`, returning whether the wire representation changed.
    fn patch_value(&mut self, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<bool>
    where
        Self: Sized,
    {
        let next = Self::decode_value(value, codec)?;
        if next.encode_value(codec)?.same_as(&self.encode_value(codec)?) {
            return Ok(false);
        }
        *self = next;
        Ok(true)
    }
}

pub(crate) fn mismatch<T: ?Sized>(value: &FirestoreValue) -> FirestoreError {
    conversion_failed(format!(
        "Cannot convert a {} value into {}",
        value.kind_name(),
        type_name::<T>()
    ))
}

impl FieldCodec for bool {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_bool(*self))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::Boolean(flag) => Ok(*flag),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(false)
    }
}

// 2^63: the smallest double that no longer fits an i64.
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn integral_double(value: f64) -> Option<i64> {
    let in_range = value >= -I64_UPPER_BOUND && value < I64_UPPER_BOUND;
    if value.is_finite() && value.fract() == 0.0 && in_range {
        Some(value as i64)
    } else {
        None
    }
}

macro_rules! impl_integer_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldCodec for $ty {
                fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
                    i64::try_from(*self)
                        .map(FirestoreValue::from_integer)
                        .map_err(|_| {
                            conversion_failed(format!(
                                "{} value {} does not fit a 64-bit signed integer",
                                stringify!($ty),
                                self
                            ))
                        })
                }

                fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
                    let wide = match value.kind() {
                        ValueKind::Integer(number) => *number,
                        ValueKind::Double(number) => {
                            integral_double(*number).ok_or_else(|| mismatch::<Self>(value))?
                        }
                        _ => return Err(mismatch::<Self>(value)),
                    };
                    <$ty>::try_from(wide).map_err(|_| {
                        conversion_failed(format!(
                            "Integer {wide} is out of range for {}",
                            stringify!($ty)
                        ))
                    })
                }

                fn from_null() -> FirestoreResult<Self> {
                    Ok(0)
                }
            }
        )*
    };
}

impl_integer_codec!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldCodec for $ty {
                fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
                    Ok(FirestoreValue::from_double(f64::from(*self)))
                }

                fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
                    match value.kind() {
                        ValueKind::Double(number) => Ok(*number as $ty),
                        ValueKind::Integer(number) => Ok(*number as $ty),
                        _ => Err(mismatch::<Self>(value)),
                    }
                }

                fn from_null() -> FirestoreResult<Self> {
                    Ok(0.0)
                }
            }
        )*
    };
}

impl_float_codec!(f32, f64);

impl FieldCodec for Decimal {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_string(self.to_string()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::String(text) => Decimal::from_str(text)
                .map_err(|err| conversion_failed(format!("Invalid decimal '{text}': {err}"))),
            ValueKind::Integer(number) => Ok(Decimal::from(*number)),
            ValueKind::Double(number) => Decimal::try_from(*number)
                .map_err(|err| conversion_failed(format!("Invalid decimal {number}: {err}"))),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(Decimal::ZERO)
    }
}

impl FieldCodec for String {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_string(self.clone()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::String(text) => Ok(text.clone()),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(String::new())
    }
}

impl FieldCodec for char {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_string(self.to_string()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        let text = value.as_str().ok_or_else(|| mismatch::<Self>(value))?;
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(ch), None) => Ok(ch),
            _ => Err(conversion_failed(format!(
                "Expected a single character, found '{text}'"
            ))),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok('\0')
    }
}

impl FieldCodec for Timestamp {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_timestamp(*self))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::Timestamp(timestamp) => Ok(*timestamp),
            ValueKind::String(text) => Timestamp::parse_rfc3339(text),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(Timestamp::default())
    }
}

impl FieldCodec for DateTime<Utc> {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_timestamp(Timestamp::from_datetime(self)))
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        Timestamp::decode_value(value, codec)?.to_datetime()
    }

    fn from_null() -> FirestoreResult<Self> {
        Timestamp::default().to_datetime()
    }
}

impl FieldCodec for DateTime<FixedOffset> {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_timestamp(Timestamp::from_datetime(self)))
    }

    /// Decoded instants carry a zero offset; the wire keeps no zone.
    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        Ok(DateTime::<FixedOffset>::from(
            Timestamp::decode_value(value, codec)?.to_datetime()?,
        ))
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(DateTime::<FixedOffset>::from(Timestamp::default().to_datetime()?))
    }
}

impl FieldCodec for BytesValue {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_bytes(self.clone()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::Bytes(bytes) => Ok(bytes.clone()),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(BytesValue::default())
    }
}

impl FieldCodec for bytes::Bytes {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_bytes(BytesValue::from(self.clone())))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::Bytes(bytes) => Ok(bytes::Bytes::copy_from_slice(bytes.as_slice())),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(bytes::Bytes::new())
    }
}

impl FieldCodec for GeoPoint {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_geo_point(*self))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::GeoPoint(point) => Ok(*point),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(GeoPoint::default())
    }
}

impl FieldCodec for DocumentReference {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_reference(self.resource_name()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        match value.kind() {
            ValueKind::Reference(name) => DocumentReference::from_resource_name(name)
                .map_err(|err| conversion_failed(err.message().to_string())),
            _ => Err(mismatch::<Self>(value)),
        }
    }

    /// References have no empty value; nullable references are `Option<DocumentReference>`.
    fn from_null() -> FirestoreResult<Self> {
        Err(conversion_failed(
            "Cannot assign null to a non-optional DocumentReference",
        ))
    }
}

impl FieldCodec for FirestoreValue {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(self.clone())
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        Ok(value.clone())
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(FirestoreValue::null())
    }
}

impl FieldCodec for MapValue {
    fn encode_value(&self, _codec: &Codec) -> FirestoreResult<FirestoreValue> {
        Ok(FirestoreValue::from_map_value(self.clone()))
    }

    fn decode_value(value: &FirestoreValue, _codec: &Codec) -> FirestoreResult<Self> {
        value.as_map().cloned().ok_or_else(|| mismatch::<Self>(value))
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(MapValue::default())
    }
}

impl<T: FieldCodec> FieldCodec for Option<T> {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        match self {
            Some(inner) => codec.encode(inner),
            None => Ok(FirestoreValue::null()),
        }
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        codec.decode(value).map(Some)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(None)
    }

    fn patch_value(&mut self, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<bool> {
        match self {
            Some(inner) => codec.apply(inner, value),
            None => {
                *self = Some(codec.decode(value)?);
                Ok(true)
            }
        }
    }
}

fn encode_elements<'a, T, I>(elements: I, codec: &Codec) -> FirestoreResult<FirestoreValue>
where
    T: FieldCodec,
    I: IntoIterator<Item = &'a T>,
{
    let values = elements
        .into_iter()
        .map(|element| codec.encode(element))
        .collect::<FirestoreResult<Vec<_>>>()?;
    Ok(FirestoreValue::from_array(values))
}

fn decode_elements<T, C>(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<C>
where
    T: FieldCodec,
    C: FromIterator<T>,
{
    let array = value.as_array().ok_or_else(|| mismatch::<C>(value))?;
    array
        .values()
        .iter()
        .map(|element| codec.decode::<T>(element))
        .collect()
}

impl<T: FieldCodec> FieldCodec for Vec<T> {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_elements(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_elements(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(Vec::new())
    }
}

impl<T: FieldCodec> FieldCodec for VecDeque<T> {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_elements(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_elements(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(VecDeque::new())
    }
}

impl<T: FieldCodec + Eq + Hash> FieldCodec for HashSet<T> {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_elements(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_elements(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(HashSet::new())
    }

    /// Set iteration order is unstable, so membership decides change.
    fn patch_value(&mut self, value: &FirestoreValue, codec: &Codec) -> FirestoreResult<bool> {
        let next: HashSet<T> = Self::decode_value(value, codec)?;
        if next == *self {
            return Ok(false);
        }
        *self = next;
        Ok(true)
    }
}

impl<T: FieldCodec + Ord> FieldCodec for BTreeSet<T> {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_elements(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_elements(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(BTreeSet::new())
    }
}

impl<T: FieldCodec, const N: usize> FieldCodec for [T; N] {
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_elements(self.iter(), codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        let elements: Vec<T> = decode_elements(value, codec)?;
        let length = elements.len();
        elements.try_into().map_err(|_| {
            conversion_failed(format!(
                "Expected an array of exactly {N} elements, found {length}"
            ))
        })
    }

    fn from_null() -> FirestoreResult<Self> {
        let elements = (0..N)
            .map(|_| T::from_null())
            .collect::<FirestoreResult<Vec<T>>>()?;
        elements
            .try_into()
            .map_err(|_| conversion_failed("Fixed array length mismatch"))
    }
}

/// Dictionary keys stored as wire map field names.
pub trait MapKey: Sized {
    fn to_map_key(&self) -> String;

    fn from_map_key(key: &str) -> FirestoreResult<Self>;
}

impl MapKey for String {
    fn to_map_key(&self) -> String {
        self.clone()
    }

    fn from_map_key(key: &str) -> FirestoreResult<Self> {
        Ok(key.to_string())
    }
}

macro_rules! impl_parsed_map_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MapKey for $ty {
                fn to_map_key(&self) -> String {
                    self.to_string()
                }

                fn from_map_key(key: &str) -> FirestoreResult<Self> {
                    key.parse::<$ty>().map_err(|_| {
                        conversion_failed(format!(
                            "Map key '{key}' is not a valid {}",
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

impl_parsed_map_key!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, bool, char);

fn encode_entries<'a, K, V, I>(entries: I, codec: &Codec) -> FirestoreResult<FirestoreValue>
where
    K: MapKey + 'a,
    V: FieldCodec,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut fields = BTreeMap::new();
    for (key, value) in entries {
        fields.insert(key.to_map_key(), codec.encode(value)?);
    }
    Ok(FirestoreValue::from_map(fields))
}

fn decode_entries<K, V, C>(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<C>
where
    K: MapKey,
    V: FieldCodec,
    C: FromIterator<(K, V)>,
{
    let map = value.as_map().ok_or_else(|| mismatch::<C>(value))?;
    map.fields()
        .iter()
        .map(|(key, entry)| Ok((K::from_map_key(key)?, codec.decode::<V>(entry)?)))
        .collect()
}

impl<K, V> FieldCodec for HashMap<K, V>
where
    K: MapKey + Eq + Hash + Send + Sync + 'static,
    V: FieldCodec,
{
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_entries(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_entries(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(HashMap::new())
    }
}

impl<K, V> FieldCodec for BTreeMap<K, V>
where
    K: MapKey + Ord + Send + Sync + 'static,
    V: FieldCodec,
{
    fn encode_value(&self, codec: &Codec) -> FirestoreResult<FirestoreValue> {
        encode_entries(self, codec)
    }

    fn decode_value(value: &FirestoreValue, codec: &Codec) -> FirestoreResult<Self> {
        decode_entries(value, codec)
    }

    fn from_null() -> FirestoreResult<Self> {
        Ok(BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::model::DatabaseId;

    fn round_trip<T: FieldCodec + PartialEq + std::fmt::Debug>(value: T) {
        let codec = Codec::new();
        let encoded = codec.encode(&value).unwrap();
        let decoded: T = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn primitives_round_trip() {
        round_trip(true);
        round_trip(-7i8);
        round_trip(i16::MIN);
        round_trip(i32::MAX);
        round_trip(i64::MIN);
        round_trip(250u8);
        round_trip(u16::MAX);
        round_trip(u32::MAX);
        round_trip(i64::MAX as u64);
        round_trip(12usize);
        round_trip(-3isize);
        round_trip(1.5f32);
        round_trip(-0.25f64);
        round_trip(Decimal::from_str("12.3400").unwrap());
        round_trip(Timestamp::new(1_700_000_000, 123_456_789));
        round_trip("hello".to_string());
        round_trip('x');
        round_trip(BytesValue::from(vec![0u8, 1, 255]));
        round_trip(bytes::Bytes::from_static(b"raw"));
        round_trip(GeoPoint::new(37.77, -122.41).unwrap());
        round_trip(
            DocumentReference::from_path(DatabaseId::default("demo"), "cities/sf").unwrap(),
        );
    }

    #[test]
    fn datetimes_normalise_to_utc() {
        let offset = DateTime::parse_from_rfc3339("2024-03-01T10:00:00.5+02:00").unwrap();
        let codec = Codec::new();
        let encoded = codec.encode(&offset).unwrap();
        match encoded.kind() {
            ValueKind::Timestamp(ts) => assert_eq!(ts.to_rfc3339(), "2024-03-01T08:00:00.500000000Z"),
            other => panic!("unexpected {other:?}"),
        }
        let decoded: DateTime<FixedOffset> = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, offset);
        let utc: DateTime<Utc> = codec.decode(&encoded).unwrap();
        assert_eq!(utc, offset.with_timezone(&Utc));
    }

    #[test]
    fn integer_bounds_and_coercion() {
        let codec = Codec::new();
        assert!(codec.encode(&u64::MAX).is_err());
        assert_eq!(codec.decode::<i32>(&FirestoreValue::from_double(42.0)).unwrap(), 42);
        assert!(codec.decode::<i32>(&FirestoreValue::from_double(42.5)).is_err());
        assert!(codec.decode::<u8>(&FirestoreValue::from_integer(256)).is_err());
        assert_eq!(codec.decode::<f64>(&FirestoreValue::from_integer(3)).unwrap(), 3.0);
        let err = codec.decode::<bool>(&FirestoreValue::from_string("yes")).unwrap_err();
        assert_eq!(err.code_str(), "firestore/conversion-failed");
    }

    #[test]
    fn collections_keep_shape() {
        round_trip(vec![1i64, 2, 3]);
        round_trip(VecDeque::from(vec!["a".to_string()]));
        round_trip(BTreeSet::from([3u32, 1, 2]));
        round_trip(HashSet::from([true]));
        round_trip([1u8, 2, 3]);
        round_trip(HashMap::from([(1u32, "one".to_string())]));
        round_trip(BTreeMap::from([("k".to_string(), vec![0.5f64])]));
        round_trip(Some(5i64));
        round_trip(None::<String>);

        let codec = Codec::new();
        let empty = codec.encode(&Vec::<i64>::new()).unwrap();
        assert_eq!(empty, FirestoreValue::from_array(Vec::new()));
        let short = FirestoreValue::from_array(vec![FirestoreValue::from_integer(1)]);
        assert!(codec.decode::<[u8; 2]>(&short).is_err());
    }

    #[test]
    fn null_handling() {
        let codec = Codec::new();
        let null = FirestoreValue::null();
        assert_eq!(codec.decode::<Option<i64>>(&null).unwrap(), None);
        assert_eq!(codec.decode::<i64>(&null).unwrap(), 0);
        assert_eq!(codec.decode::<Vec<String>>(&null).unwrap(), Vec::<String>::new());
        assert!(codec.decode::<DocumentReference>(&null).is_err());
        assert_eq!(codec.decode::<Option<DocumentReference>>(&null).unwrap(), None);
    }
}
