use std::collections::BTreeMap;

use serde_json::{json, Value as JsonValue};

use crate::firestore::api::{Document, DocumentReference};
use crate::firestore::error::{malformed_payload, FirestoreResult};
use crate::firestore::model::{DatabaseId, FieldPath, GeoPoint, Timestamp};
use crate::firestore::remote::datastore::{
    QueryResultEntry, RunQueryRequest, RunQueryResponse, TransactionSelector, WriteOperation,
};
use crate::firestore::remote::structured_query::encode_structured_query;
use crate::firestore::value::{BytesValue, FirestoreValue, MapValue, ValueKind};

/// Translates between the engine's model and the Firestore REST (JSON-mapped protobuf) format.
#[derive(Clone, Debug)]
pub struct JsonProtoSerializer {
    database_id: DatabaseId,
}

impl JsonProtoSerializer {
    pub fn new(database_id: DatabaseId) -> Self {
        Self { database_id }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn encode_value(&self, value: &FirestoreValue) -> JsonValue {
        encode_value(value)
    }

    pub fn decode_value(&self, value: &JsonValue) -> FirestoreResult<FirestoreValue> {
        decode_value(value)
    }

    pub fn encode_fields(&self, map: &MapValue) -> JsonValue {
        encode_map_fields(map)
    }

    /// `{name, fields}`; server timestamps are never sent.
    pub fn encode_document(&self, reference: &DocumentReference, fields: &MapValue) -> JsonValue {
        json!({
            "name": reference.resource_name(),
            "fields": encode_map_fields(fields),
        })
    }

    pub fn decode_document(&self, value: &JsonValue) -> FirestoreResult<Document> {
        let name = value
            .get("name")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| malformed_payload("document is missing 'name'"))?;
        let reference = DocumentReference::from_resource_name(name)
            .map_err(|err| malformed_payload(err.message().to_string()))?;
        let fields = match value.get("fields") {
            Some(fields) => decode_fields_object(fields)?,
            // Document exists but has no user fields.
            None => MapValue::default(),
        };
        let create_time = decode_optional_timestamp(value.get("createTime"))?;
        let update_time = decode_optional_timestamp(value.get("updateTime"))?;
        Ok(Document::new(reference, fields).with_times(create_time, update_time))
    }

    pub fn encode_run_query_body(&self, request: &RunQueryRequest) -> JsonValue {
        let mut body = serde_json::Map::new();
        body.insert(
            "structuredQuery".to_string(),
            encode_structured_query(self, &request.query),
        );
        match &request.transaction {
            TransactionSelector::None => {}
            TransactionSelector::Existing(token) => {
                body.insert("transaction".to_string(), json!(token));
            }
            TransactionSelector::Begin => {
                body.insert("newTransaction".to_string(), json!({}));
            }
        }
        JsonValue::Object(body)
    }

    /// Decodes the array of stream messages returned by `runQuery`.
    pub fn decode_run_query_response(&self, value: &JsonValue) -> FirestoreResult<RunQueryResponse> {
        let messages = value
            .as_array()
            .ok_or_else(|| malformed_payload("runQuery response must be an array"))?;
        let mut response = RunQueryResponse::default();
        for message in messages {
            if let Some(token) = message.get("transaction") {
                let token = token
                    .as_str()
                    .ok_or_else(|| malformed_payload("'transaction' must be a string"))?;
                response.transaction.get_or_insert_with(|| token.to_string());
            }
            let document = message
                .get("document")
                .map(|document| self.decode_document(document))
                .transpose()?;
            let read_time = decode_optional_timestamp(message.get("readTime"))?;
            let skipped_results = match message.get("skippedResults") {
                Some(skipped) => decode_count(skipped)?,
                None => 0,
            };
            if document.is_none() && read_time.is_none() && skipped_results == 0 {
                continue;
            }
            response.entries.push(QueryResultEntry {
                document,
                read_time,
                skipped_results,
            });
        }
        Ok(response)
    }

    pub fn encode_commit_body(&self, writes: &[WriteOperation], transaction: Option<&str>) -> JsonValue {
        let encoded: Vec<JsonValue> = writes.iter().map(|write| self.encode_write(write)).collect();
        let mut body = serde_json::Map::new();
        body.insert("writes".to_string(), JsonValue::Array(encoded));
        if let Some(token) = transaction {
            body.insert("transaction".to_string(), json!(token));
        }
        JsonValue::Object(body)
    }

    pub fn encode_write(&self, write: &WriteOperation) -> JsonValue {
        match write {
            WriteOperation::Set {
                reference,
                data,
                mask,
            } => {
                let mut encoded = serde_json::Map::new();
                encoded.insert("update".to_string(), self.encode_document(reference, data));
                if let Some(mask) = mask {
                    encoded.insert("updateMask".to_string(), encode_mask(mask));
                }
                JsonValue::Object(encoded)
            }
            WriteOperation::Update {
                reference,
                data,
                field_paths,
            } => json!({
                "update": self.encode_document(reference, data),
                "updateMask": encode_mask(field_paths),
                "currentDocument": { "exists": true },
            }),
            WriteOperation::Delete { reference } => json!({
                "delete": reference.resource_name(),
            }),
        }
    }
}

fn encode_mask(field_paths: &[FieldPath]) -> JsonValue {
    let paths: Vec<String> = field_paths.iter().map(FieldPath::escaped_string).collect();
    json!({ "fieldPaths": paths })
}

fn encode_map_fields(map: &MapValue) -> JsonValue {
    let fields: serde_json::Map<String, JsonValue> = map
        .fields()
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect();
    JsonValue::Object(fields)
}

fn encode_value(value: &FirestoreValue) -> JsonValue {
    match value.kind() {
        ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
        ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
        ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
        ValueKind::Double(double) => encode_double(*double),
        ValueKind::Timestamp(timestamp) => json!({ "timestampValue": timestamp.to_rfc3339() }),
        ValueKind::String(string) => json!({ "stringValue": string }),
        ValueKind::Bytes(bytes) => json!({ "bytesValue": bytes.to_base64() }),
        ValueKind::Reference(reference) => json!({ "referenceValue": reference }),
        ValueKind::GeoPoint(point) => json!({
            "geoPointValue": {
                "latitude": point.latitude(),
                "longitude": point.longitude(),
            }
        }),
        ValueKind::Array(array) => {
            let values = array.values().iter().map(encode_value).collect::<Vec<_>>();
            json!({ "arrayValue": { "values": values } })
        }
        ValueKind::Map(map) => json!({
            "mapValue": {
                "fields": encode_map_fields(map)
            }
        }),
    }
}

// JSON numbers cannot carry NaN or infinities; the proto3 JSON mapping spells them as strings.
fn encode_double(value: f64) -> JsonValue {
    if value.is_nan() {
        json!({ "doubleValue": "NaN" })
    } else if value.is_infinite() {
        json!({ "doubleValue": if value > 0.0 { "Infinity" } else { "-Infinity" } })
    } else {
        json!({ "doubleValue": value })
    }
}

fn decode_fields_object(value: &JsonValue) -> FirestoreResult<MapValue> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed_payload("'fields' must be an object"))?;
    let mut fields = BTreeMap::new();
    for (key, value) in object {
        fields.insert(key.clone(), decode_value(value)?);
    }
    Ok(MapValue::new(fields))
}

fn decode_value(value: &JsonValue) -> FirestoreResult<FirestoreValue> {
    let object = value
        .as_object()
        .ok_or_else(|| malformed_payload("expected a typed value object"))?;
    let (tag, inner) = match object.iter().next() {
        Some(entry) if object.len() == 1 => entry,
        _ => {
            return Err(malformed_payload(format!(
                "a typed value must carry exactly one tag, found {}",
                object.len()
            )))
        }
    };

    match tag.as_str() {
        "nullValue" => Ok(FirestoreValue::null()),
        "booleanValue" => inner
            .as_bool()
            .map(FirestoreValue::from_bool)
            .ok_or_else(|| malformed_payload("booleanValue must be a bool")),
        "integerValue" => {
            let parsed = match inner {
                JsonValue::String(text) => text
                    .parse::<i64>()
                    .map_err(|err| malformed_payload(format!("invalid integerValue '{text}': {err}")))?,
                JsonValue::Number(number) => number
                    .as_i64()
                    .ok_or_else(|| malformed_payload("integerValue out of range"))?,
                _ => return Err(malformed_payload("integerValue must be a string or number")),
            };
            Ok(FirestoreValue::from_integer(parsed))
        }
        "doubleValue" => {
            let parsed = match inner {
                JsonValue::Number(number) => number
                    .as_f64()
                    .ok_or_else(|| malformed_payload("invalid doubleValue"))?,
                JsonValue::String(text) => match text.as_str() {
                    "NaN" => f64::NAN,
                    "Infinity" => f64::INFINITY,
                    "-Infinity" => f64::NEG_INFINITY,
                    other => other
                        .parse::<f64>()
                        .map_err(|err| malformed_payload(format!("invalid doubleValue '{other}': {err}")))?,
                },
                _ => return Err(malformed_payload("doubleValue must be a number or string")),
            };
            Ok(FirestoreValue::from_double(parsed))
        }
        "timestampValue" => {
            let text = inner
                .as_str()
                .ok_or_else(|| malformed_payload("timestampValue must be a string"))?;
            Ok(FirestoreValue::from_timestamp(parse_timestamp(text)?))
        }
        "stringValue" => inner
            .as_str()
            .map(FirestoreValue::from_string)
            .ok_or_else(|| malformed_payload("stringValue must be a string")),
        "bytesValue" => {
            let text = inner
                .as_str()
                .ok_or_else(|| malformed_payload("bytesValue must be a base64 string"))?;
            let bytes = BytesValue::from_base64(text)
                .map_err(|err| malformed_payload(format!("invalid bytesValue: {err}")))?;
            Ok(FirestoreValue::from_bytes(bytes))
        }
        "referenceValue" => inner
            .as_str()
            .map(FirestoreValue::from_reference)
            .ok_or_else(|| malformed_payload("referenceValue must be a string")),
        "geoPointValue" => {
            // Zero coordinates are omitted by the proto3 JSON mapping.
            let coordinate = |name: &str| -> FirestoreResult<f64> {
                match inner.get(name) {
                    None => Ok(0.0),
                    Some(value) => value
                        .as_f64()
                        .ok_or_else(|| malformed_payload(format!("geoPointValue.{name} must be a number"))),
                }
            };
            let point = GeoPoint::new(coordinate("latitude")?, coordinate("longitude")?)
                .map_err(|err| malformed_payload(err.message().to_string()))?;
            Ok(FirestoreValue::from_geo_point(point))
        }
        "arrayValue" => {
            let values = match inner.get("values") {
                None => Vec::new(),
                Some(values) => values
                    .as_array()
                    .ok_or_else(|| malformed_payload("arrayValue.values must be an array"))?
                    .iter()
                    .map(decode_value)
                    .collect::<FirestoreResult<Vec<_>>>()?,
            };
            Ok(FirestoreValue::from_array(values))
        }
        "mapValue" => {
            let map = match inner.get("fields") {
                None => MapValue::default(),
                Some(fields) => decode_fields_object(fields)?,
            };
            Ok(FirestoreValue::from_map_value(map))
        }
        other => Err(malformed_payload(format!("unknown value tag '{other}'"))),
    }
}

fn parse_timestamp(text: &str) -> FirestoreResult<Timestamp> {
    Timestamp::parse_rfc3339(text).map_err(|err| malformed_payload(err.message().to_string()))
}

fn decode_optional_timestamp(value: Option<&JsonValue>) -> FirestoreResult<Option<Timestamp>> {
    match value {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(text)) if text.is_empty() => Ok(None),
        Some(JsonValue::String(text)) => parse_timestamp(text).map(Some),
        Some(_) => Err(malformed_payload("timestamps must be RFC 3339 strings")),
    }
}

fn decode_count(value: &JsonValue) -> FirestoreResult<u32> {
    let parsed = match value {
        JsonValue::Number(number) => number.as_u64(),
        JsonValue::String(text) => text.parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|count| u32::try_from(count).ok())
        .ok_or_else(|| malformed_payload("skippedResults must be a non-negative count"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::CollectionReference;
    use crate::firestore::error::FirestoreErrorCode;

    fn serializer() -> JsonProtoSerializer {
        JsonProtoSerializer::new(DatabaseId::default("demo"))
    }

    #[test]
    fn encodes_every_tag() {
        let serializer = serializer();
        let point = GeoPoint::new(1.5, -2.0).unwrap();
        let cases = vec![
            (FirestoreValue::null(), json!({ "nullValue": null })),
            (FirestoreValue::from_bool(true), json!({ "booleanValue": true })),
            (FirestoreValue::from_integer(-42), json!({ "integerValue": "-42" })),
            (FirestoreValue::from_double(2.5), json!({ "doubleValue": 2.5 })),
            (
                FirestoreValue::from_timestamp(Timestamp::new(0, 5)),
                json!({ "timestampValue": "1970-01-01T00:00:00.000000005Z" }),
            ),
            (FirestoreValue::from_string("hi"), json!({ "stringValue": "hi" })),
            (
                FirestoreValue::from_bytes(BytesValue::from(vec![1u8, 2, 3])),
                json!({ "bytesValue": "AQID" }),
            ),
            (
                FirestoreValue::from_geo_point(point),
                json!({ "geoPointValue": { "latitude": 1.5, "longitude": -2.0 } }),
            ),
            (
                FirestoreValue::from_array(Vec::new()),
                json!({ "arrayValue": { "values": [] } }),
            ),
        ];
        for (value, expected) in cases {
            assert_eq!(serializer.encode_value(&value), expected);
            assert!(serializer.decode_value(&expected).unwrap().same_as(&value));
        }
    }

    #[test]
    fn nan_travels_as_string() {
        let serializer = serializer();
        let encoded = serializer.encode_value(&FirestoreValue::from_double(f64::NAN));
        assert_eq!(encoded, json!({ "doubleValue": "NaN" }));
        assert!(serializer.decode_value(&encoded).unwrap().is_nan());
    }

    #[test]
    fn array_without_values_is_present_and_empty() {
        let decoded = serializer().decode_value(&json!({ "arrayValue": {} })).unwrap();
        assert_eq!(decoded.as_array().map(|array| array.len()), Some(0));
    }

    #[test]
    fn rejects_unknown_and_ambiguous_tags() {
        let serializer = serializer();
        let err = serializer.decode_value(&json!({ "fooValue": 1 })).unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::Internal);
        assert!(serializer
            .decode_value(&json!({ "stringValue": "a", "booleanValue": true }))
            .is_err());
        assert!(serializer
            .decode_value(&json!({ "integerValue": "12x" }))
            .is_err());
    }

    #[test]
    fn decodes_documents_with_times() {
        let document = serializer()
            .decode_document(&json!({
                "name": "projects/demo/databases/(default)/documents/rooms/eros",
                "fields": { "size": { "integerValue": "4" } },
                "createTime": "2024-01-01T00:00:00Z",
                "updateTime": "2024-01-02T00:00:00.5Z"
            }))
            .unwrap();
        assert_eq!(document.id(), "eros");
        assert_eq!(
            document.fields().get("size"),
            Some(&FirestoreValue::from_integer(4))
        );
        assert_eq!(document.update_time().map(|time| time.nanos), Some(500_000_000));

        let empty = serializer()
            .decode_document(&json!({ "name": "projects/demo/databases/(default)/documents/rooms/x" }))
            .unwrap();
        assert!(empty.fields().is_empty());
    }

    #[test]
    fn run_query_body_carries_transaction_selector() {
        let serializer = serializer();
        let rooms = CollectionReference::from_path(DatabaseId::default("demo"), "rooms").unwrap();
        let query = rooms.query().compile().unwrap();

        let begin = serializer.encode_run_query_body(&RunQueryRequest {
            query: query.clone(),
            transaction: TransactionSelector::Begin,
        });
        assert_eq!(begin["newTransaction"], json!({}));
        assert!(begin.get("transaction").is_none());

        let existing = serializer.encode_run_query_body(&RunQueryRequest {
            query,
            transaction: TransactionSelector::Existing("tx-1".to_string()),
        });
        assert_eq!(existing["transaction"], json!("tx-1"));
    }

    #[test]
    fn decodes_run_query_stream() {
        let response = serializer()
            .decode_run_query_response(&json!([
                { "transaction": "tx-9", "readTime": "2024-01-01T00:00:00Z" },
                {
                    "document": {
                        "name": "projects/demo/databases/(default)/documents/rooms/a",
                        "fields": {}
                    },
                    "readTime": "2024-01-01T00:00:00Z",
                    "skippedResults": 2
                },
                {}
            ]))
            .unwrap();
        assert_eq!(response.transaction.as_deref(), Some("tx-9"));
        assert_eq!(response.entries.len(), 2);
        assert!(response.entries[0].document.is_none());
        assert_eq!(response.skipped_results(), 2);
    }

    #[test]
    fn encodes_writes() {
        let serializer = serializer();
        let reference = DocumentReference::from_path(DatabaseId::default("demo"), "rooms/eros").unwrap();
        let mut data = MapValue::default();
        data.insert("size", FirestoreValue::from_integer(4));

        let update = serializer.encode_write(&WriteOperation::Update {
            reference: reference.clone(),
            data,
            field_paths: vec![FieldPath::from_dot_separated("size").unwrap()],
        });
        assert_eq!(update["updateMask"], json!({ "fieldPaths": ["size"] }));
        assert_eq!(update["currentDocument"], json!({ "exists": true }));

        let body = serializer.encode_commit_body(
            &[WriteOperation::Delete { reference }],
            Some("tx-2"),
        );
        assert_eq!(
            body,
            json!({
                "writes": [{ "delete": "projects/demo/databases/(default)/documents/rooms/eros" }],
                "transaction": "tx-2"
            })
        );
    }
}
