use serde_json::{json, Value as JsonValue};

use crate::firestore::api::{Bound, Filter, Projection, StructuredQuery};
use crate::firestore::model::FieldPath;
use crate::firestore::remote::serializer::JsonProtoSerializer;

/// Encodes the `structuredQuery` member of a `runQuery` request.
pub(crate) fn encode_structured_query(
    serializer: &JsonProtoSerializer,
    query: &StructuredQuery,
) -> JsonValue {
    let mut structured = serde_json::Map::new();

    match query.projection() {
        Projection::All => {}
        Projection::DocumentNameOnly => {
            structured.insert(
                "select".to_string(),
                json!({ "fields": [field_reference(&FieldPath::document_id())] }),
            );
        }
        Projection::Fields(fields) => {
            let entries: Vec<_> = fields.iter().map(field_reference).collect();
            structured.insert("select".to_string(), json!({ "fields": entries }));
        }
    }

    structured.insert(
        "from".to_string(),
        json!([{
            "collectionId": query.collection_id(),
            "allDescendants": query.all_descendants(),
        }]),
    );

    if !query.filters().is_empty() {
        let filters: Vec<_> = query
            .filters()
            .iter()
            .map(|filter| encode_filter(serializer, filter))
            .collect();
        structured.insert(
            "where".to_string(),
            json!({
                "compositeFilter": {
                    "op": "AND",
                    "filters": filters
                }
            }),
        );
    }

    if !query.order_by().is_empty() {
        let orders: Vec<_> = query
            .order_by()
            .iter()
            .map(|order| {
                json!({
                    "field": field_reference(order.field()),
                    "direction": order.direction().as_str(),
                })
            })
            .collect();
        structured.insert("orderBy".to_string(), JsonValue::Array(orders));
    }

    if let Some(start) = query.start_at() {
        structured.insert(
            "startAt".to_string(),
            encode_cursor(serializer, start, start.inclusive()),
        );
    }

    if let Some(end) = query.end_at() {
        structured.insert(
            "endAt".to_string(),
            encode_cursor(serializer, end, !end.inclusive()),
        );
    }

    if query.offset() > 0 {
        structured.insert("offset".to_string(), json!(query.offset()));
    }

    if let Some(limit) = query.limit() {
        structured.insert("limit".to_string(), json!(limit));
    }

    JsonValue::Object(structured)
}

fn field_reference(field: &FieldPath) -> JsonValue {
    json!({ "fieldPath": field.escaped_string() })
}

fn encode_filter(serializer: &JsonProtoSerializer, filter: &Filter) -> JsonValue {
    match filter {
        Filter::Field(filter) => json!({
            "fieldFilter": {
                "field": field_reference(filter.field()),
                "op": filter.operator().as_str(),
                "value": serializer.encode_value(filter.value())
            }
        }),
        Filter::Unary(filter) => json!({
            "unaryFilter": {
                "op": filter.operator().as_str(),
                "field": field_reference(filter.field())
            }
        }),
    }
}

fn encode_cursor(serializer: &JsonProtoSerializer, bound: &Bound, before: bool) -> JsonValue {
    json!({
        "values": bound
            .values()
            .iter()
            .map(|value| serializer.encode_value(value))
            .collect::<Vec<_>>(),
        "before": before,
    })
}
