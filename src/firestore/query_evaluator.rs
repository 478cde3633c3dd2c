use std::cmp::Ordering;

use crate::firestore::api::{
    Bound, Document, FieldFilter, Filter, FilterOperator, OrderBy, OrderDirection, Projection,
    StructuredQuery, UnaryFilter, UnaryOperator,
};
use crate::firestore::model::FieldPath;
use crate::firestore::value::{ArrayValue, FirestoreValue, MapValue, ValueKind};

/// Documents selected by a query together with the number the offset skipped.
pub(crate) struct Evaluation {
    pub(crate) documents: Vec<Document>,
    pub(crate) skipped: u32,
}

/// Applies a structured query to candidate documents with the backend's semantics: collection
/// scope, filters, ordering (documents missing an ordered field are excluded), cursors, offset,
/// limit and projection.
pub(crate) fn apply_query_to_documents<I>(documents: I, query: &StructuredQuery) -> Evaluation
where
    I: IntoIterator<Item = Document>,
{
    let order_by = query.order_by();
    let mut matching: Vec<Document> = documents
        .into_iter()
        .filter(|document| in_scope(document, query))
        .filter(|document| query.filters().iter().all(|filter| matches_filter(document, filter)))
        .filter(|document| {
            order_by
                .iter()
                .all(|order| document.order_value(order.field()).is_some())
        })
        .collect();

    matching.sort_by(|left, right| compare_documents(left, right, order_by));

    if let Some(bound) = query.start_at() {
        matching.retain(|document| !before_start(document, bound, order_by));
    }
    if let Some(bound) = query.end_at() {
        matching.retain(|document| !after_end(document, bound, order_by));
    }

    let skipped = (query.offset() as usize).min(matching.len());
    matching.drain(..skipped);

    if let Some(limit) = query.limit() {
        matching.truncate(limit as usize);
    }

    let documents = matching
        .into_iter()
        .map(|document| project(document, query.projection()))
        .collect();

    Evaluation {
        documents,
        skipped: skipped as u32,
    }
}

fn in_scope(document: &Document, query: &StructuredQuery) -> bool {
    if document.reference().database_id() != query.database_id() {
        return false;
    }
    let path = document.reference().path();
    let parent = query.parent_path();
    if query.all_descendants() {
        path.len() > parent.len()
            && parent.is_prefix_of(path)
            && document.reference().parent().id() == query.collection_id()
    } else {
        path.without_last() == parent.child([query.collection_id().to_string()])
    }
}

fn matches_filter(document: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::Field(filter) => match document.order_value(filter.field()) {
            Some(value) => matches_field_filter(filter, &value),
            None => false,
        },
        Filter::Unary(filter) => matches_unary_filter(document, filter),
    }
}

fn matches_field_filter(filter: &FieldFilter, value: &FirestoreValue) -> bool {
    let operand = filter.value();
    match filter.operator() {
        FilterOperator::Equal => values_equal(value, operand),
        FilterOperator::NotEqual => !value.is_null() && !values_equal(value, operand),
        FilterOperator::LessThan => compare_same_type(value, operand) == Some(Ordering::Less),
        FilterOperator::LessThanOrEqual => matches!(
            compare_same_type(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        FilterOperator::GreaterThan => compare_same_type(value, operand) == Some(Ordering::Greater),
        FilterOperator::GreaterThanOrEqual => matches!(
            compare_same_type(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        FilterOperator::ArrayContains => match value.kind() {
            ValueKind::Array(array) => array_contains(array, operand),
            _ => false,
        },
        FilterOperator::ArrayContainsAny => match (value.kind(), operand.kind()) {
            (ValueKind::Array(array), ValueKind::Array(needles)) => needles
                .values()
                .iter()
                .any(|needle| array_contains(array, needle)),
            _ => false,
        },
        FilterOperator::In => match operand.kind() {
            ValueKind::Array(candidates) => array_contains(candidates, value),
            _ => false,
        },
        FilterOperator::NotIn => match operand.kind() {
            ValueKind::Array(excluded) => {
                !array_contains(excluded, &FirestoreValue::null())
                    && !value.is_null()
                    && !array_contains(excluded, value)
            }
            _ => false,
        },
    }
}

fn matches_unary_filter(document: &Document, filter: &UnaryFilter) -> bool {
    let value = document.order_value(filter.field());
    match (filter.operator(), value) {
        (UnaryOperator::IsNull, Some(value)) => value.is_null(),
        (UnaryOperator::IsNan, Some(value)) => value.is_nan(),
        (UnaryOperator::IsNotNull, Some(value)) => !value.is_null(),
        (UnaryOperator::IsNotNan, Some(value)) => !value.is_null() && !value.is_nan(),
        (_, None) => false,
    }
}

fn array_contains(array: &ArrayValue, needle: &FirestoreValue) -> bool {
    array.values().iter().any(|candidate| values_equal(candidate, needle))
}

fn values_equal(left: &FirestoreValue, right: &FirestoreValue) -> bool {
    compare_values(left, right) == Ordering::Equal
}

/// Range filters only match values of the same type; NaN never satisfies them.
fn compare_same_type(left: &FirestoreValue, right: &FirestoreValue) -> Option<Ordering> {
    if type_order(left) != type_order(right) || left.is_nan() || right.is_nan() {
        return None;
    }
    Some(compare_values(left, right))
}

fn type_order(value: &FirestoreValue) -> u8 {
    match value.kind() {
        ValueKind::Null => 0,
        ValueKind::Boolean(_) => 1,
        ValueKind::Integer(_) | ValueKind::Double(_) => 2,
        ValueKind::Timestamp(_) => 3,
        ValueKind::String(_) => 4,
        ValueKind::Bytes(_) => 5,
        ValueKind::Reference(_) => 6,
        ValueKind::GeoPoint(_) => 7,
        ValueKind::Array(_) => 8,
        ValueKind::Map(_) => 9,
    }
}

/// Total order across every value type, as used for sorting and cursors.
pub(crate) fn compare_values(left: &FirestoreValue, right: &FirestoreValue) -> Ordering {
    let by_type = type_order(left).cmp(&type_order(right));
    if by_type != Ordering::Equal {
        return by_type;
    }
    match (left.kind(), right.kind()) {
        (ValueKind::Boolean(a), ValueKind::Boolean(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Integer(b)) => a.cmp(b),
        (ValueKind::Integer(a), ValueKind::Double(b)) => compare_doubles(*a as f64, *b),
        (ValueKind::Double(a), ValueKind::Integer(b)) => compare_doubles(*a, *b as f64),
        (ValueKind::Double(a), ValueKind::Double(b)) => compare_doubles(*a, *b),
        (ValueKind::Timestamp(a), ValueKind::Timestamp(b)) => a.cmp(b),
        (ValueKind::String(a), ValueKind::String(b)) => a.cmp(b),
        (ValueKind::Bytes(a), ValueKind::Bytes(b)) => a.as_slice().cmp(b.as_slice()),
        (ValueKind::Reference(a), ValueKind::Reference(b)) => a.split('/').cmp(b.split('/')),
        (ValueKind::GeoPoint(a), ValueKind::GeoPoint(b)) => compare_doubles(a.latitude(), b.latitude())
            .then_with(|| compare_doubles(a.longitude(), b.longitude())),
        (ValueKind::Array(a), ValueKind::Array(b)) => compare_arrays(a, b),
        (ValueKind::Map(a), ValueKind::Map(b)) => compare_maps(a, b),
        _ => Ordering::Equal,
    }
}

// NaN sorts before every other number and equals itself.
fn compare_doubles(left: f64, right: f64) -> Ordering {
    match (left.is_nan(), right.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

fn compare_arrays(left: &ArrayValue, right: &ArrayValue) -> Ordering {
    for (l, r) in left.values().iter().zip(right.values()) {
        let ordering = compare_values(l, r);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn compare_maps(left: &MapValue, right: &MapValue) -> Ordering {
    for ((left_key, left_value), (right_key, right_value)) in left.fields().iter().zip(right.fields()) {
        let ordering = left_key
            .cmp(right_key)
            .then_with(|| compare_values(left_value, right_value));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    left.len().cmp(&right.len())
}

fn compare_documents(left: &Document, right: &Document, order_by: &[OrderBy]) -> Ordering {
    for order in order_by {
        let ordering = compare_field(left, right, order.field());
        let ordering = match order.direction() {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_field(left: &Document, right: &Document, field: &FieldPath) -> Ordering {
    let left = left.order_value(field).unwrap_or_else(FirestoreValue::null);
    let right = right.order_value(field).unwrap_or_else(FirestoreValue::null);
    compare_values(&left, &right)
}

fn compare_to_bound(document: &Document, bound: &Bound, order_by: &[OrderBy]) -> Ordering {
    for (order, bound_value) in order_by.iter().zip(bound.values()) {
        let value = document
            .order_value(order.field())
            .unwrap_or_else(FirestoreValue::null);
        let ordering = compare_values(&value, bound_value);
        let ordering = match order.direction() {
            OrderDirection::Ascending => ordering,
            OrderDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn before_start(document: &Document, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_to_bound(document, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Less
    } else {
        ordering != Ordering::Greater
    }
}

fn after_end(document: &Document, bound: &Bound, order_by: &[OrderBy]) -> bool {
    let ordering = compare_to_bound(document, bound, order_by);
    if bound.inclusive() {
        ordering == Ordering::Greater
    } else {
        ordering != Ordering::Less
    }
}

fn project(document: Document, projection: &Projection) -> Document {
    match projection {
        Projection::All => document,
        Projection::DocumentNameOnly => {
            let (create_time, update_time) = (document.create_time(), document.update_time());
            Document::new(document.reference().clone(), MapValue::default())
                .with_times(create_time, update_time)
        }
        Projection::Fields(paths) => {
            let fields = document.fields().project(paths);
            let (create_time, update_time) = (document.create_time(), document.update_time());
            Document::new(document.reference().clone(), fields).with_times(create_time, update_time)
        }
    }
}
