use crate::firestore::error::{invalid_argument, FirestoreResult};
use crate::firestore::model::ResourcePath;
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::query::OrderBy;
use super::reference::DocumentReference;
use super::snapshot::Document;

/// A position in the result order, aligned with the query's order clauses.
#[derive(Clone, Debug, PartialEq)]
pub struct Bound {
    values: Vec<FirestoreValue>,
    inclusive: bool,
}

impl Bound {
    pub fn new(values: Vec<FirestoreValue>, inclusive: bool) -> Self {
        Self { values, inclusive }
    }

    pub fn values(&self) -> &[FirestoreValue] {
        &self.values
    }

    pub fn inclusive(&self) -> bool {
        self.inclusive
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorPosition {
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

impl CursorPosition {
    pub(crate) fn method_name(self) -> &'static str {
        match self {
            CursorPosition::StartAt => "start_at",
            CursorPosition::StartAfter => "start_after",
            CursorPosition::EndAt => "end_at",
            CursorPosition::EndBefore => "end_before",
        }
    }

    pub(crate) fn inclusive(self) -> bool {
        matches!(self, CursorPosition::StartAt | CursorPosition::EndAt)
    }

    pub(crate) fn is_start(self) -> bool {
        matches!(self, CursorPosition::StartAt | CursorPosition::StartAfter)
    }
}

/// Where a cursor takes its values from.
#[derive(Clone, Debug)]
pub enum CursorSource {
    /// Literal values, one per order clause.
    Values(Vec<FirestoreValue>),
    /// The order values of a document already in hand.
    Document(Document),
    /// A document that has to be fetched before the query can be compiled.
    Reference(DocumentReference),
}

impl From<Vec<FirestoreValue>> for CursorSource {
    fn from(values: Vec<FirestoreValue>) -> Self {
        CursorSource::Values(values)
    }
}

impl From<FirestoreValue> for CursorSource {
    fn from(value: FirestoreValue) -> Self {
        CursorSource::Values(vec![value])
    }
}

impl From<Document> for CursorSource {
    fn from(document: Document) -> Self {
        CursorSource::Document(document)
    }
}

impl From<&Document> for CursorSource {
    fn from(document: &Document) -> Self {
        CursorSource::Document(document.clone())
    }
}

impl From<DocumentReference> for CursorSource {
    fn from(reference: DocumentReference) -> Self {
        CursorSource::Reference(reference)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PendingCursor {
    pub(crate) position: CursorPosition,
    pub(crate) source: CursorSource,
}

/// Scope a cursor string is resolved against when it sits at a `__name__` position.
pub(crate) struct NameScope<'a> {
    pub(crate) reference_root: &'a str,
    pub(crate) collection_path: Option<&'a ResourcePath>,
}

impl NameScope<'_> {
    /// Turns a document id (or, for collection groups, a document path) into a reference value.
    pub(crate) fn to_reference(&self, value: &FirestoreValue, context: &str) -> FirestoreResult<FirestoreValue> {
        match value.kind() {
            ValueKind::Reference(_) => Ok(value.clone()),
            ValueKind::String(id) => {
                let path = match self.collection_path {
                    Some(collection) => {
                        if id.is_empty() || id.contains('/') {
                            return Err(invalid_argument(format!(
                                "Invalid {context}: '{id}' must be a plain document ID when querying a collection"
                            )));
                        }
                        collection.child([id.clone()])
                    }
                    None => {
                        let path = ResourcePath::from_string(id)?;
                        if path.is_empty() || path.len() % 2 != 0 {
                            return Err(invalid_argument(format!(
                                "Invalid {context}: '{id}' must be a document path when querying a collection group"
                            )));
                        }
                        path
                    }
                };
                Ok(FirestoreValue::from_reference(format!(
                    "{}/{}",
                    self.reference_root,
                    path.canonical_string()
                )))
            }
            _ => Err(invalid_argument(format!(
                "Invalid {context}: values for '__name__' must be strings or document references, got {}",
                value.kind_name()
            ))),
        }
    }
}

/// Builds a bound from literal values; `order_by` is the explicit order at the time of the call.
pub(crate) fn bound_from_values(
    position: CursorPosition,
    values: &[FirestoreValue],
    order_by: &[OrderBy],
    scope: &NameScope<'_>,
) -> FirestoreResult<Bound> {
    if values.len() > order_by.len() {
        return Err(invalid_argument(format!(
            "Too many arguments provided to {}(): {} values for {} order clauses",
            position.method_name(),
            values.len(),
            order_by.len()
        )));
    }
    let mut components = Vec::with_capacity(values.len());
    for (value, order) in values.iter().zip(order_by) {
        if order.field().is_document_id() {
            components.push(scope.to_reference(value, position.method_name())?);
        } else {
            components.push(value.clone());
        }
    }
    Ok(Bound::new(components, position.inclusive()))
}

/// Builds a bound from a document's values for every normalised order clause.
pub(crate) fn bound_from_document(
    position: CursorPosition,
    document: &Document,
    normalized_order: &[OrderBy],
) -> FirestoreResult<Bound> {
    let values = normalized_order
        .iter()
        .map(|order| {
            document.order_value(order.field()).ok_or_else(|| {
                invalid_argument(format!(
                    "Invalid {}(): document '{}' has no value for order field '{}'",
                    position.method_name(),
                    document.name(),
                    order.field().canonical_string()
                ))
            })
        })
        .collect::<FirestoreResult<Vec<_>>>()?;
    Ok(Bound::new(values, position.inclusive()))
}
