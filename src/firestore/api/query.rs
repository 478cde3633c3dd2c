use crate::firestore::codec::{Codec, FieldCodec};
use crate::firestore::constants::MAX_DISJUNCTION_VALUES;
use crate::firestore::error::{invalid_argument, not_found, FirestoreResult};
use crate::firestore::model::{DatabaseId, FieldPath, IntoFieldPath, ResourcePath};
use crate::firestore::remote::datastore::{Datastore, ReadOptions};
use crate::firestore::value::{FirestoreValue, ValueKind};

use super::call_options::CallOptions;
use super::cursor::{
    bound_from_document, bound_from_values, Bound, CursorPosition, CursorSource, NameScope,
    PendingCursor,
};
use super::reference::CollectionReference;
use super::transaction::Transaction;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOperator {
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Equal,
    NotEqual,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::LessThan => "LESS_THAN",
            FilterOperator::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FilterOperator::GreaterThan => "GREATER_THAN",
            FilterOperator::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FilterOperator::Equal => "EQUAL",
            FilterOperator::NotEqual => "NOT_EQUAL",
            FilterOperator::ArrayContains => "ARRAY_CONTAINS",
            FilterOperator::ArrayContainsAny => "ARRAY_CONTAINS_ANY",
            FilterOperator::In => "IN",
            FilterOperator::NotIn => "NOT_IN",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqual
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqual
                | FilterOperator::NotEqual
                | FilterOperator::NotIn
        )
    }

    fn is_range(&self) -> bool {
        matches!(
            self,
            FilterOperator::LessThan
                | FilterOperator::LessThanOrEqual
                | FilterOperator::GreaterThan
                | FilterOperator::GreaterThanOrEqual
        )
    }

    fn takes_array(&self) -> bool {
        matches!(
            self,
            FilterOperator::ArrayContainsAny | FilterOperator::In | FilterOperator::NotIn
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOperator {
    IsNull,
    IsNan,
    IsNotNull,
    IsNotNan,
}

impl UnaryOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOperator::IsNull => "IS_NULL",
            UnaryOperator::IsNan => "IS_NAN",
            UnaryOperator::IsNotNull => "IS_NOT_NULL",
            UnaryOperator::IsNotNan => "IS_NOT_NAN",
        }
    }

    pub fn is_inequality(&self) -> bool {
        matches!(self, UnaryOperator::IsNotNull | UnaryOperator::IsNotNan)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

impl OrderDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderDirection::Ascending => "ASCENDING",
            OrderDirection::Descending => "DESCENDING",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldFilter {
    field: FieldPath,
    operator: FilterOperator,
    value: FirestoreValue,
}

impl FieldFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FirestoreValue {
        &self.value
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnaryFilter {
    field: FieldPath,
    operator: UnaryOperator,
}

impl UnaryFilter {
    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operator(&self) -> UnaryOperator {
        self.operator
    }
}

/// One conjunct of a query's `where` clause.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    Field(FieldFilter),
    Unary(UnaryFilter),
}

impl Filter {
    pub fn field(&self) -> &FieldPath {
        match self {
            Filter::Field(filter) => filter.field(),
            Filter::Unary(filter) => filter.field(),
        }
    }

    pub fn is_inequality(&self) -> bool {
        match self {
            Filter::Field(filter) => filter.operator().is_inequality(),
            Filter::Unary(filter) => filter.operator().is_inequality(),
        }
    }

    fn is_not_equal(&self) -> bool {
        match self {
            Filter::Field(filter) => filter.operator() == FilterOperator::NotEqual,
            Filter::Unary(filter) => filter.operator().is_inequality(),
        }
    }

    fn has_operator(&self, operator: FilterOperator) -> bool {
        matches!(self, Filter::Field(filter) if filter.operator() == operator)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    field: FieldPath,
    direction: OrderDirection,
}

impl OrderBy {
    pub fn new(field: FieldPath, direction: OrderDirection) -> Self {
        Self { field, direction }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn direction(&self) -> OrderDirection {
        self.direction
    }
}

/// Which fields of the matching documents the server returns.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum Projection {
    #[default]
    All,
    /// Only document names; every field map comes back empty.
    DocumentNameOnly,
    Fields(Vec<FieldPath>),
}

impl Projection {
    /// Whether values of `field` are present in projected documents.
    pub fn includes(&self, field: &FieldPath) -> bool {
        if field.is_document_id() {
            return true;
        }
        match self {
            Projection::All => true,
            Projection::DocumentNameOnly => false,
            Projection::Fields(fields) => fields.iter().any(|selected| {
                field.segments().len() >= selected.segments().len()
                    && field.segments()[..selected.segments().len()] == *selected.segments()
            }),
        }
    }
}

/// A fully validated query, ready to be sent.
///
/// The order clauses are normalised: whenever any ordering exists the last clause is `__name__`,
/// which makes every position in the result order unique.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredQuery {
    database_id: DatabaseId,
    parent_path: ResourcePath,
    collection_id: String,
    all_descendants: bool,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    projection: Projection,
    start_at: Option<Bound>,
    end_at: Option<Bound>,
    offset: u32,
    limit: Option<u32>,
}

impl StructuredQuery {
    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    /// Path of the document the query hangs off, empty for the database root.
    pub fn parent_path(&self) -> &ResourcePath {
        &self.parent_path
    }

    /// Resource name sent as the `parent` of the request.
    pub fn parent(&self) -> String {
        if self.parent_path.is_empty() {
            self.database_id.documents_root()
        } else {
            format!(
                "{}/{}",
                self.database_id.documents_root(),
                self.parent_path.canonical_string()
            )
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn all_descendants(&self) -> bool {
        self.all_descendants
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn start_at(&self) -> Option<&Bound> {
        self.start_at.as_ref()
    }

    pub fn end_at(&self) -> Option<&Bound> {
        self.end_at.as_ref()
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub(crate) fn with_start_at(mut self, bound: Option<Bound>) -> Self {
        self.start_at = bound;
        self
    }

    pub(crate) fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub(crate) fn with_limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }
}

/// Immutable query builder. Every step validates its input and returns a new query.
///
/// ```
/// use firestore_docs_engine::firestore::{
///     CollectionReference, DatabaseId, FilterOperator, FirestoreValue, OrderDirection,
/// };
///
/// let rooms = CollectionReference::from_path(DatabaseId::default("demo"), "rooms").unwrap();
/// let query = rooms
///     .query()
///     .where_field("size", FilterOperator::GreaterThan, FirestoreValue::from_integer(4))
///     .unwrap()
///     .limit(10)
///     .unwrap();
///
/// let compiled = query.compile().unwrap();
/// let order: Vec<_> = compiled
///     .order_by()
///     .iter()
///     .map(|order| (order.field().canonical_string(), order.direction()))
///     .collect();
/// assert_eq!(
///     order,
///     vec![
///         ("size".to_string(), OrderDirection::Ascending),
///         ("__name__".to_string(), OrderDirection::Ascending),
///     ]
/// );
/// ```
#[derive(Clone, Debug)]
pub struct Query {
    database_id: DatabaseId,
    parent_path: ResourcePath,
    collection_id: String,
    all_descendants: bool,
    filters: Vec<Filter>,
    order_by: Vec<OrderBy>,
    projection: Projection,
    start: Option<PendingCursor>,
    end: Option<PendingCursor>,
    offset: u32,
    limit: Option<u32>,
}

impl Query {
    pub(crate) fn for_collection(collection: CollectionReference) -> Self {
        let path = collection.path();
        Self::with_scope(
            collection.database_id().clone(),
            path.without_last(),
            collection.id().to_string(),
            false,
        )
    }

    /// Queries every collection with the given id, wherever it sits in the hierarchy.
    pub fn collection_group(database_id: DatabaseId, collection_id: &str) -> FirestoreResult<Self> {
        if collection_id.is_empty() || collection_id.contains('/') {
            return Err(invalid_argument(format!(
                "Invalid collection ID '{collection_id}' passed to collection_group(); it must be non-empty and cannot contain '/'"
            )));
        }
        Ok(Self::with_scope(
            database_id,
            ResourcePath::root(),
            collection_id.to_string(),
            true,
        ))
    }

    fn with_scope(
        database_id: DatabaseId,
        parent_path: ResourcePath,
        collection_id: String,
        all_descendants: bool,
    ) -> Self {
        Self {
            database_id,
            parent_path,
            collection_id,
            all_descendants,
            filters: Vec::new(),
            order_by: Vec::new(),
            projection: Projection::All,
            start: None,
            end: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn database_id(&self) -> &DatabaseId {
        &self.database_id
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn is_collection_group(&self) -> bool {
        self.all_descendants
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// The order clauses added by the caller, before normalisation.
    pub fn explicit_order_by(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn where_field(
        self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;

        if matches!(operator, FilterOperator::Equal | FilterOperator::NotEqual) {
            let equal = operator == FilterOperator::Equal;
            if value.is_null() {
                let unary = if equal { UnaryOperator::IsNull } else { UnaryOperator::IsNotNull };
                return self.where_unary(field, unary);
            }
            if value.is_nan() {
                let unary = if equal { UnaryOperator::IsNan } else { UnaryOperator::IsNotNan };
                return self.where_unary(field, unary);
            }
        }

        if operator.is_range() && (value.is_null() || value.is_nan()) {
            return Err(invalid_argument(format!(
                "Invalid query. {} only supports '==' and '!=' comparisons",
                if value.is_null() { "Null" } else { "NaN" }
            )));
        }

        if operator.takes_array() {
            validate_disjunction(operator, &value)?;
        }

        let value = if field.is_document_id() {
            self.document_id_filter_value(operator, value)?
        } else {
            value
        };

        self.add_filter(Filter::Field(FieldFilter {
            field,
            operator,
            value,
        }))
    }

    /// Encodes `value` through `codec` and filters on it.
    pub fn where_value<T: FieldCodec>(
        self,
        field: impl IntoFieldPath,
        operator: FilterOperator,
        value: &T,
        codec: &Codec,
    ) -> FirestoreResult<Self> {
        let value = codec.encode(value)?;
        self.where_field(field, operator, value)
    }

    pub fn where_unary(self, field: impl IntoFieldPath, operator: UnaryOperator) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        self.add_filter(Filter::Unary(UnaryFilter { field, operator }))
    }

    fn add_filter(mut self, filter: Filter) -> FirestoreResult<Self> {
        if filter.has_operator(FilterOperator::NotIn) {
            if self.filters.iter().any(|existing| existing.has_operator(FilterOperator::NotIn)) {
                return Err(invalid_argument(
                    "Invalid query. You cannot use more than one 'NOT_IN' filter",
                ));
            }
            if self.filters.iter().any(Filter::is_not_equal) {
                return Err(invalid_argument(
                    "Invalid query. You cannot use 'NOT_IN' filters with 'NOT_EQUAL' filters",
                ));
            }
        }
        if filter.is_not_equal()
            && self.filters.iter().any(|existing| existing.has_operator(FilterOperator::NotIn))
        {
            return Err(invalid_argument(
                "Invalid query. You cannot use 'NOT_EQUAL' filters with 'NOT_IN' filters",
            ));
        }
        if filter.has_operator(FilterOperator::ArrayContains)
            && self
                .filters
                .iter()
                .any(|existing| existing.has_operator(FilterOperator::ArrayContains))
        {
            return Err(invalid_argument(
                "Invalid query. You cannot use more than one 'ARRAY_CONTAINS' filter",
            ));
        }

        self.filters.push(filter);
        Ok(self)
    }

    fn document_id_filter_value(
        &self,
        operator: FilterOperator,
        value: FirestoreValue,
    ) -> FirestoreResult<FirestoreValue> {
        if matches!(
            operator,
            FilterOperator::ArrayContains | FilterOperator::ArrayContainsAny
        ) {
            return Err(invalid_argument(format!(
                "Invalid query. You cannot use '{}' filters on '__name__'",
                operator.as_str()
            )));
        }
        let root = self.database_id.documents_root();
        let collection = self.collection_path();
        let scope = self.name_scope(&root, collection.as_ref());
        match value.kind() {
            ValueKind::Array(array) if operator.takes_array() => {
                let converted = array
                    .values()
                    .iter()
                    .map(|element| scope.to_reference(element, "where_field"))
                    .collect::<FirestoreResult<Vec<_>>>()?;
                Ok(FirestoreValue::from_array(converted))
            }
            _ => scope.to_reference(&value, "where_field"),
        }
    }

    pub fn order_by(mut self, field: impl IntoFieldPath, direction: OrderDirection) -> FirestoreResult<Self> {
        let field = field.into_field_path()?;
        if let Some(last) = self.order_by.last() {
            if last.field().is_document_id() {
                return Err(invalid_argument(
                    "Invalid query. '__name__' must be the last order clause",
                ));
            }
        }
        if self.order_by.iter().any(|existing| existing.field() == &field) {
            return Err(invalid_argument(format!(
                "Invalid query. Field '{}' is already ordered",
                field.canonical_string()
            )));
        }
        self.order_by.push(OrderBy::new(field, direction));
        Ok(self)
    }

    pub fn order_by_document_id(self, direction: OrderDirection) -> FirestoreResult<Self> {
        self.order_by(FieldPath::document_id(), direction)
    }

    /// Restricts returned documents to the given fields.
    pub fn select<I, F>(mut self, fields: I) -> FirestoreResult<Self>
    where
        I: IntoIterator<Item = F>,
        F: IntoFieldPath,
    {
        let fields = fields
            .into_iter()
            .map(IntoFieldPath::into_field_path)
            .collect::<FirestoreResult<Vec<_>>>()?;
        if fields.is_empty() {
            return Err(invalid_argument(
                "Invalid query. select() requires at least one field",
            ));
        }
        self.projection = match self.projection {
            Projection::All => Projection::Fields(fields),
            Projection::Fields(mut existing) => {
                for field in fields {
                    if !existing.contains(&field) {
                        existing.push(field);
                    }
                }
                Projection::Fields(existing)
            }
            Projection::DocumentNameOnly => {
                return Err(invalid_argument(
                    "Invalid query. select() cannot be combined with select_document_names()",
                ))
            }
        };
        Ok(self)
    }

    /// Returns documents with names only and empty field maps.
    pub fn select_document_names(mut self) -> FirestoreResult<Self> {
        if let Projection::Fields(_) = self.projection {
            return Err(invalid_argument(
                "Invalid query. select_document_names() cannot be combined with select()",
            ));
        }
        self.projection = Projection::DocumentNameOnly;
        Ok(self)
    }

    pub fn start_at(self, source: impl Into<CursorSource>) -> FirestoreResult<Self> {
        self.with_cursor(CursorPosition::StartAt, source.into())
    }

    pub fn start_after(self, source: impl Into<CursorSource>) -> FirestoreResult<Self> {
        self.with_cursor(CursorPosition::StartAfter, source.into())
    }

    pub fn end_at(self, source: impl Into<CursorSource>) -> FirestoreResult<Self> {
        self.with_cursor(CursorPosition::EndAt, source.into())
    }

    pub fn end_before(self, source: impl Into<CursorSource>) -> FirestoreResult<Self> {
        self.with_cursor(CursorPosition::EndBefore, source.into())
    }

    fn with_cursor(mut self, position: CursorPosition, source: CursorSource) -> FirestoreResult<Self> {
        let source = match source {
            CursorSource::Values(values) => {
                let root = self.database_id.documents_root();
                let collection = self.collection_path();
                let scope = self.name_scope(&root, collection.as_ref());
                let bound = bound_from_values(position, &values, &self.order_by, &scope)?;
                CursorSource::Values(bound.values().to_vec())
            }
            other => other,
        };
        let cursor = PendingCursor { position, source };
        if position.is_start() {
            self.start = Some(cursor);
        } else {
            self.end = Some(cursor);
        }
        Ok(self)
    }

    /// Skips the first `offset` results.
    pub fn offset(mut self, offset: u32) -> FirestoreResult<Self> {
        self.offset = offset;
        Ok(self)
    }

    pub fn limit(mut self, limit: u32) -> FirestoreResult<Self> {
        if limit == 0 {
            return Err(invalid_argument(
                "Invalid query. limit() must be greater than zero",
            ));
        }
        self.limit = Some(limit);
        Ok(self)
    }

    /// Explicit order, preceded by the first inequality field when nothing is ordered, and
    /// terminated by `__name__` in the direction of the last clause.
    pub fn normalized_order_by(&self) -> Vec<OrderBy> {
        let mut order = self.order_by.clone();
        if order.is_empty() {
            if let Some(filter) = self.filters.iter().find(|filter| filter.is_inequality()) {
                order.push(OrderBy::new(filter.field().clone(), OrderDirection::Ascending));
            }
        }
        let ends_with_name = order
            .last()
            .map(|clause| clause.field().is_document_id())
            .unwrap_or(false);
        if !ends_with_name {
            let direction = order
                .last()
                .map(OrderBy::direction)
                .unwrap_or(OrderDirection::Ascending);
            order.push(OrderBy::new(FieldPath::document_id(), direction));
        }
        order
    }

    /// Validates and normalises the query. Cursors built from a `DocumentReference` need the
    /// document first; use [`Query::resolve`] for those.
    pub fn compile(&self) -> FirestoreResult<StructuredQuery> {
        let order_by = self.normalized_order_by();
        let start_at = self
            .start
            .as_ref()
            .map(|cursor| compile_cursor(cursor, &order_by))
            .transpose()?;
        let end_at = self
            .end
            .as_ref()
            .map(|cursor| compile_cursor(cursor, &order_by))
            .transpose()?;

        Ok(StructuredQuery {
            database_id: self.database_id.clone(),
            parent_path: self.parent_path.clone(),
            collection_id: self.collection_id.clone(),
            all_descendants: self.all_descendants,
            filters: self.filters.clone(),
            order_by,
            projection: self.projection.clone(),
            start_at,
            end_at,
            offset: self.offset,
            limit: self.limit,
        })
    }

    /// Fetches documents referenced by cursors, honouring the transaction token, then compiles.
    pub async fn resolve(
        &self,
        datastore: &dyn Datastore,
        transaction: Option<&Transaction>,
        options: &CallOptions,
    ) -> FirestoreResult<StructuredQuery> {
        let mut resolved = self.clone();
        let read_options = ReadOptions {
            transaction: match transaction {
                Some(transaction) => transaction.token().await,
                None => None,
            },
        };
        for cursor in [resolved.start.as_mut(), resolved.end.as_mut()].into_iter().flatten() {
            if let CursorSource::Reference(reference) = &cursor.source {
                let document = options
                    .run(datastore.get_document(reference, &read_options))
                    .await?
                    .ok_or_else(|| {
                        not_found(format!(
                            "Cursor document '{}' does not exist",
                            reference.resource_name()
                        ))
                    })?;
                cursor.source = CursorSource::Document(document);
            }
        }
        resolved.compile()
    }

    fn collection_path(&self) -> Option<ResourcePath> {
        if self.all_descendants {
            None
        } else {
            Some(self.parent_path.child([self.collection_id.clone()]))
        }
    }

    fn name_scope<'a>(&self, root: &'a str, collection: Option<&'a ResourcePath>) -> NameScope<'a> {
        NameScope {
            reference_root: root,
            collection_path: collection,
        }
    }
}

fn validate_disjunction(operator: FilterOperator, value: &FirestoreValue) -> FirestoreResult<()> {
    let array = value.as_array().ok_or_else(|| {
        invalid_argument(format!(
            "Invalid query. A non-empty array is required for '{}' filters",
            operator.as_str()
        ))
    })?;
    if array.is_empty() {
        return Err(invalid_argument(format!(
            "Invalid query. A non-empty array is required for '{}' filters",
            operator.as_str()
        )));
    }
    if array.len() > MAX_DISJUNCTION_VALUES {
        return Err(invalid_argument(format!(
            "Invalid query. '{}' filters support a maximum of {MAX_DISJUNCTION_VALUES} elements in the value array",
            operator.as_str()
        )));
    }
    Ok(())
}

fn compile_cursor(cursor: &PendingCursor, order_by: &[OrderBy]) -> FirestoreResult<Bound> {
    match &cursor.source {
        CursorSource::Values(values) => Ok(Bound::new(values.clone(), cursor.position.inclusive())),
        CursorSource::Document(document) => bound_from_document(cursor.position, document, order_by),
        CursorSource::Reference(reference) => Err(invalid_argument(format!(
            "{}() uses document '{}' which has not been fetched; resolve the query first",
            cursor.position.method_name(),
            reference.resource_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firestore::api::snapshot::Document;
    use crate::firestore::error::FirestoreErrorCode;
    use crate::firestore::remote::datastore::InMemoryDatastore;
    use crate::firestore::value::MapValue;

    fn rooms() -> CollectionReference {
        CollectionReference::from_path(DatabaseId::default("demo"), "rooms").unwrap()
    }

    fn order_names(query: &StructuredQuery) -> Vec<(String, OrderDirection)> {
        query
            .order_by()
            .iter()
            .map(|order| (order.field().canonical_string(), order.direction()))
            .collect()
    }

    #[test]
    fn plain_query_orders_by_name() {
        let compiled = rooms().query().compile().unwrap();
        assert_eq!(
            order_names(&compiled),
            vec![("__name__".to_string(), OrderDirection::Ascending)]
        );
        assert_eq!(compiled.parent(), "projects/demo/databases/(default)/documents");
        assert!(!compiled.all_descendants());
    }

    #[test]
    fn implicit_name_follows_last_direction() {
        let compiled = rooms()
            .query()
            .order_by("a", OrderDirection::Ascending)
            .unwrap()
            .order_by("b", OrderDirection::Descending)
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(
            order_names(&compiled),
            vec![
                ("a".to_string(), OrderDirection::Ascending),
                ("b".to_string(), OrderDirection::Descending),
                ("__name__".to_string(), OrderDirection::Descending),
            ]
        );
    }

    #[test]
    fn inequality_field_ordered_first_without_explicit_order() {
        let compiled = rooms()
            .query()
            .where_field("size", FilterOperator::NotEqual, FirestoreValue::from_integer(3))
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(
            order_names(&compiled),
            vec![
                ("size".to_string(), OrderDirection::Ascending),
                ("__name__".to_string(), OrderDirection::Ascending),
            ]
        );
    }

    #[test]
    fn explicit_name_order_is_not_duplicated() {
        let compiled = rooms()
            .query()
            .order_by_document_id(OrderDirection::Descending)
            .unwrap()
            .compile()
            .unwrap();
        assert_eq!(
            order_names(&compiled),
            vec![("__name__".to_string(), OrderDirection::Descending)]
        );
    }

    #[test]
    fn name_order_must_be_last() {
        let err = rooms()
            .query()
            .order_by_document_id(OrderDirection::Ascending)
            .unwrap()
            .order_by("a", OrderDirection::Ascending)
            .unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);
    }

    #[test]
    fn equality_with_null_and_nan_becomes_unary() {
        let query = rooms()
            .query()
            .where_field("a", FilterOperator::Equal, FirestoreValue::null())
            .unwrap()
            .where_field("b", FilterOperator::NotEqual, FirestoreValue::from_double(f64::NAN))
            .unwrap();
        let operators: Vec<_> = query
            .filters()
            .iter()
            .map(|filter| match filter {
                Filter::Unary(unary) => unary.operator(),
                Filter::Field(_) => panic!("expected unary filter"),
            })
            .collect();
        assert_eq!(operators, vec![UnaryOperator::IsNull, UnaryOperator::IsNotNan]);
    }

    #[test]
    fn range_against_null_is_rejected() {
        let err = rooms()
            .query()
            .where_field("a", FilterOperator::LessThan, FirestoreValue::null())
            .unwrap_err();
        assert!(err.message().contains("Null"));
    }

    #[test]
    fn disjunctions_need_bounded_non_empty_arrays() {
        let empty = rooms()
            .query()
            .where_field("a", FilterOperator::In, FirestoreValue::from_array(Vec::new()));
        assert!(empty.is_err());

        let scalar = rooms()
            .query()
            .where_field("a", FilterOperator::In, FirestoreValue::from_integer(1));
        assert!(scalar.is_err());

        let too_many = (0..31).map(FirestoreValue::from_integer).collect();
        let oversized = rooms()
            .query()
            .where_field("a", FilterOperator::ArrayContainsAny, FirestoreValue::from_array(too_many));
        assert!(oversized.is_err());

        let thirty = (0..30).map(FirestoreValue::from_integer).collect();
        assert!(rooms()
            .query()
            .where_field("a", FilterOperator::In, FirestoreValue::from_array(thirty))
            .is_ok());
    }

    #[test]
    fn not_in_conflicts() {
        let values = FirestoreValue::from_array(vec![FirestoreValue::from_integer(1)]);
        let query = rooms()
            .query()
            .where_field("a", FilterOperator::NotIn, values.clone())
            .unwrap();
        assert!(query
            .clone()
            .where_field("b", FilterOperator::NotIn, values.clone())
            .is_err());
        assert!(query
            .clone()
            .where_field("b", FilterOperator::NotEqual, FirestoreValue::from_integer(2))
            .is_err());
        assert!(query
            .where_field("b", FilterOperator::NotEqual, FirestoreValue::null())
            .is_err());

        let not_equal_first = rooms()
            .query()
            .where_field("b", FilterOperator::NotEqual, FirestoreValue::from_integer(2))
            .unwrap();
        assert!(not_equal_first
            .where_field("a", FilterOperator::NotIn, values)
            .is_err());
    }

    #[test]
    fn single_array_contains() {
        let query = rooms()
            .query()
            .where_field("tags", FilterOperator::ArrayContains, FirestoreValue::from_string("x"))
            .unwrap();
        assert!(query
            .where_field("labels", FilterOperator::ArrayContains, FirestoreValue::from_string("y"))
            .is_err());
    }

    #[test]
    fn document_id_filters_take_references() {
        let query = rooms()
            .query()
            .where_field("__name__", FilterOperator::Equal, FirestoreValue::from_string("eros"))
            .unwrap();
        match &query.filters()[0] {
            Filter::Field(filter) => assert_eq!(
                filter.value(),
                &FirestoreValue::from_reference(
                    "projects/demo/databases/(default)/documents/rooms/eros"
                )
            ),
            Filter::Unary(_) => panic!("expected field filter"),
        }

        assert!(rooms()
            .query()
            .where_field("__name__", FilterOperator::Equal, FirestoreValue::from_integer(1))
            .is_err());
    }

    #[test]
    fn limit_zero_is_rejected() {
        assert!(rooms().query().limit(0).is_err());
        assert_eq!(rooms().query().limit(3).unwrap().compile().unwrap().limit(), Some(3));
    }

    #[test]
    fn projection_modes_do_not_mix() {
        assert!(rooms()
            .query()
            .select(["a"])
            .unwrap()
            .select_document_names()
            .is_err());
        assert!(rooms()
            .query()
            .select_document_names()
            .unwrap()
            .select(["a"])
            .is_err());
        assert!(rooms().query().select(Vec::<&str>::new()).is_err());

        let compiled = rooms().query().select(["a", "b.c"]).unwrap().compile().unwrap();
        let projection = compiled.projection();
        assert!(projection.includes(&FieldPath::from_dot_separated("b.c.d").unwrap()));
        assert!(!projection.includes(&FieldPath::from_dot_separated("b").unwrap()));
        assert!(projection.includes(&FieldPath::document_id()));
    }

    #[test]
    fn cursor_values_bounded_by_explicit_order() {
        let err = rooms()
            .query()
            .start_at(FirestoreValue::from_integer(1))
            .unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::InvalidArgument);

        let compiled = rooms()
            .query()
            .order_by("a", OrderDirection::Ascending)
            .unwrap()
            .start_after(vec![FirestoreValue::from_integer(1)])
            .unwrap()
            .end_before(vec![FirestoreValue::from_integer(9)])
            .unwrap()
            .compile()
            .unwrap();
        let start = compiled.start_at().unwrap();
        assert!(!start.inclusive());
        assert_eq!(start.values(), &[FirestoreValue::from_integer(1)]);
        assert!(!compiled.end_at().unwrap().inclusive());
    }

    #[test]
    fn cursor_from_document_uses_normalised_order() {
        let reference = rooms().doc(Some("eros")).unwrap();
        let mut fields = MapValue::default();
        fields.insert("a", FirestoreValue::from_integer(5));
        let document = Document::new(reference.clone(), fields);

        let compiled = rooms()
            .query()
            .order_by("a", OrderDirection::Descending)
            .unwrap()
            .start_at(&document)
            .unwrap()
            .compile()
            .unwrap();
        let start = compiled.start_at().unwrap();
        assert!(start.inclusive());
        assert_eq!(
            start.values(),
            &[
                FirestoreValue::from_integer(5),
                FirestoreValue::from_reference(reference.resource_name()),
            ]
        );
    }

    #[test]
    fn reference_cursor_requires_resolution() {
        let reference = rooms().doc(Some("eros")).unwrap();
        let query = rooms().query().start_after(reference).unwrap();
        let err = query.compile().unwrap_err();
        assert!(err.message().contains("resolve"));
    }

    #[tokio::test]
    async fn resolve_fetches_reference_cursor() {
        let datastore = InMemoryDatastore::new();
        let reference = rooms().doc(Some("eros")).unwrap();
        let mut fields = MapValue::default();
        fields.insert("a", FirestoreValue::from_integer(7));
        datastore.insert_document(Document::new(reference.clone(), fields));

        let query = rooms()
            .query()
            .order_by("a", OrderDirection::Ascending)
            .unwrap()
            .start_after(reference.clone())
            .unwrap();
        let compiled = query
            .resolve(&datastore, None, &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(
            compiled.start_at().unwrap().values(),
            &[
                FirestoreValue::from_integer(7),
                FirestoreValue::from_reference(reference.resource_name()),
            ]
        );

        let missing = rooms().doc(Some("nowhere")).unwrap();
        let err = rooms()
            .query()
            .start_at(missing)
            .unwrap()
            .resolve(&datastore, None, &CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, FirestoreErrorCode::NotFound);
    }

    #[test]
    fn collection_group_scope() {
        let compiled = Query::collection_group(DatabaseId::default("demo"), "messages")
            .unwrap()
            .compile()
            .unwrap();
        assert!(compiled.all_descendants());
        assert_eq!(compiled.collection_id(), "messages");
        assert!(Query::collection_group(DatabaseId::default("demo"), "a/b").is_err());
    }

    #[test]
    fn subcollection_parent_is_document() {
        let messages = CollectionReference::from_path(DatabaseId::default("demo"), "rooms/eros/messages")
            .unwrap();
        let compiled = messages.query().compile().unwrap();
        assert_eq!(
            compiled.parent(),
            "projects/demo/databases/(default)/documents/rooms/eros"
        );
        assert_eq!(compiled.collection_id(), "messages");
    }
}
