pub(crate) const DEFAULT_DATABASE_ID: &str = "(default)";

/// Reserved field path addressing a document's resource name.
pub(crate) const DOCUMENT_ID_FIELD: &str = "__name__";

/// Upper bound on the number of values accepted by `IN`, `NOT_IN` and `ARRAY_CONTAINS_ANY`.
pub(crate) const MAX_DISJUNCTION_VALUES: usize = 30;

pub(crate) const DEFAULT_PAGE_SIZE: u32 = 100;
