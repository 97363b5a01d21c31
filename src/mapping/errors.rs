use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MappingError {
    #[error("{0} has no id property (expected a mapped field named 'id')")]
    MissingIdProperty(String),

    #[error("{entity} has no mapped field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("{entity}.{field} is not a navigation property")]
    NotANavigation { entity: String, field: String },

    #[error("{entity}.{field} is not a collection navigation")]
    NotACollection { entity: String, field: String },

    #[error("{entity}.{field} matches several references back to {owner}; declare an inverse")]
    AmbiguousInverse {
        entity: String,
        field: String,
        owner: String,
    },

    #[error("Computed property {entity}.{field} has no registered fragment")]
    UnresolvedComputed { entity: String, field: String },

    #[error("Unsupported pagination order target: {0} (only simple column order is supported for paginated queries)")]
    UnsupportedPaginationOrder(String),
}
