pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod field_keys;
pub mod jql;
pub mod models;
pub mod retry;
pub mod search;
pub mod token_store;

pub use client::{Credential, JiraClient};
pub use config::{AuthMode, CaseSensitivity, ConnectionConfig};
pub use credentials::CredentialManager;
pub use error::Error;
pub use models::*;

// Field key resolution re-exports
pub use field_keys::{FieldKeyResolver, ResolvedFields};

// Qual translation re-exports
pub use jql::{
    ColumnKind, FilterColumn, Qual, QualOperator, QualValue, anchored_jql, build_jql_from_quals,
    issue_filter_columns, jql_field_key,
};

// Paged search re-exports
pub use search::{
    ExpressionStrategy, PagedSearchExecutor, RowSearchStrategy, SearchCursor, SearchLimits,
    SearchPage, SearchStats, SearchStrategy, StreamControl, expression_projection, select_strategy,
};

// Token store re-exports
pub use token_store::{FileTokenStore, PersistedRefreshToken, TokenStore};
