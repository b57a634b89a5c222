//! Interfaces to the collaborators services talk to.
//!
//! Only the contracts live here, plus in-memory implementations for tests.
//! Real adapters (a SQL database, an authorization server, an SMTP relay, a
//! JWT library) belong to the application.

pub mod authz;
pub mod notify;
pub mod repository;
pub mod tokens;

pub use authz::{
    Authz, AuthzWrite, LookupResult, MemoryAuthz, Precondition, PreconditionOp, RelationTuple,
    WriteOperation,
};
pub use notify::Notifier;
pub use repository::{
    ById, Criteria, Entity, ListCriteria, ListPage, MemoryRepository, Repository, SqlCriteria,
};
pub use tokens::{DecodedToken, TokenIssuer};
