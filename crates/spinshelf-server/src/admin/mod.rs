//! Administrator-only revalidation gateway.

pub mod auth;
pub mod revalidate;
pub mod routes;

pub use auth::{ADMIN_IDENTITY_HEADER, AdminAuth, AdminIdentity};
pub use revalidate::{Ack, Revalidator};
pub use routes::admin_routes;
