pub mod crypto;
pub mod jwt;
pub mod principal;
pub mod rbac;
pub mod scopes;

pub use principal::{authenticate, RequestContext};
