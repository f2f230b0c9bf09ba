// Authentication capabilities and the operation execution envelope

pub mod backend;
pub mod executor;

pub use backend::{AuthBackend, MockAuthBackend, RefreshGrant};
pub use executor::{AuthenticationState, OperationClass, OperationExecutor, OperationResult};
