//! The entities of the authorization model.

pub mod action;
pub mod context;
pub mod resource;
pub mod result;
pub mod roles;
pub mod user;

pub use action::Action;
pub use context::Context;
pub use resource::AuthResource;
pub use result::Decision;
pub use roles::{Permission, Role, RoleStore};
pub use user::User;
