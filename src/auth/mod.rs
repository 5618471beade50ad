// Login sessions and role-gated routes
pub mod cookies;
pub mod guard;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use guard::{check_access, redirect_for, required_roles, Access};
pub use jwt::{Claims, TokenError, TokenIssuer};
pub use middleware::{require_auth, AuthError};
pub use password::{hash_password, verify_password, PasswordError};
