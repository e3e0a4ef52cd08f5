//! `sitegate-auth`: pure authorization boundary for the project permission grid.
//!
//! This crate is intentionally decoupled from HTTP and storage: it defines the
//! closed enumerations, the grid value types, and how the three permission
//! layers combine into a decision.

pub mod claims;
pub mod decision;
pub mod jwt;
pub mod matrix;
pub mod registry;
pub mod session;

pub use claims::{validate_claims, JwtClaims, TokenValidationError};
pub use decision::{check_locked, decide, effective_matrix, BaseLayer, Decision, DecisionSource};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use matrix::{AllowMatrix, CellOverride, DenyMatrix, WireAllowMatrix, WireDenyMatrix};
pub use registry::{
    is_locked, is_valid_action, is_valid_module, is_valid_role, Action, Cell, ModuleCode, RoleKey,
};
pub use session::{authorize_admin, AuthzError, Principal, SessionRole};
