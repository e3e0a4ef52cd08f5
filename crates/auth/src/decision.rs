//! Pure permission decision: combines a base grid with a user's deny grid.
//!
//! - No IO
//! - No panics
//! - The locked-cell rule is checked before anything else
//!
//! Loading the layers is the caller's job (see `sitegate-infra`'s resolver);
//! this module only defines how they combine and how a decision is explained.

use serde::Serialize;

use crate::matrix::{AllowMatrix, DenyMatrix};
use crate::registry::{is_locked, Action, ModuleCode, RoleKey};

/// Which grid supplies the base allow value for a (project, role) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaseLayer<'a> {
    /// A project override exists and replaces the template entirely.
    ProjectOverride(&'a AllowMatrix),
    /// No project override; the role template applies.
    RoleTemplate(&'a AllowMatrix),
}

impl<'a> BaseLayer<'a> {
    /// Pick the override when present, otherwise the template. Never merges.
    pub fn select(project_override: Option<&'a AllowMatrix>, template: &'a AllowMatrix) -> Self {
        match project_override {
            Some(m) => BaseLayer::ProjectOverride(m),
            None => BaseLayer::RoleTemplate(template),
        }
    }

    pub fn matrix(&self) -> &'a AllowMatrix {
        match self {
            BaseLayer::ProjectOverride(m) | BaseLayer::RoleTemplate(m) => m,
        }
    }

    pub fn source(&self) -> DecisionSource {
        match self {
            BaseLayer::ProjectOverride(_) => DecisionSource::ProjectOverride,
            BaseLayer::RoleTemplate(_) => DecisionSource::RoleTemplate,
        }
    }
}

/// The layer that produced the base value of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// The cell is unconditionally false; no store was consulted.
    LockedInvariant,
    ProjectOverride,
    RoleTemplate,
}

/// An effective permission together with how it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub module: ModuleCode,
    pub action: Action,
    pub role: RoleKey,
    pub allowed: bool,
    pub source: DecisionSource,
    /// Value of the base grid before user denies (always false when locked).
    pub base_allowed: bool,
    /// Whether the user's deny grid has an entry for this cell.
    pub user_denied: bool,
}

impl Decision {
    /// Decision for a locked cell, reached without consulting any layer.
    pub fn locked(module: ModuleCode, action: Action, role: RoleKey) -> Self {
        Self {
            module,
            action,
            role,
            allowed: false,
            source: DecisionSource::LockedInvariant,
            base_allowed: false,
            user_denied: false,
        }
    }

    /// Human-readable reason, for audit output.
    pub fn reason(&self) -> String {
        let cell = format!("{}.{}", self.module, self.action);
        match (self.source, self.user_denied) {
            (DecisionSource::LockedInvariant, _) => {
                format!("{cell} is locked and never granted")
            }
            (_, true) if self.base_allowed => {
                format!("{cell} is granted to {} but denied for this user", self.role)
            }
            (source, _) => {
                let layer = match source {
                    DecisionSource::ProjectOverride => "project override",
                    _ => "role template",
                };
                let verb = if self.allowed { "grants" } else { "does not grant" };
                format!("{layer} for {} {verb} {cell}", self.role)
            }
        }
    }
}

/// Returns the locked-cell decision if the cell is locked.
///
/// Callers must check this before loading any layer.
pub fn check_locked(module: ModuleCode, action: Action, role: RoleKey) -> Option<Decision> {
    is_locked(module, action).then(|| Decision::locked(module, action, role))
}

/// Combine base grid and user denies into a single decision.
pub fn decide(
    module: ModuleCode,
    action: Action,
    role: RoleKey,
    base: BaseLayer<'_>,
    denies: &DenyMatrix,
) -> Decision {
    if let Some(locked) = check_locked(module, action, role) {
        return locked;
    }

    let base_allowed = base.matrix().get(module, action);
    let user_denied = denies.denies(module, action);

    Decision {
        module,
        action,
        role,
        allowed: base_allowed && !user_denied,
        source: base.source(),
        base_allowed,
        user_denied,
    }
}

/// Every cell of the effective grid at once (editor starting state).
pub fn effective_matrix(base: BaseLayer<'_>, denies: &DenyMatrix) -> AllowMatrix {
    let base = base.matrix();
    AllowMatrix::from_fn(|cell| {
        base.get(cell.module, cell.action) && !denies.denies(cell.module, cell.action)
    })
}
