//! Enum Registry: the closed sets every matrix and check is validated against.
//!
//! Wire strings are the exact codes the admin screens use (`"WIR"`, `"review"`,
//! `"IH-PMT"`). Parsing an unknown string is a `DomainError::Validation`.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use sitegate_core::DomainError;

/// Number of module codes in the registry.
pub const MODULE_COUNT: usize = 13;

/// Number of actions in the registry.
pub const ACTION_COUNT: usize = 5;

/// Functional area of the system that permissions are scoped to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleCode {
    #[serde(rename = "WIR")]
    Wir,
    #[serde(rename = "MIR")]
    Mir,
    #[serde(rename = "CS")]
    Cs,
    #[serde(rename = "DPR")]
    Dpr,
    #[serde(rename = "MIP")]
    Mip,
    #[serde(rename = "DS")]
    Ds,
    #[serde(rename = "RFC")]
    Rfc,
    #[serde(rename = "OBS")]
    Obs,
    #[serde(rename = "DLP")]
    Dlp,
    #[serde(rename = "LTR")]
    Ltr,
    #[serde(rename = "FDB")]
    Fdb,
    #[serde(rename = "MAITRI")]
    Maitri,
    #[serde(rename = "DASHBOARD")]
    Dashboard,
}

impl ModuleCode {
    /// All module codes, in grid order.
    pub const ALL: [ModuleCode; MODULE_COUNT] = [
        ModuleCode::Wir,
        ModuleCode::Mir,
        ModuleCode::Cs,
        ModuleCode::Dpr,
        ModuleCode::Mip,
        ModuleCode::Ds,
        ModuleCode::Rfc,
        ModuleCode::Obs,
        ModuleCode::Dlp,
        ModuleCode::Ltr,
        ModuleCode::Fdb,
        ModuleCode::Maitri,
        ModuleCode::Dashboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleCode::Wir => "WIR",
            ModuleCode::Mir => "MIR",
            ModuleCode::Cs => "CS",
            ModuleCode::Dpr => "DPR",
            ModuleCode::Mip => "MIP",
            ModuleCode::Ds => "DS",
            ModuleCode::Rfc => "RFC",
            ModuleCode::Obs => "OBS",
            ModuleCode::Dlp => "DLP",
            ModuleCode::Ltr => "LTR",
            ModuleCode::Fdb => "FDB",
            ModuleCode::Maitri => "MAITRI",
            ModuleCode::Dashboard => "DASHBOARD",
        }
    }

    /// Row position in a dense matrix.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for ModuleCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleCode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown module code '{s}'")))
    }
}

impl core::fmt::Display for ModuleCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation performable within a module.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    View,
    Raise,
    Review,
    Approve,
    Close,
}

impl Action {
    /// All actions, in grid column order.
    pub const ALL: [Action; ACTION_COUNT] = [
        Action::View,
        Action::Raise,
        Action::Review,
        Action::Approve,
        Action::Close,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Raise => "raise",
            Action::Review => "review",
            Action::Approve => "approve",
            Action::Close => "close",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Action {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown action '{s}'")))
    }
}

impl core::fmt::Display for Action {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project role a user holds; the key of role templates and project overrides.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleKey {
    Client,
    #[serde(rename = "IH-PMT")]
    IhPmt,
    Contractor,
    Consultant,
    #[serde(rename = "PMC")]
    Pmc,
    Supplier,
}

impl RoleKey {
    pub const ALL: [RoleKey; 6] = [
        RoleKey::Client,
        RoleKey::IhPmt,
        RoleKey::Contractor,
        RoleKey::Consultant,
        RoleKey::Pmc,
        RoleKey::Supplier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoleKey::Client => "Client",
            RoleKey::IhPmt => "IH-PMT",
            RoleKey::Contractor => "Contractor",
            RoleKey::Consultant => "Consultant",
            RoleKey::Pmc => "PMC",
            RoleKey::Supplier => "Supplier",
        }
    }
}

impl FromStr for RoleKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleKey::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown role '{s}'")))
    }
}

impl core::fmt::Display for RoleKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_valid_module(s: &str) -> bool {
    s.parse::<ModuleCode>().is_ok()
}

pub fn is_valid_action(s: &str) -> bool {
    s.parse::<Action>().is_ok()
}

pub fn is_valid_role(s: &str) -> bool {
    s.parse::<RoleKey>().is_ok()
}

/// Cells that are unconditionally false at every layer.
///
/// Letters (`LTR`) can never be reviewed or approved through the permission
/// grid; every write path and the resolver consult this before anything else.
pub fn is_locked(module: ModuleCode, action: Action) -> bool {
    match (module, action) {
        (ModuleCode::Ltr, Action::Review | Action::Approve) => true,
        (ModuleCode::Ltr, Action::View | Action::Raise | Action::Close) => false,
        (
            ModuleCode::Wir
            | ModuleCode::Mir
            | ModuleCode::Cs
            | ModuleCode::Dpr
            | ModuleCode::Mip
            | ModuleCode::Ds
            | ModuleCode::Rfc
            | ModuleCode::Obs
            | ModuleCode::Dlp
            | ModuleCode::Fdb
            | ModuleCode::Maitri
            | ModuleCode::Dashboard,
            _,
        ) => false,
    }
}

/// A single (module, action) coordinate in a permission grid.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    pub module: ModuleCode,
    pub action: Action,
}

impl Cell {
    pub fn new(module: ModuleCode, action: Action) -> Self {
        Self { module, action }
    }

    pub fn is_locked(self) -> bool {
        is_locked(self.module, self.action)
    }

    /// Every cell of the grid, row-major.
    pub fn all() -> impl Iterator<Item = Cell> {
        ModuleCode::ALL
            .into_iter()
            .flat_map(|m| Action::ALL.into_iter().map(move |a| Cell::new(m, a)))
    }

    /// The locked cells, in grid order.
    pub fn locked() -> impl Iterator<Item = Cell> {
        Cell::all().filter(|c| c.is_locked())
    }
}

impl core::fmt::Display for Cell {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.module, self.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_parse_back() {
        for m in ModuleCode::ALL {
            assert_eq!(m.as_str().parse::<ModuleCode>().unwrap(), m);
        }
        for a in Action::ALL {
            assert_eq!(a.as_str().parse::<Action>().unwrap(), a);
        }
        for r in RoleKey::ALL {
            assert_eq!(r.as_str().parse::<RoleKey>().unwrap(), r);
        }
    }

    #[test]
    fn serde_uses_wire_codes() {
        assert_eq!(serde_json::to_string(&RoleKey::IhPmt).unwrap(), "\"IH-PMT\"");
        assert_eq!(serde_json::to_string(&ModuleCode::Maitri).unwrap(), "\"MAITRI\"");
        assert_eq!(serde_json::to_string(&Action::Approve).unwrap(), "\"approve\"");
        let r: RoleKey = serde_json::from_str("\"PMC\"").unwrap();
        assert_eq!(r, RoleKey::Pmc);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(!is_valid_module("wir"));
        assert!(!is_valid_module("XYZ"));
        assert!(!is_valid_action("delete"));
        assert!(!is_valid_role("Admin"));
        assert!(is_valid_role("IH-PMT"));

        let err = "delete".parse::<Action>().unwrap_err();
        assert_eq!(err, DomainError::validation("unknown action 'delete'"));
    }

    #[test]
    fn index_matches_all_order() {
        for (i, m) in ModuleCode::ALL.into_iter().enumerate() {
            assert_eq!(m.index(), i);
        }
        for (i, a) in Action::ALL.into_iter().enumerate() {
            assert_eq!(a.index(), i);
        }
    }

    #[test]
    fn only_ltr_review_and_approve_are_locked() {
        let locked: Vec<Cell> = Cell::locked().collect();
        assert_eq!(
            locked,
            vec![
                Cell::new(ModuleCode::Ltr, Action::Review),
                Cell::new(ModuleCode::Ltr, Action::Approve),
            ]
        );
        assert_eq!(Cell::all().count(), MODULE_COUNT * ACTION_COUNT);
    }
}
