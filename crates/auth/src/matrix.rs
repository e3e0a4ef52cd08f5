//! Permission grids and their JSON wire forms.
//!
//! - [`AllowMatrix`]: dense `module -> action -> bool` grid used by role
//!   templates and project overrides. A plain `Copy` value, so a store can hand
//!   out snapshots and replace them wholesale without readers ever observing a
//!   half-edited grid.
//! - [`DenyMatrix`]: sparse deny-only exceptions for a single user in a project.
//!   Only denied cells are stored; a module with no denied actions is removed.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use sitegate_core::{DomainError, DomainResult};

use crate::registry::{is_locked, Action, Cell, ModuleCode, ACTION_COUNT, MODULE_COUNT};

/// Wire form of an allow grid: `{ "WIR": { "view": true, ... }, ... }`.
pub type WireAllowMatrix = BTreeMap<String, BTreeMap<String, bool>>;

/// Wire form of a deny grid: `{ "MIR": { "close": "deny" } }`.
pub type WireDenyMatrix = BTreeMap<String, BTreeMap<String, String>>;

/// The only value a deny-matrix cell may carry on the wire.
pub const DENY_LITERAL: &str = "deny";

// ─────────────────────────────────────────────────────────────────────────────
// AllowMatrix
// ─────────────────────────────────────────────────────────────────────────────

/// Total mapping of every (module, action) cell to allow/deny.
///
/// Locked cells (see [`is_locked`]) always read as `false`. A raw `true` can be
/// requested through [`AllowMatrix::set`] or the wire form, but it is masked on
/// every read and cleared by [`AllowMatrix::enforce_invariants`], which stores
/// call on every write.
#[derive(Debug, Copy, Clone)]
pub struct AllowMatrix {
    cells: [[bool; ACTION_COUNT]; MODULE_COUNT],
}

impl AllowMatrix {
    /// The default grid: nothing allowed.
    pub const fn all_false() -> Self {
        Self {
            cells: [[false; ACTION_COUNT]; MODULE_COUNT],
        }
    }

    /// Every cell allowed except the locked ones.
    pub fn allow_all() -> Self {
        Self::from_fn(|_| true)
    }

    /// Build a grid by evaluating `f` for each cell.
    pub fn from_fn(mut f: impl FnMut(Cell) -> bool) -> Self {
        let mut m = Self::all_false();
        for cell in Cell::all() {
            m.cells[cell.module.index()][cell.action.index()] = f(cell) && !cell.is_locked();
        }
        m
    }

    pub fn get(&self, module: ModuleCode, action: Action) -> bool {
        !is_locked(module, action) && self.cells[module.index()][action.index()]
    }

    pub fn set(&mut self, module: ModuleCode, action: Action, allowed: bool) {
        self.cells[module.index()][action.index()] = allowed;
    }

    /// Copy of this grid with one cell changed.
    pub fn with(mut self, module: ModuleCode, action: Action, allowed: bool) -> Self {
        self.set(module, action, allowed);
        self
    }

    /// Clear any locked cell that was requested as `true`.
    ///
    /// Returns the cells that had to be coerced (empty when the grid was clean).
    pub fn enforce_invariants(&mut self) -> Vec<Cell> {
        let mut coerced = Vec::new();
        for cell in Cell::locked() {
            let slot = &mut self.cells[cell.module.index()][cell.action.index()];
            if *slot {
                *slot = false;
                coerced.push(cell);
            }
        }
        coerced
    }

    /// Every cell with its effective value, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (Cell, bool)> + '_ {
        Cell::all().map(|c| (c, self.get(c.module, c.action)))
    }

    /// Number of allowed cells.
    pub fn allowed_count(&self) -> usize {
        self.cells().filter(|(_, v)| *v).count()
    }

    /// Parse the wire form, rejecting unknown module/action keys.
    ///
    /// Missing modules or actions are `false`. Locked cells are kept as requested
    /// here; callers persisting the grid must run [`Self::enforce_invariants`].
    pub fn from_wire(wire: &WireAllowMatrix) -> DomainResult<Self> {
        let mut m = Self::all_false();
        for (module_key, row) in wire {
            let module: ModuleCode = module_key.parse()?;
            for (action_key, allowed) in row {
                let action: Action = action_key.parse().map_err(|_| {
                    DomainError::validation(format!(
                        "unknown action '{action_key}' in module '{module_key}'"
                    ))
                })?;
                m.set(module, action, *allowed);
            }
        }
        Ok(m)
    }
}

impl Default for AllowMatrix {
    fn default() -> Self {
        Self::all_false()
    }
}

impl PartialEq for AllowMatrix {
    fn eq(&self, other: &Self) -> bool {
        Cell::all().all(|c| self.get(c.module, c.action) == other.get(c.module, c.action))
    }
}

impl Eq for AllowMatrix {}

struct AllowRow<'a> {
    matrix: &'a AllowMatrix,
    module: ModuleCode,
}

impl Serialize for AllowRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            Action::ALL
                .iter()
                .map(|a| (a.as_str(), self.matrix.get(self.module, *a))),
        )
    }
}

impl Serialize for AllowMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(ModuleCode::ALL.iter().map(|m| {
            (
                m.as_str(),
                AllowRow {
                    matrix: self,
                    module: *m,
                },
            )
        }))
    }
}

impl<'de> Deserialize<'de> for AllowMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireAllowMatrix::deserialize(deserializer)?;
        let mut m = AllowMatrix::from_wire(&wire).map_err(D::Error::custom)?;
        m.enforce_invariants();
        Ok(m)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DenyMatrix
// ─────────────────────────────────────────────────────────────────────────────

/// Value written to a single user-override cell.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellOverride {
    /// Defer to the base grid (removes the deny entry).
    Inherit,
    /// Revoke the cell for this user.
    Deny,
}

impl core::str::FromStr for CellOverride {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inherit" => Ok(CellOverride::Inherit),
            "deny" => Ok(CellOverride::Deny),
            other => Err(DomainError::validation(format!(
                "cell value must be 'inherit' or 'deny', got '{other}'"
            ))),
        }
    }
}

/// Sparse deny-only grid. An empty matrix means "fully inherited".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyMatrix {
    entries: BTreeMap<ModuleCode, BTreeSet<Action>>,
}

impl DenyMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of denied cells.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn denies(&self, module: ModuleCode, action: Action) -> bool {
        self.entries
            .get(&module)
            .is_some_and(|actions| actions.contains(&action))
    }

    /// Apply a single cell edit.
    ///
    /// `Inherit` removes the action, and the module entry too once it is empty.
    /// Locked cells are rejected for either value. Returns whether anything changed.
    pub fn set_cell(
        &mut self,
        module: ModuleCode,
        action: Action,
        value: CellOverride,
    ) -> DomainResult<bool> {
        if is_locked(module, action) {
            return Err(DomainError::validation(format!(
                "{} is always denied and cannot be overridden per user",
                Cell::new(module, action)
            )));
        }

        let changed = match value {
            CellOverride::Deny => self.entries.entry(module).or_default().insert(action),
            CellOverride::Inherit => {
                let Some(actions) = self.entries.get_mut(&module) else {
                    return Ok(false);
                };
                let removed = actions.remove(&action);
                if actions.is_empty() {
                    self.entries.remove(&module);
                }
                removed
            }
        };
        Ok(changed)
    }

    /// Copy of this matrix with one cell edited.
    pub fn with_cell(
        &self,
        module: ModuleCode,
        action: Action,
        value: CellOverride,
    ) -> DomainResult<Self> {
        let mut next = self.clone();
        next.set_cell(module, action, value)?;
        Ok(next)
    }

    /// Parse the sparse wire form.
    ///
    /// Every value must be the literal `"deny"`; absence is the only way to
    /// express "inherit". Empty module objects are dropped.
    pub fn from_wire(wire: &WireDenyMatrix) -> DomainResult<Self> {
        let mut m = Self::new();
        for (module_key, row) in wire {
            let module: ModuleCode = module_key.parse()?;
            for (action_key, value) in row {
                let action: Action = action_key.parse().map_err(|_| {
                    DomainError::validation(format!(
                        "unknown action '{action_key}' in module '{module_key}'"
                    ))
                })?;
                if value != DENY_LITERAL {
                    return Err(DomainError::validation(format!(
                        "user override cell {module_key}.{action_key} must be \"deny\", got \"{value}\""
                    )));
                }
                m.set_cell(module, action, CellOverride::Deny)?;
            }
        }
        Ok(m)
    }
}

struct DenyRow<'a>(&'a BTreeSet<Action>);

impl Serialize for DenyRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|a| (a.as_str(), DENY_LITERAL)))
    }
}

impl Serialize for DenyMatrix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.entries
                .iter()
                .map(|(m, actions)| (m.as_str(), DenyRow(actions))),
        )
    }
}

impl<'de> Deserialize<'de> for DenyMatrix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireDenyMatrix::deserialize(deserializer)?;
        DenyMatrix::from_wire(&wire).map_err(D::Error::custom)
    }
}
