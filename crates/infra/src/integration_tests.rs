//! Integration tests for the full resolution pipeline.
//!
//! Tests: admin writes → stores → resolver → effective decision
//!
//! Verifies:
//! - The five reference scenarios (template grant, override replacement,
//!   per-user deny, LTR coercion, reset to template)
//! - Layer properties over generated grids (full replacement, template
//!   fallback, per-user isolation, cell clear, reset idempotence)
//! - Optimistic concurrency conflicts are detected, including across resets

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;

    use sitegate_auth::{Action, AllowMatrix, Cell, CellOverride, DenyMatrix, ModuleCode, RoleKey};
    use sitegate_core::{ExpectedVersion, ProjectId, UserId};

    use crate::membership::InMemoryMembershipDirectory;
    use crate::resolver::PermissionResolver;
    use crate::store::{
        InMemoryProjectOverrideStore, InMemoryRoleTemplateStore, InMemoryUserOverrideStore,
        ProjectOverrideStore, RoleTemplateStore, StoreError, UserOverrideStore,
    };

    type TestResolver = PermissionResolver<
        Arc<InMemoryRoleTemplateStore>,
        Arc<InMemoryProjectOverrideStore>,
        Arc<InMemoryUserOverrideStore>,
        Arc<InMemoryMembershipDirectory>,
    >;

    fn setup() -> TestResolver {
        PermissionResolver::new(
            Arc::new(InMemoryRoleTemplateStore::new()),
            Arc::new(InMemoryProjectOverrideStore::new()),
            Arc::new(InMemoryUserOverrideStore::new()),
            Arc::new(InMemoryMembershipDirectory::new()),
        )
    }

    fn contractor_template() -> AllowMatrix {
        AllowMatrix::all_false()
            .with(ModuleCode::Wir, Action::Raise, true)
            .with(ModuleCode::Wir, Action::View, true)
            .with(ModuleCode::Mir, Action::Close, true)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reference scenarios
    // ─────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn template_grant_resolves_true() {
        let r = setup();
        let (p1, u1) = (ProjectId::new(), UserId::new());
        r.templates()
            .put(RoleKey::Contractor, contractor_template(), ExpectedVersion::Any)
            .await
            .unwrap();

        assert!(r.resolve(ModuleCode::Wir, Action::Raise, RoleKey::Contractor, p1, u1).await.unwrap());
    }

    #[tokio::test]
    async fn project_override_wins_over_template() {
        let r = setup();
        let (p1, u1) = (ProjectId::new(), UserId::new());
        r.templates()
            .put(RoleKey::Contractor, contractor_template(), ExpectedVersion::Any)
            .await
            .unwrap();
        r.project_overrides()
            .put(
                p1,
                RoleKey::Contractor,
                contractor_template().with(ModuleCode::Wir, Action::Raise, false),
                ExpectedVersion::Any,
            )
            .await
            .unwrap();

        assert!(!r.resolve(ModuleCode::Wir, Action::Raise, RoleKey::Contractor, p1, u1).await.unwrap());
        // Another project still uses the template.
        assert!(r
            .resolve(ModuleCode::Wir, Action::Raise, RoleKey::Contractor, ProjectId::new(), u1)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn user_deny_is_scoped_to_that_user() {
        let r = setup();
        let (p1, u1, u2) = (ProjectId::new(), UserId::new(), UserId::new());
        r.templates()
            .put(RoleKey::Contractor, contractor_template(), ExpectedVersion::Any)
            .await
            .unwrap();
        r.user_overrides()
            .set_cell(p1, u1, ModuleCode::Mir, Action::Close, CellOverride::Deny, ExpectedVersion::Any)
            .await
            .unwrap();

        assert!(!r.resolve(ModuleCode::Mir, Action::Close, RoleKey::Contractor, p1, u1).await.unwrap());
        assert!(r.resolve(ModuleCode::Mir, Action::Close, RoleKey::Contractor, p1, u2).await.unwrap());
    }

    #[tokio::test]
    async fn ltr_review_is_coerced_on_every_write_path() {
        let r = setup();
        let (p1, u1) = (ProjectId::new(), UserId::new());

        let saved = r
            .templates()
            .put(RoleKey::Pmc, AllowMatrix::allow_all(), ExpectedVersion::Any)
            .await
            .unwrap();
        assert!(!saved.matrix.get(ModuleCode::Ltr, Action::Review));

        let saved = r
            .project_overrides()
            .put(p1, RoleKey::Pmc, AllowMatrix::allow_all(), ExpectedVersion::Any)
            .await
            .unwrap();
        assert!(!saved.matrix.get(ModuleCode::Ltr, Action::Approve));

        let err = r
            .user_overrides()
            .set_cell(p1, u1, ModuleCode::Ltr, Action::Review, CellOverride::Deny, ExpectedVersion::Any)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        for action in [Action::Review, Action::Approve] {
            assert!(!r.resolve(ModuleCode::Ltr, action, RoleKey::Pmc, p1, u1).await.unwrap());
        }
        assert!(r.resolve(ModuleCode::Ltr, Action::View, RoleKey::Pmc, p1, u1).await.unwrap());
    }

    #[tokio::test]
    async fn reset_to_template_restores_template_grant() {
        let r = setup();
        let (p1, u1) = (ProjectId::new(), UserId::new());
        r.templates()
            .put(RoleKey::Contractor, contractor_template(), ExpectedVersion::Any)
            .await
            .unwrap();
        r.project_overrides()
            .put(p1, RoleKey::Contractor, AllowMatrix::all_false(), ExpectedVersion::Any)
            .await
            .unwrap();
        assert!(!r.resolve(ModuleCode::Wir, Action::Raise, RoleKey::Contractor, p1, u1).await.unwrap());

        let template = r.reset_to_template(p1, RoleKey::Contractor).await.unwrap();
        assert_eq!(template.matrix, contractor_template());
        assert!(r.project_overrides().get(p1, RoleKey::Contractor).await.unwrap().is_none());
        assert!(r.resolve(ModuleCode::Wir, Action::Raise, RoleKey::Contractor, p1, u1).await.unwrap());
    }

    #[tokio::test]
    async fn stale_writers_are_rejected() {
        let r = setup();
        let p1 = ProjectId::new();

        let first = r
            .project_overrides()
            .put(p1, RoleKey::Client, AllowMatrix::all_false(), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        // Both editors loaded version 1; only the first save lands.
        r.project_overrides()
            .put(p1, RoleKey::Client, AllowMatrix::allow_all(), ExpectedVersion::Exact(1))
            .await
            .unwrap();
        let err = r
            .project_overrides()
            .put(p1, RoleKey::Client, AllowMatrix::all_false(), ExpectedVersion::Exact(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = r.project_overrides().get(p1, RoleKey::Client).await.unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert!(stored.matrix.get(ModuleCode::Wir, Action::Raise));
    }

    #[tokio::test]
    async fn editor_holding_pre_reset_version_cannot_overwrite() {
        let r = setup();
        let p1 = ProjectId::new();

        // Editor A loads the override at version 1.
        let seen_by_a = r
            .project_overrides()
            .put(p1, RoleKey::Consultant, AllowMatrix::all_false(), ExpectedVersion::Exact(0))
            .await
            .unwrap();

        // Editor B resets to the template and saves a new override.
        r.reset_to_template(p1, RoleKey::Consultant).await.unwrap();
        let saved_by_b = r
            .project_overrides()
            .put(p1, RoleKey::Consultant, contractor_template(), ExpectedVersion::Exact(0))
            .await
            .unwrap();
        assert!(saved_by_b.version > seen_by_a.version);

        let err = r
            .project_overrides()
            .put(
                p1,
                RoleKey::Consultant,
                AllowMatrix::allow_all(),
                ExpectedVersion::Exact(seen_by_a.version),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let stored = r.project_overrides().get(p1, RoleKey::Consultant).await.unwrap().unwrap();
        assert_eq!(stored.matrix, contractor_template());
    }

    #[tokio::test]
    async fn concurrent_writers_never_splice_grids() {
        let r = Arc::new(setup());
        let p1 = ProjectId::new();
        let grids = [AllowMatrix::all_false(), AllowMatrix::allow_all()];

        let mut handles = Vec::new();
        for i in 0..32 {
            let r = r.clone();
            let grid = grids[i % 2];
            handles.push(tokio::spawn(async move {
                r.project_overrides()
                    .put(p1, RoleKey::Supplier, grid, ExpectedVersion::Any)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = r.project_overrides().get(p1, RoleKey::Supplier).await.unwrap().unwrap();
        assert_eq!(stored.version, 32);
        assert!(stored.matrix == grids[0] || stored.matrix == grids[1]);
    }

    #[tokio::test]
    async fn concurrent_first_cell_edits_all_land() {
        let r = Arc::new(setup());
        let (p1, u1) = (ProjectId::new(), UserId::new());
        let cells = [
            (ModuleCode::Wir, Action::Raise),
            (ModuleCode::Mir, Action::Close),
            (ModuleCode::Dpr, Action::View),
            (ModuleCode::Rfc, Action::Review),
        ];

        let mut handles = Vec::new();
        for (module, action) in cells {
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                r.user_overrides()
                    .set_cell(p1, u1, module, action, CellOverride::Deny, ExpectedVersion::Any)
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let stored = r.user_overrides().get(p1, u1).await.unwrap();
        assert_eq!(stored.version, 4);
        for (module, action) in cells {
            assert!(stored.matrix.denies(module, action));
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Properties over generated grids
    // ─────────────────────────────────────────────────────────────────────

    fn arb_matrix() -> impl Strategy<Value = AllowMatrix> {
        prop::collection::vec(any::<bool>(), Cell::all().count()).prop_map(|bits| {
            let mut m = AllowMatrix::all_false();
            for (cell, bit) in Cell::all().zip(bits) {
                m.set(cell.module, cell.action, bit);
            }
            m
        })
    }

    fn arb_open_cell() -> impl Strategy<Value = Cell> {
        let open: Vec<Cell> = Cell::all().filter(|c| !c.is_locked()).collect();
        prop::sample::select(open)
    }

    fn run<F>(test: F) -> Result<(), TestCaseError>
    where
        F: std::future::Future<Output = Result<(), TestCaseError>>,
    {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .map_err(|e| TestCaseError::fail(e.to_string()))?
            .block_on(test)
    }

    fn fail(e: impl std::fmt::Display) -> TestCaseError {
        TestCaseError::fail(e.to_string())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: without an override and without denies, resolution equals the template.
        #[test]
        fn template_fallback(template in arb_matrix()) {
            run(async {
                let r = setup();
                let (p, u) = (ProjectId::new(), UserId::new());
                r.templates().put(RoleKey::Consultant, template, ExpectedVersion::Any).await.map_err(fail)?;
                for cell in Cell::all().filter(|c| !c.is_locked()) {
                    let got = r.resolve(cell.module, cell.action, RoleKey::Consultant, p, u).await.map_err(fail)?;
                    prop_assert_eq!(got, template.get(cell.module, cell.action));
                }
                Ok(())
            })?;
        }

        /// Property: a saved override fully determines the base; the template is irrelevant.
        #[test]
        fn override_is_full_replacement(template in arb_matrix(), project in arb_matrix()) {
            run(async {
                let r = setup();
                let (p, u) = (ProjectId::new(), UserId::new());
                r.templates().put(RoleKey::Client, template, ExpectedVersion::Any).await.map_err(fail)?;
                r.project_overrides().put(p, RoleKey::Client, project, ExpectedVersion::Any).await.map_err(fail)?;
                for cell in Cell::all().filter(|c| !c.is_locked()) {
                    let got = r.resolve(cell.module, cell.action, RoleKey::Client, p, u).await.map_err(fail)?;
                    prop_assert_eq!(got, project.get(cell.module, cell.action));
                }
                Ok(())
            })?;
        }

        /// Property: after reset the effective grid is the template's.
        #[test]
        fn reset_is_idempotent(template in arb_matrix(), project in arb_matrix()) {
            run(async {
                let r = setup();
                let (p, u) = (ProjectId::new(), UserId::new());
                r.templates().put(RoleKey::IhPmt, template, ExpectedVersion::Any).await.map_err(fail)?;
                let direct = r.resolve_effective_matrix(RoleKey::IhPmt, p, u).await.map_err(fail)?;

                r.project_overrides().put(p, RoleKey::IhPmt, project, ExpectedVersion::Any).await.map_err(fail)?;
                r.reset_to_template(p, RoleKey::IhPmt).await.map_err(fail)?;
                r.reset_to_template(p, RoleKey::IhPmt).await.map_err(fail)?;

                let after = r.resolve_effective_matrix(RoleKey::IhPmt, p, u).await.map_err(fail)?;
                prop_assert_eq!(after, direct);
                Ok(())
            })?;
        }

        /// Property: a deny for one user leaves every other user's result unchanged.
        #[test]
        fn denies_are_isolated_per_user(template in arb_matrix(), cell in arb_open_cell()) {
            run(async {
                let r = setup();
                let (p, a, b) = (ProjectId::new(), UserId::new(), UserId::new());
                r.templates().put(RoleKey::Pmc, template, ExpectedVersion::Any).await.map_err(fail)?;

                let before = r.resolve_effective_matrix(RoleKey::Pmc, p, b).await.map_err(fail)?;
                r.user_overrides()
                    .set_cell(p, a, cell.module, cell.action, CellOverride::Deny, ExpectedVersion::Any)
                    .await
                    .map_err(fail)?;
                let after = r.resolve_effective_matrix(RoleKey::Pmc, p, b).await.map_err(fail)?;

                prop_assert_eq!(before, after);
                prop_assert!(!r.resolve(cell.module, cell.action, RoleKey::Pmc, p, a).await.map_err(fail)?);
                Ok(())
            })?;
        }

        /// Property: deny then inherit restores the exact prior value and an empty row.
        #[test]
        fn cell_clear_restores_base(template in arb_matrix(), cell in arb_open_cell()) {
            run(async {
                let r = setup();
                let (p, u) = (ProjectId::new(), UserId::new());
                r.templates().put(RoleKey::Supplier, template, ExpectedVersion::Any).await.map_err(fail)?;

                let before = r.resolve(cell.module, cell.action, RoleKey::Supplier, p, u).await.map_err(fail)?;
                r.user_overrides()
                    .set_cell(p, u, cell.module, cell.action, CellOverride::Deny, ExpectedVersion::Any)
                    .await
                    .map_err(fail)?;
                let cleared = r
                    .user_overrides()
                    .set_cell(p, u, cell.module, cell.action, CellOverride::Inherit, ExpectedVersion::Any)
                    .await
                    .map_err(fail)?;
                let after = r.resolve(cell.module, cell.action, RoleKey::Supplier, p, u).await.map_err(fail)?;

                prop_assert_eq!(before, after);
                prop_assert_eq!(cleared.matrix, DenyMatrix::new());
                Ok(())
            })?;
        }
    }
}
