use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};

use workflow_authz::authz::{
    Action, ActionKind, AuthorizationError, AuthorizationResource, AuthorizationService, ConditionOperator,
    ConfigurationError, EntityAuthorizationRequest, FieldPath, InMemoryRoleRepository, Permission, PermissionCondition,
    Predicate, Principal, RelatedEntityAuthorizationRequest, ResourceRegistry, Role, RoleRepository, SecurityContext,
    TaskScopedPrincipal,
};
use workflow_authz::db::{self, SqliteEntityLoader, SqliteRoleRepository};
use workflow_authz::deployment::{DeploymentError, PermissionDefinition, PermissionDeployer};
use workflow_authz::resources::{Document, Task};

async fn setup() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("authz.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    sqlx::query("INSERT INTO process_definitions (id, definition_key, version) VALUES ('pd-1', 'loan', 1)")
        .execute(&pool)
        .await?;
    for (id, team, region) in [("doc-n", "north", "eu"), ("doc-s", "south", "us")] {
        sqlx::query("INSERT INTO documents (id, definition_name, assignee, team, content) VALUES (?, 'loan', NULL, ?, ?)")
            .bind(id)
            .bind(team)
            .bind(json!({ "region": region }).to_string())
            .execute(&pool)
            .await?;
    }
    for (id, assignee, team, document) in [
        ("t-1", Some("carol"), "north", "doc-n"),
        ("t-2", None, "north", "doc-s"),
        ("t-3", Some("dave"), "south", "doc-n"),
        ("t-4", None, "south", "doc-s"),
    ] {
        sqlx::query(
            "INSERT INTO tasks (id, name, assignee, candidate_group, case_team, document_id, process_definition_id) VALUES (?, ?, ?, NULL, ?, ?, 'pd-1')",
        )
        .bind(id)
        .bind(format!("Review {id}"))
        .bind(assignee)
        .bind(team)
        .bind(document)
        .execute(&pool)
        .await?;
    }

    Ok((dir, pool))
}

fn definitions() -> Result<Vec<PermissionDefinition>> {
    Ok(serde_json::from_value(json!([
        {
            "resourceType": "task",
            "action": "view_list",
            "roleKey": "CASE_HANDLER",
            "conditions": [{ "type": "field", "field": "case_team", "operator": "==", "value": "north" }]
        },
        {
            "resourceType": "task",
            "action": "view_list",
            "roleKey": "CASE_HANDLER",
            "conditions": [{ "type": "field", "field": "assignee", "operator": "==", "value": "${currentUserIdentifier}" }]
        },
        {
            "resourceType": "task",
            "action": "claim",
            "roleKey": "CASE_HANDLER",
            "conditions": [{
                "type": "container",
                "resourceType": "document",
                "conditions": [{ "type": "field", "field": "content.region", "operator": "==", "value": "eu" }]
            }]
        },
        { "resourceType": "document", "action": "view", "roleKey": "ADMIN" }
    ]))?)
}

async fn deploy(pool: &SqlitePool) -> Result<(Arc<ResourceRegistry>, SqliteRoleRepository)> {
    let registry = Arc::new(db::sqlite_registry(pool)?);
    let repository = SqliteRoleRepository::new(pool.clone(), registry.clone());
    let summary = PermissionDeployer::new(registry.clone(), repository.clone())
        .deploy(&definitions()?)
        .await?;
    assert_eq!(summary.permissions, 4);
    assert_eq!(summary.roles, 2);
    Ok((registry, repository))
}

#[tokio::test]
async fn deployed_permissions_round_trip_through_the_store() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let (_registry, repository) = deploy(&pool).await?;
    repository.assign_role("carol", &Role::new("CASE_HANDLER")).await?;
    repository.assign_role("carol", &Role::new("CASE_HANDLER")).await?;

    let roles = repository.roles_of_user("carol").await?;
    assert_eq!(roles.len(), 1);

    let granting = repository
        .roles_granting(Task::resource_type(), ActionKind::ViewList)
        .await?;
    assert!(granting.contains(&Role::new("CASE_HANDLER")));

    let stored = repository.permissions_for(&Role::new("CASE_HANDLER"), Task::resource_type()).await?;
    assert_eq!(stored.len(), 3);
    assert_eq!(repository.all_permissions().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn invalid_definitions_leave_stored_permissions_untouched() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let (registry, repository) = deploy(&pool).await?;

    let broken: Vec<PermissionDefinition> = serde_json::from_value(json!([
        { "resourceType": "task", "action": "view", "roleKey": "USER" },
        { "resourceType": "execution", "action": "delete", "roleKey": "USER" }
    ]))?;
    let err = PermissionDeployer::new(registry, repository.clone())
        .deploy(&broken)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::Definition { index: 1, .. }));
    assert_eq!(repository.all_permissions().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn list_filter_agrees_with_single_checks() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let (registry, repository) = deploy(&pool).await?;
    repository.assign_role("carol", &Role::new("CASE_HANDLER")).await?;
    let roles = repository.roles_of_user("carol").await?;

    let service = AuthorizationService::new(registry, Arc::new(repository), Arc::new(TaskScopedPrincipal));
    let tasks = SqliteEntityLoader::new::<Task>(pool.clone(), Arc::new(db::table_mappings()));

    let carol = Principal::new("carol").with_roles(roles);
    SecurityContext::scope(carol, async {
        for action in [Action::<Task>::VIEW_LIST, Action::CLAIM] {
            let spec = service
                .get_authorization_specification(EntityAuthorizationRequest::<Task>::for_any(action)?, None)
                .await?;
            let listed: Vec<String> = tasks
                .find_matching_as::<Task>(spec.predicate())
                .await?
                .into_iter()
                .map(|task| task.id)
                .collect();

            let mut checked = Vec::new();
            for task in tasks.find_matching_as::<Task>(&Predicate::TRUE).await? {
                if service
                    .has_permission(EntityAuthorizationRequest::for_instance(action, task.clone())?)
                    .await?
                {
                    checked.push(task.id);
                }
            }
            assert_eq!(listed, checked, "{action} filter and checks disagree");
        }

        let view_list = service
            .get_authorization_specification(EntityAuthorizationRequest::<Task>::for_any(Action::VIEW_LIST)?, None)
            .await?;
        let northern_or_mine: Vec<String> = tasks
            .find_matching_as::<Task>(view_list.predicate())
            .await?
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(northern_or_mine, vec!["t-1", "t-2"]);

        let claim = service
            .get_authorization_specification(EntityAuthorizationRequest::<Task>::for_any(Action::CLAIM)?, None)
            .await?;
        let claimable: Vec<String> = tasks
            .find_matching_as::<Task>(claim.predicate())
            .await?
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(claimable, vec!["t-1", "t-3"]);

        let unassigned = Predicate::equal(FieldPath::parse("assignee")?, serde_json::Value::Null);
        let claimable_unassigned = tasks.find_matching_as::<Task>(&claim.and(unassigned)).await?;
        assert!(claimable_unassigned.is_empty());
        anyhow::Ok(())
    })
    .await
}

#[tokio::test]
async fn related_checks_load_documents_from_the_database() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let (registry, repository) = deploy(&pool).await?;
    let service = AuthorizationService::new(registry, Arc::new(repository), Arc::new(TaskScopedPrincipal));

    let carol = Principal::new("carol").with_roles([Role::new("CASE_HANDLER")]);
    SecurityContext::scope(carol, async {
        let eu = RelatedEntityAuthorizationRequest::new::<Document>(Action::<Task>::CLAIM, "doc-n")?;
        let us = RelatedEntityAuthorizationRequest::new::<Document>(Action::<Task>::CLAIM, "doc-s")?;
        assert!(service.has_permission(eu).await?);
        assert!(!service.has_permission(us).await?);
        anyhow::Ok(())
    })
    .await
}

#[tokio::test]
async fn numeric_conditions_never_match_text_columns() -> Result<()> {
    let (_dir, pool) = setup().await?;
    sqlx::query(
        "INSERT INTO tasks (id, name, case_team, process_definition_id) VALUES ('t-5', 'Review t-5', '5', 'pd-1')",
    )
    .execute(&pool)
    .await?;

    let repository = InMemoryRoleRepository::new();
    repository.grant(Permission::new(Role::new("NUMERIC"), Action::<Task>::VIEW_LIST).with_conditions(vec![
        PermissionCondition::field("case_team", ConditionOperator::EqualTo, 5),
    ]))?;
    repository.grant(Permission::new(Role::new("TEXT"), Action::<Task>::VIEW_LIST).with_conditions(vec![
        PermissionCondition::field("case_team", ConditionOperator::EqualTo, "5"),
    ]))?;
    repository.assign("nora", Role::new("NUMERIC"))?;
    repository.assign("tess", Role::new("TEXT"))?;

    let roles = [
        ("nora", repository.roles_of_user("nora").await?),
        ("tess", repository.roles_of_user("tess").await?),
    ];
    let registry = Arc::new(db::sqlite_registry(&pool)?);
    let service = AuthorizationService::new(registry, Arc::new(repository), Arc::new(TaskScopedPrincipal));
    let tasks = SqliteEntityLoader::new::<Task>(pool.clone(), Arc::new(db::table_mappings()));

    for ((user, roles), expected) in roles.into_iter().zip([Vec::<String>::new(), vec!["t-5".to_string()]]) {
        let principal = Principal::new(user).with_roles(roles);
        let (listed, checked) = SecurityContext::scope(principal, async {
            let spec = service
                .get_authorization_specification(EntityAuthorizationRequest::<Task>::for_any(Action::VIEW_LIST)?, None)
                .await?;
            let listed: Vec<String> = tasks
                .find_matching_as::<Task>(spec.predicate())
                .await?
                .into_iter()
                .map(|task| task.id)
                .collect();

            let mut checked = Vec::new();
            for task in tasks.find_matching_as::<Task>(&Predicate::TRUE).await? {
                if service
                    .has_permission(EntityAuthorizationRequest::for_instance(Action::VIEW_LIST, task.clone())?)
                    .await?
                {
                    checked.push(task.id);
                }
            }
            anyhow::Ok((listed, checked))
        })
        .await?;

        assert_eq!(listed, checked, "filter and checks disagree for {user}");
        assert_eq!(listed, expected);
    }
    Ok(())
}

#[tokio::test]
async fn dotted_paths_on_plain_columns_fail_both_ways() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let (registry, sqlite_repository) = deploy(&pool).await?;

    let nested: Vec<PermissionDefinition> = serde_json::from_value(json!([{
        "resourceType": "task",
        "action": "view",
        "roleKey": "USER",
        "conditions": [{ "type": "field", "field": "case_team.name", "operator": "==", "value": "north" }]
    }]))?;
    let err = PermissionDeployer::new(registry.clone(), sqlite_repository.clone())
        .deploy(&nested)
        .await
        .unwrap_err();
    assert!(matches!(err, DeploymentError::Definition { index: 0, .. }));
    assert_eq!(sqlite_repository.all_permissions().await?.len(), 4);

    // Permissions that never went through deployment are rejected when compiled.
    let repository = InMemoryRoleRepository::new();
    repository.grant(Permission::new(Role::new("USER"), Action::<Task>::VIEW).with_conditions(vec![
        PermissionCondition::field("case_team.name", ConditionOperator::EqualTo, "north"),
    ]))?;
    let service = AuthorizationService::new(registry, Arc::new(repository), Arc::new(TaskScopedPrincipal));
    let tasks = SqliteEntityLoader::new::<Task>(pool.clone(), Arc::new(db::table_mappings()));

    let user = Principal::new("uma").with_roles([Role::new("USER")]);
    SecurityContext::scope(user, async {
        let listed = service
            .get_authorization_specification(EntityAuthorizationRequest::<Task>::for_any(Action::VIEW)?, None)
            .await;
        assert!(matches!(
            listed,
            Err(AuthorizationError::Configuration(ConfigurationError::InvalidFieldPath(_)))
        ));

        let task = tasks
            .find_matching_as::<Task>(&Predicate::TRUE)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no tasks seeded"))?;
        let checked = service
            .has_permission(EntityAuthorizationRequest::for_instance(Action::VIEW, task)?)
            .await;
        assert!(matches!(
            checked,
            Err(AuthorizationError::Configuration(ConfigurationError::InvalidFieldPath(_)))
        ));
        anyhow::Ok(())
    })
    .await
}
