use axum::{
    Json, Router, middleware,
    routing::{get, post, put},
};
use pkg_cluster::connect;
use pkg_controllers::{Engine, EngineConfig, ManifestArchive};
use pkg_state::{AuditSink, BusAuditSink, Repos, StateStore};
use pkg_types::config::ClusterMode;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::auth::auth_middleware;
use crate::gate::{
    GroupIdSource, PathLookup, PayloadField, group_elevated, group_member, require_group,
    require_super_admin, require_user_or_super,
};
use crate::handlers::{
    audit, config_files, exec, gpu_requests, groups, jobs, memberships, projects, storage, users,
    watch,
};
use crate::request_id::request_id_middleware;
use crate::token::TokenIssuer;

/// Where raw config files are archived.
#[derive(Debug, Clone)]
pub enum ArchiveTarget {
    LocalDir(String),
    S3 {
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        use_ssl: bool,
    },
}

/// Server configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl_hours: i64,
    pub admin_password: String,
    pub cluster_mode: ClusterMode,
    pub kubeconfig: Option<String>,
    pub cluster_call_timeout: Duration,
    pub archive: ArchiveTarget,
    pub engine: EngineConfig,
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    // Initialize core subsystems
    let store = StateStore::new(&config.data_dir).await?;
    let repos = Repos::new(Arc::new(store.clone()));
    let gateway = connect(
        config.cluster_mode,
        config.kubeconfig.as_deref(),
        config.cluster_call_timeout,
    )
    .await?;
    let archive = match &config.archive {
        ArchiveTarget::LocalDir(dir) => ManifestArchive::local(dir)?,
        ArchiveTarget::S3 {
            endpoint,
            access_key,
            secret_key,
            bucket,
            use_ssl,
        } => ManifestArchive::s3(endpoint, access_key, secret_key, bucket, *use_ssl)?,
    };
    let (audit, _audit_writer) = BusAuditSink::start(repos.audit.clone());
    let audit: Arc<dyn AuditSink> = Arc::new(audit);

    let engine = Engine::new(repos, gateway, archive, audit, config.engine);
    engine.accounts.bootstrap_admin(&config.admin_password).await?;

    // Start the job status reconciler background task
    engine.job_reconciler().start();

    let tokens = TokenIssuer::new(&config.jwt_secret, &config.jwt_issuer, config.token_ttl_hours);
    let app = router(AppState::new(engine, tokens));

    info!("Starting API server on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    store.close().await?;
    Ok(())
}

/// The full HTTP surface over `state`.
pub fn router(state: AppState) -> Router {
    let project_path = GroupIdSource::FromPathId(PathLookup::Project);
    let config_file_path = GroupIdSource::FromPathId(PathLookup::ConfigFile);

    // Any authenticated user
    let authenticated = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{id}", get(users::get_user))
        .route("/groups", get(groups::list_groups))
        .route("/groups/{id}", get(groups::get_group))
        .route("/user-group/by-user", get(memberships::by_user))
        .route("/user-group/by-group", get(memberships::by_group))
        .route("/projects", get(projects::list_projects))
        .route("/projects/by-user", get(projects::list_my_projects))
        .route("/projects/{id}", get(projects::get_project))
        .route("/jobs", post(jobs::submit_job).get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/ws/watch/{namespace}", get(watch::watch_namespace))
        .route("/ws/exec", get(exec::exec_into_pod));

    let own_account = Router::new()
        .route(
            "/users/{id}",
            put(users::update_user).delete(users::delete_user),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_user_or_super,
        ));

    let admin_only = Router::new()
        .route("/groups", post(groups::create_group))
        .route(
            "/groups/{id}",
            put(groups::update_group).delete(groups::delete_group),
        )
        .route("/user-group", get(memberships::list_memberships))
        .route("/config-files", get(config_files::list_config_files))
        .route("/gpu-requests/pending", get(gpu_requests::list_pending))
        .route("/gpu-requests/{id}", put(gpu_requests::process_gpu_request))
        .route(
            "/storage/users/{username}",
            get(storage::hub_status)
                .post(storage::create_hub)
                .delete(storage::delete_hub),
        )
        .route("/storage/users/{username}/expand", put(storage::expand_hub))
        .route("/storage/projects", get(storage::list_project_storage))
        .route(
            "/storage/projects/{id}",
            post(storage::create_project_storage).delete(storage::delete_project_storage),
        )
        .route("/storage/browser/start", post(storage::start_browser))
        .route("/storage/browser/stop", post(storage::stop_browser))
        .route("/audit/logs", get(audit::list_audit_logs))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_super_admin,
        ));

    let membership_admin = Router::new()
        .route(
            "/user-group",
            post(memberships::create_membership)
                .put(memberships::update_membership)
                .delete(memberships::delete_membership),
        )
        .route("/projects", post(projects::create_project))
        .route_layer(middleware::from_fn_with_state(
            group_elevated(&state, GroupIdSource::FromPayload(PayloadField::GroupId)),
            require_group,
        ));

    let project_admin = Router::new()
        .route(
            "/projects/{id}",
            put(projects::update_project).delete(projects::delete_project),
        )
        .route_layer(middleware::from_fn_with_state(
            group_elevated(&state, project_path),
            require_group,
        ));

    let project_member = Router::new()
        .route(
            "/projects/{id}/config-files",
            get(projects::list_project_config_files),
        )
        .route(
            "/projects/{id}/gpu-requests",
            post(gpu_requests::create_gpu_request).get(gpu_requests::list_project_gpu_requests),
        )
        .route_layer(middleware::from_fn_with_state(
            group_member(&state, project_path),
            require_group,
        ));

    let config_file_member = Router::new()
        .route("/config-files/{id}", get(config_files::get_config_file))
        .route("/config-files/{id}/resources", get(config_files::list_resources))
        .route(
            "/instance/{id}",
            post(config_files::create_instance).delete(config_files::delete_instance),
        )
        .route_layer(middleware::from_fn_with_state(
            group_member(&state, config_file_path),
            require_group,
        ));

    let config_file_admin = Router::new()
        .route(
            "/config-files/{id}",
            put(config_files::update_config_file).delete(config_files::delete_config_file),
        )
        .route_layer(middleware::from_fn_with_state(
            group_elevated(&state, config_file_path),
            require_group,
        ));

    let config_file_create = Router::new()
        .route("/config-files", post(config_files::create_config_file))
        .route_layer(middleware::from_fn_with_state(
            group_elevated(&state, GroupIdSource::FromPayload(PayloadField::ProjectId)),
            require_group,
        ));

    // Protected API routes
    let api_routes = Router::new()
        .merge(authenticated)
        .merge(own_account)
        .merge(admin_only)
        .merge(membership_admin)
        .merge(project_admin)
        .merge(project_member)
        .merge(config_file_member)
        .merge(config_file_admin)
        .merge(config_file_create)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Public routes + merged
    Router::new()
        .route("/register", post(users::register))
        .route("/login", post(users::login))
        .route("/healthz", get(healthz))
        .merge(api_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
