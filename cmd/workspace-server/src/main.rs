use clap::Parser;
use pkg_api::server::{ArchiveTarget, ServerConfig, start_server};
use pkg_constants::auth::{
    DEFAULT_ADMIN_PASSWORD, DEFAULT_JWT_ISSUER, DEFAULT_JWT_SECRET, DEFAULT_TOKEN_TTL_HOURS,
};
use pkg_constants::gpu::{DEFAULT_JOB_POLL_SECS, DEFAULT_JOB_PRIORITY_CLASS};
use pkg_constants::network::{DEFAULT_API_PORT, DEFAULT_CLUSTER_CALL_TIMEOUT_SECS};
use pkg_constants::paths::{
    ARCHIVE_SUBDIR, DEFAULT_ARCHIVE_BUCKET, DEFAULT_SERVER_CONFIG, DEFAULT_SERVER_DATA_DIR,
};
use pkg_constants::storage::{DEFAULT_STORAGE_CLASS, DEFAULT_STORAGE_SIZE};
use pkg_controllers::EngineConfig;
use pkg_types::config::{ClusterMode, ServerConfigFile, load_config_file};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "workspace-server", about = "Multi-tenant workspace orchestration server")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_SERVER_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<String>,

    /// HMAC secret for bearer tokens
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: Option<String>,

    /// Issuer claim stamped on bearer tokens
    #[arg(long, env = "JWT_ISSUER")]
    issuer: Option<String>,

    /// Password given to the bootstrap admin on first start
    #[arg(long, env = "ADMIN_PASSWORD")]
    admin_password: Option<String>,

    /// kube or mock
    #[arg(long, env = "CLUSTER_MODE")]
    cluster_mode: Option<ClusterMode>,

    /// Kubeconfig path; in-cluster or default discovery when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<String>,

    /// Storage class for hub and project claims
    #[arg(long, env = "DEFAULT_STORAGE_CLASS")]
    storage_class: Option<String>,

    /// Default claim size
    #[arg(long, env = "DEFAULT_STORAGE_SIZE")]
    storage_size: Option<String>,

    /// S3-compatible endpoint for the config-file archive
    #[arg(long, env = "MINIO_ENDPOINT")]
    archive_endpoint: Option<String>,

    #[arg(long, env = "MINIO_ACCESS_KEY")]
    archive_access_key: Option<String>,

    #[arg(long, env = "MINIO_SECRET_KEY", hide_env_values = true)]
    archive_secret_key: Option<String>,

    #[arg(long, env = "MINIO_BUCKET")]
    archive_bucket: Option<String>,

    #[arg(long, env = "MINIO_USE_SSL")]
    archive_use_ssl: Option<bool>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Load config file (returns defaults if file not found)
    let file_cfg: ServerConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args / env > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_API_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_SERVER_DATA_DIR.to_string());
    let jwt_secret = cli
        .jwt_secret
        .or(file_cfg.jwt_secret)
        .unwrap_or_else(|| DEFAULT_JWT_SECRET.to_string());
    if jwt_secret == DEFAULT_JWT_SECRET {
        warn!("Using the built-in JWT secret; set JWT_SECRET in production");
    }
    let jwt_issuer = cli
        .issuer
        .or(file_cfg.issuer)
        .unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string());
    let token_ttl_hours = file_cfg.token_ttl_hours.unwrap_or(DEFAULT_TOKEN_TTL_HOURS);
    let admin_password = cli
        .admin_password
        .or(file_cfg.admin_password)
        .unwrap_or_else(|| DEFAULT_ADMIN_PASSWORD.to_string());
    if admin_password == DEFAULT_ADMIN_PASSWORD {
        warn!("Bootstrap admin uses the default password");
    }
    let cluster_mode = cli
        .cluster_mode
        .or(file_cfg.cluster.mode)
        .unwrap_or_default();
    let kubeconfig = cli.kubeconfig.or(file_cfg.cluster.kubeconfig);
    let call_timeout = Duration::from_secs(
        file_cfg
            .cluster
            .call_timeout_secs
            .unwrap_or(DEFAULT_CLUSTER_CALL_TIMEOUT_SECS),
    );
    let storage_class = cli
        .storage_class
        .or(file_cfg.storage.class)
        .unwrap_or_else(|| DEFAULT_STORAGE_CLASS.to_string());
    let storage_size = cli
        .storage_size
        .or(file_cfg.storage.size)
        .unwrap_or_else(|| DEFAULT_STORAGE_SIZE.to_string());

    let archive = match cli.archive_endpoint.or(file_cfg.archive.endpoint) {
        Some(endpoint) => ArchiveTarget::S3 {
            endpoint,
            access_key: cli
                .archive_access_key
                .or(file_cfg.archive.access_key)
                .unwrap_or_default(),
            secret_key: cli
                .archive_secret_key
                .or(file_cfg.archive.secret_key)
                .unwrap_or_default(),
            bucket: cli
                .archive_bucket
                .or(file_cfg.archive.bucket)
                .unwrap_or_else(|| DEFAULT_ARCHIVE_BUCKET.to_string()),
            use_ssl: cli
                .archive_use_ssl
                .or(file_cfg.archive.use_ssl)
                .unwrap_or(false),
        },
        None => ArchiveTarget::LocalDir(
            Path::new(&data_dir)
                .join(ARCHIVE_SUBDIR)
                .to_string_lossy()
                .into_owned(),
        ),
    };

    let engine = EngineConfig {
        storage_class,
        storage_size,
        job_priority_class: file_cfg
            .jobs
            .priority_class
            .unwrap_or_else(|| DEFAULT_JOB_PRIORITY_CLASS.to_string()),
        job_poll_interval: Duration::from_secs(
            file_cfg.jobs.poll_secs.unwrap_or(DEFAULT_JOB_POLL_SECS),
        ),
    };

    info!("Starting workspace-server");
    info!("  Port:          {}", port);
    info!("  Data dir:      {}", data_dir);
    info!("  Cluster mode:  {}", cluster_mode);
    info!("  Storage class: {} ({})", engine.storage_class, engine.storage_size);
    match &archive {
        ArchiveTarget::LocalDir(dir) => info!("  Archive:       {}", dir),
        ArchiveTarget::S3 {
            endpoint, bucket, ..
        } => info!("  Archive:       {}/{}", endpoint, bucket),
    }

    let config = ServerConfig {
        addr: SocketAddr::from(([0, 0, 0, 0], port)),
        data_dir,
        jwt_secret,
        jwt_issuer,
        token_ttl_hours,
        admin_password,
        cluster_mode,
        kubeconfig,
        cluster_call_timeout: call_timeout,
        archive,
        engine,
    };

    start_server(config).await?;

    Ok(())
}
