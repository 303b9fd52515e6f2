use anyhow::{Context, Result, bail};
use axum::Router;
use material_migrator::{
    config::{AppConfig, ObjectBackend, RunMode},
    models::NewRecord,
    routes,
    services::{
        batch::BatchOrchestrator,
        local_files::LocalFiles,
        migration_service::MigrationService,
        object_store::{DiskObjectStore, ObjectStore},
        record_store::{RecordStore, SqliteRecordStore, run_migrations},
        retry::SystemClock,
        scheduler, stats,
    },
    state::AppState,
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting material-migrator with config: {:?}", redacted(&cfg));

    // --- Ensure local directories exist ---
    ensure_dir(&cfg.local_root)?;
    if cfg.backend == ObjectBackend::Disk {
        ensure_dir(&cfg.storage_dir)?;
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    let db_path_obj = Path::new(db_path);
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file on its own.
    if let Err(e) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        tracing::warn!("Failed to open database file manually: {}", e);
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .with_context(|| format!("connecting to {}", db_url))?,
    );

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let records: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::new(db.clone()));
    let objects = build_object_store(&cfg).await?;
    tracing::info!(backend = ?cfg.backend, bucket = objects.bucket(), "Object store ready");
    let files = LocalFiles::new(cfg.local_root.clone());

    let service = MigrationService::new(
        records.clone(),
        objects.clone(),
        files.clone(),
        cfg.retry,
        Arc::new(SystemClock),
    )
    .with_network_timeout(cfg.network_timeout);

    let mut orchestrator = BatchOrchestrator::new(service.clone()).with_stale_after(cfg.stale_after);
    if let Some(concurrency) = cfg.concurrency {
        orchestrator = orchestrator.with_concurrency(concurrency);
    }

    match mode {
        RunMode::Enqueue(path) => return enqueue(records.as_ref(), &path).await,
        RunMode::Once => {
            let summary = orchestrator.run_batch(cfg.scheduler.batch_size).await;
            let stats = stats::collect(records.as_ref()).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "batch": summary,
                    "stats": stats,
                }))?
            );
            return Ok(());
        }
        RunMode::Serve | RunMode::Migrate => {}
    }

    // --- Start scheduler ---
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let scheduler_settings = cfg.scheduler;
    let scheduler_task = tokio::spawn(async move {
        scheduler::run(&orchestrator, scheduler_settings, async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
    });

    // --- Build router ---
    let state = AppState {
        db: db.clone(),
        records,
        objects,
        files,
        migrations: service,
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Status API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let runs = scheduler_task.await?;
    tracing::info!("Scheduler ran {} batches before shutdown", runs);

    Ok(())
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
        tracing::info!("Created directory {}", path.display());
    }
    Ok(())
}

async fn build_object_store(cfg: &AppConfig) -> Result<Arc<dyn ObjectStore>> {
    match cfg.backend {
        ObjectBackend::Disk => Ok(Arc::new(DiskObjectStore::new(
            cfg.storage_dir.clone(),
            cfg.bucket.clone(),
        ))),
        #[cfg(feature = "s3")]
        ObjectBackend::S3 => {
            use material_migrator::services::object_store::{S3ObjectStore, s3::S3Settings};
            let settings = S3Settings {
                bucket: cfg.bucket.clone(),
                region: cfg.region.clone(),
                access_key: cfg.access_key.clone(),
                secret_key: cfg.secret_key.clone(),
                endpoint: cfg.endpoint.clone(),
            };
            Ok(Arc::new(S3ObjectStore::connect(&settings).await))
        }
        #[cfg(not(feature = "s3"))]
        ObjectBackend::S3 => bail!("the s3 backend requires building with `--features s3`"),
    }
}

/// Register a local file as a pending record.
async fn enqueue(records: &dyn RecordStore, path: &Path) -> Result<()> {
    let meta = fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", path.display());
    }
    let absolute = fs::canonicalize(path)?;
    let original_file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".into());

    let record = records
        .insert(NewRecord {
            local_path: absolute.to_string_lossy().into_owned(),
            original_file_name,
            declared_size_bytes: i64::try_from(meta.len()).ok(),
            created_at: None,
        })
        .await?;
    tracing::info!(record_id = record.id, "Enqueued {}", absolute.display());
    println!("{}", record.id);
    Ok(())
}

/// Config for logging, with credentials masked.
fn redacted(cfg: &AppConfig) -> AppConfig {
    let mask = |v: &Option<String>| v.as_ref().map(|_| "***".to_string());
    AppConfig {
        access_key: mask(&cfg.access_key),
        secret_key: mask(&cfg.secret_key),
        ..cfg.clone()
    }
}
