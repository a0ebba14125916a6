/*!
 * Permissions Daemon - Main Entry Point
 *
 * Wires the permission runtime against a demo permission source and a
 * file-backed store, then plays through one session:
 * - login with cache warm-up
 * - hover intent and workspace navigation with prediction
 * - scope invalidation and re-warm
 * - a compression pass, metrics, logout and shutdown
 */

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use workspace_permissions::{
    init_tracing, Config, EventType, FileStore, IdentityChange, PermissionRuntime, PreloadSource,
    StaticPermissionSource, SubscribeOptions, UserId, WorkspaceId,
};

fn demo_source() -> Arc<StaticPermissionSource> {
    let source = StaticPermissionSource::new().with_latency(Duration::from_millis(15));
    source.grant(
        "demo-user",
        "engineering",
        ["workspace:read", "documents:read", "documents:write", "members:read"],
    );
    source.grant("demo-user", "design", ["workspace:read", "documents:read"]);
    source.grant("demo-user", "operations", ["workspace:read"]);
    Arc::new(source)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Permissions daemon starting...");
    let config = Config::from_env();

    let storage_path = std::env::var("PERMISSIONS_STORAGE_PATH")
        .unwrap_or_else(|_| "/tmp/permissions-daemon".to_string());
    tokio::fs::create_dir_all(&storage_path)
        .await
        .with_context(|| format!("creating storage directory {}", storage_path))?;
    info!(storage_path = %storage_path, "Using file-backed store");

    let runtime = PermissionRuntime::builder()
        .with_config(config)
        .with_source(demo_source())
        .with_store(Arc::new(FileStore::new(&storage_path)))
        .build()
        .await
        .context("building permission runtime")?;

    let _revocations = runtime.bus().subscribe(
        EventType::CacheInvalidated,
        |event| {
            info!(user_id = %event.user_id, "Observed cache invalidation");
            Ok(())
        },
        SubscribeOptions::new(),
    );

    let user = UserId::from("demo-user");
    let engineering = WorkspaceId::from("engineering");
    let design = WorkspaceId::from("design");

    let report = runtime
        .handle_identity_change(IdentityChange::LoggedIn {
            user_id: user.clone(),
            workspace_id: Some(engineering.clone()),
            priority_workspaces: vec![engineering.clone(), design.clone()],
        })
        .await;
    info!(preloaded = report.preloaded, "Logged in");

    let preloader = runtime.preloader();
    preloader.handle_navigation_intent(&user, &WorkspaceId::from("operations"), PreloadSource::Hover);
    tokio::time::sleep(preloader.config().hover_delay() + Duration::from_millis(50)).await;

    for _ in 0..3 {
        preloader.update_workspace_context(&user, &design).await;
        let predictions = preloader.update_workspace_context(&user, &engineering).await;
        for prediction in predictions {
            info!(
                workspace_id = %prediction.workspace_id,
                confidence = prediction.confidence,
                preloaded = prediction.preloaded,
                "Prediction"
            );
        }
    }

    let manager = runtime.cache_manager();
    let allowed = manager
        .has_permission(&user, Some(&engineering), &"documents:write".into())
        .await;
    info!(allowed, "documents:write in engineering");

    manager.smart_invalidate_user_permissions(&user, Some(&design));
    manager.flush_rewarms().await;

    runtime.trigger_compression();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let metrics = manager.get_cache_metrics();
    info!(
        entries = metrics.entry_count,
        bytes = metrics.estimated_bytes,
        compressed = metrics.compressed_entries,
        hit_rate = metrics.hit_rate,
        "Cache metrics"
    );
    let stats = preloader.stats();
    info!(
        requests = stats.total_requests,
        successful = stats.successful,
        peak_in_flight = stats.peak_in_flight,
        average_latency_ms = stats.average_latency_ms,
        "Preloader stats"
    );
    info!(entries = runtime.audit().len(), "Audit log");

    runtime.handle_identity_change(IdentityChange::LoggedOut).await;
    runtime.shutdown().await.context("shutting down permission runtime")?;

    info!("Permissions daemon stopped");
    Ok(())
}
