//! Daemon mode: run the scheduler until interrupted.

use std::path::Path;
use std::sync::Arc;

use miette::{IntoDiagnostic, Result, miette};
use tracing::{info, warn};

use foreman_process::{ControllerRegistry, LocalController, StaticRegistry};
use foreman_scheduler::{SchedulerConfig, SchedulerService, SystemClock};
use foreman_store::{MemoryStore, ScheduleStore};

use crate::config::Config;

pub async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load(config_path).await?;

    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(StaticRegistry::new());
    let mut schedule_count = 0;

    for project in &config.projects {
        store.register_project(project.to_project()).await;
        registry.insert(
            project.name.clone(),
            LocalController::new(
                project.name.clone(),
                project.command.clone(),
                project.args.clone(),
                project.path.clone(),
            ),
        );
        for sc in &project.schedules {
            let schedule = sc.to_schedule(&project.name)?;
            store
                .upsert(schedule)
                .await
                .map_err(|e| miette!("failed to load schedule: {e}"))?;
            schedule_count += 1;
        }
    }
    info!(
        projects = config.projects.len(),
        schedules = schedule_count,
        "loaded configuration"
    );

    let service = SchedulerService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        registry.clone(),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );
    service
        .start()
        .await
        .map_err(|e| miette!("failed to start scheduler: {e}"))?;
    info!("foreman daemon running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("received interrupt, shutting down");

    service.shutdown().await;

    // Agents the scheduler started should not outlive the daemon.
    for project in &config.projects {
        let Some(controller) = registry.controller(&project.name) else {
            continue;
        };
        if controller.status().await.is_live() {
            if let Err(e) = controller.stop().await {
                warn!(project = %project.name, error = %e, "failed to stop agent on shutdown");
            }
        }
    }
    info!("foreman daemon stopped");
    Ok(())
}
