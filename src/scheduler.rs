use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::error::ShipmentError;
use crate::models::Identity;
use crate::orchestrator::ShipmentOrchestrator;

/// Ledger state observed by one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub identity: Option<Identity>,
    pub shipment_count: Option<u64>,
    pub total_shipments: usize,
}

/// Re-reads ledger state into the session store on `schedule` until Ctrl-C.
pub async fn create_and_run_scheduler(schedule: &str, orchestrator: Arc<ShipmentOrchestrator>) -> Result<()> {
    let mut scheduler = JobScheduler::new().await?;

    let job_orchestrator = orchestrator.clone();
    let job = Job::new_async(schedule, move |_uuid, _l| {
        let orchestrator = job_orchestrator.clone();
        Box::pin(async move {
            execute_sync_job(orchestrator).await;
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    execute_sync_job(orchestrator.clone()).await;

    tokio::signal::ctrl_c().await?;
    info!("stopping sync scheduler");
    scheduler.shutdown().await?;

    Ok(())
}

/// One pass: pick up a wallet session if none is active, then refresh the
/// connected identity's count and read the full shipment list.
pub async fn run_sync(orchestrator: &ShipmentOrchestrator) -> Result<SyncReport, ShipmentError> {
    if orchestrator.current_identity().is_none() {
        orchestrator.connection().probe_existing_session().await?;
    }

    let shipment_count = orchestrator.refresh_session().await?;
    let total_shipments = orchestrator.get_all_shipment().await?.len();

    Ok(SyncReport {
        identity: orchestrator.current_identity(),
        shipment_count,
        total_shipments,
    })
}

async fn execute_sync_job(orchestrator: Arc<ShipmentOrchestrator>) {
    info!("executing scheduled sync");

    match run_sync(&orchestrator).await {
        Ok(report) => {
            let identity = report
                .identity
                .as_ref()
                .map_or_else(|| "not connected".to_string(), Identity::to_string);
            println!(
                "[{}] {} | account: {} | my shipments: {} | all shipments: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                orchestrator.app_name(),
                identity,
                report
                    .shipment_count
                    .map_or_else(|| "-".to_string(), |count| count.to_string()),
                report.total_shipments,
            );
        }
        Err(e) => error!(error = %e, remedy = e.remedy().message(), "sync job failed"),
    }
}
