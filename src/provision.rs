use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use ulid::Ulid;

use crate::engine::Engine;
use crate::model::*;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ProvisionError {
    Unavailable(String),
    Rejected(String),
}

impl std::fmt::Display for ProvisionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionError::Unavailable(e) => write!(f, "provider unavailable: {e}"),
            ProvisionError::Rejected(e) => write!(f, "provider rejected request: {e}"),
        }
    }
}

impl std::error::Error for ProvisionError {}

/// Creates the meeting a confirmed consultation takes place in.
#[async_trait]
pub trait MeetingProvisioner: Send + Sync {
    /// Returns the opaque meeting reference (join link or meeting id).
    async fn provision(&self, reservation: &Reservation) -> Result<String, ProvisionError>;
}

/// Derives `<base_url>/<reservation id>`, for rooms that are addressed by name.
#[derive(Debug, Clone)]
pub struct StaticLinkProvisioner {
    base_url: String,
}

impl StaticLinkProvisioner {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MeetingProvisioner for StaticLinkProvisioner {
    async fn provision(&self, reservation: &Reservation) -> Result<String, ProvisionError> {
        let base = self.base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(ProvisionError::Rejected("empty base url".into()));
        }
        Ok(format!("{base}/{}", reservation.id))
    }
}

/// Provision one reservation if it still needs it. Safe to call repeatedly:
/// anything not confirmed, or already linked, is skipped.
pub async fn provision_one(engine: &Engine, provisioner: &dyn MeetingProvisioner, id: Ulid) -> bool {
    let Some(reservation) = engine.get_reservation(&id).await else {
        return false;
    };
    if reservation.status != LifecycleStatus::Confirmed || reservation.meeting_ref.is_some() {
        return false;
    }

    let meeting_ref = match provisioner.provision(&reservation).await {
        Ok(r) => r,
        Err(e) => {
            metrics::counter!(crate::observability::PROVISIONING_FAILURES_TOTAL).increment(1);
            warn!("meeting provisioning failed for {id}: {e}");
            return false;
        }
    };

    match engine.attach_meeting_link(id, meeting_ref).await {
        Ok(true) => {
            info!("meeting attached to reservation {id}");
            true
        }
        Ok(false) => false,
        Err(e) => {
            metrics::counter!(crate::observability::PROVISIONING_FAILURES_TOTAL).increment(1);
            warn!("could not attach meeting to {id}: {e}");
            false
        }
    }
}

/// Re-drive every confirmed reservation without a meeting.
pub async fn sweep_unprovisioned(engine: &Engine, provisioner: &dyn MeetingProvisioner) -> usize {
    let mut attached = 0;
    for id in engine.collect_unprovisioned().await {
        if provision_one(engine, provisioner, id).await {
            attached += 1;
        }
    }
    attached
}

/// Background worker: reacts to confirmations as they are broadcast, and
/// sweeps periodically so dropped or lagged notifications are still served.
pub async fn run_provisioner(engine: Arc<Engine>, provisioner: Arc<dyn MeetingProvisioner>) {
    let mut rx = engine.notify.subscribe();
    let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Ok(Event::StatusChanged { id, status: LifecycleStatus::Confirmed, .. }) => {
                    provision_one(&engine, provisioner.as_ref(), id).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("provisioner lagged by {skipped} events, sweeping");
                    sweep_unprovisioned(&engine, provisioner.as_ref()).await;
                }
                Err(RecvError::Closed) => break,
            },
            _ = sweep.tick() => {
                let attached = sweep_unprovisioned(&engine, provisioner.as_ref()).await;
                if attached > 0 {
                    info!("provisioning sweep attached {attached} meetings");
                }
            }
        }
    }
}
