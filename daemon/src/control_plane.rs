//! Control socket requests mapped onto the supervisor's control queue

use async_trait::async_trait;
use ipc::server::ControlPlane;
use ipc::{IpcError, Result};
use schema::{ControlCode, StatusSnapshot};
use tokio::sync::watch;
use warden_core::control::ControlProducer;
use warden_core::supervisor::SupervisorHandles;

/// [`ControlPlane`] backed by the handles of one running supervisor
#[derive(Debug, Clone)]
pub struct SupervisorControlPlane {
    producer: ControlProducer,
    status_rx: watch::Receiver<StatusSnapshot>,
}

impl SupervisorControlPlane {
    pub fn new(handles: &SupervisorHandles) -> Self {
        Self {
            producer: handles.producer.clone(),
            status_rx: handles.status_rx.clone(),
        }
    }

    fn enqueue(&self, code: ControlCode) -> Result<()> {
        if self.producer.try_enqueue(code) {
            Ok(())
        } else {
            Err(IpcError::Rejected(format!(
                "control queue full, {} dropped ({} events dropped so far)",
                code,
                self.producer.dropped()
            )))
        }
    }
}

#[async_trait]
impl ControlPlane for SupervisorControlPlane {
    async fn status(&self) -> Result<StatusSnapshot> {
        Ok(self.status_rx.borrow().clone())
    }

    async fn stop(&self) -> Result<()> {
        self.enqueue(ControlCode::Stop)
    }

    async fn pause(&self) -> Result<()> {
        self.enqueue(ControlCode::Pause)
    }

    async fn resume(&self) -> Result<()> {
        self.enqueue(ControlCode::Resume)
    }

    async fn control(&self, code: u8) -> Result<()> {
        let code = ControlCode::custom(code).ok_or_else(|| {
            IpcError::Rejected(format!("control code {} is outside 128..=255", code))
        })?;
        self.enqueue(code)
    }

    async fn dump(&self) -> Result<()> {
        self.enqueue(ControlCode::Dump)
    }
}
