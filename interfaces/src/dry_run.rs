use async_trait::async_trait;
use tracing::info;

use crate::defs::{DeliveryError, DeliveryReceipt, DeliveryRequest, Dispatcher};

/// Dispatcher that accepts every request and sends nothing.
pub struct DryRunDispatcher;

#[async_trait]
impl Dispatcher for DryRunDispatcher {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn dispatch(&self, request: DeliveryRequest) -> Result<DeliveryReceipt, DeliveryError> {
        info!(
            "Dry run: not sending {} ({} bytes) to {} with subject '{}'",
            request.file_name,
            request.artifact.len(),
            request.destination,
            request.subject
        );
        Ok(DeliveryReceipt {
            destination: request.destination,
            bytes_sent: 0,
            sent: false,
        })
    }
}
