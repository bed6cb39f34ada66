//! Read-clamp-write scaler over the scale subresource

use tracing::info;

use qs_common::{telemetry, ScaleBounds};

use crate::{ApiConfig, KubeClient, Result, TargetSpec};

/// The only writer of replica counts. Reads the target's current scale,
/// clamps the desired count through the bounds engine, and updates only
/// when the clamped target differs from the current count.
pub struct KubeScaler {
    client: KubeClient,
    target: TargetSpec,
    bounds: ScaleBounds,
}

impl KubeScaler {
    pub fn new(config: &ApiConfig, target: TargetSpec, bounds: ScaleBounds) -> Result<Self> {
        Ok(Self {
            client: KubeClient::new(config)?,
            target,
            bounds,
        })
    }

    pub async fn scale(&self, desired: i32) -> Result<()> {
        let mut scale = self.client.get_scale(&self.target).await?;
        let current = scale.spec.replicas;
        let replicas = self.bounds.clamp(current, desired);
        if replicas == current {
            return Ok(());
        }

        info!(
            kind = %self.target.kind,
            name = %self.target.name,
            from = current,
            to = replicas,
            "scaling target"
        );
        telemetry::record_scaling_event(self.target.kind.as_str(), &self.target.name);

        scale.spec.replicas = replicas;
        self.client.put_scale(&self.target, &scale).await?;
        Ok(())
    }
}
