use crate::error::IndexError;
use crate::models::IndexSpec;
use crate::traits::IndexControl;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct EnsureOptions {
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for EnsureOptions {
    fn default() -> Self {
        Self {
            ready_poll_interval: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(120),
        }
    }
}

/// Creates the index if it does not exist yet and returns a handle to it once it is ready.
pub async fn ensure_index<C>(
    control: &C,
    spec: &IndexSpec,
    options: &EnsureOptions,
) -> Result<C::Index, IndexError>
where
    C: IndexControl + Sync,
{
    if spec.name.trim().is_empty() {
        return Err(IndexError::Request("index name is empty".to_string()));
    }

    if control.has_index(&spec.name).await? {
        debug!(index = %spec.name, "index already exists");
    } else {
        info!(
            index = %spec.name,
            cloud = %spec.cloud,
            region = %spec.region,
            model = %spec.embed_model,
            "creating index"
        );
        control.create_index_for_model(spec).await?;
    }

    let deadline = Instant::now() + options.ready_timeout;
    loop {
        let description = control.describe_index(&spec.name).await?;
        if description.ready {
            info!(index = %description.name, host = %description.host, "index ready");
            return control.connect(&description);
        }

        if Instant::now() >= deadline {
            return Err(IndexError::NotReady(format!(
                "index {} not ready after {:?}",
                spec.name, options.ready_timeout
            )));
        }
        debug!(index = %spec.name, "waiting for index to become ready");
        tokio::time::sleep(options.ready_poll_interval).await;
    }
}
