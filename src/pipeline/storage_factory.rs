use std::sync::Arc;

use anyhow::{Result, anyhow};
use aws_sdk_s3::Client;
use leaky_bucket::RateLimiter;
use tracing::debug;

use crate::Config;
use crate::config::{ClientConfig, CompareStrategy};
use crate::location::Location;
use crate::storage::StorageSet;
use crate::storage::local::LocalStorage;
use crate::storage::s3::S3Storage;
use crate::types::StorageSide;
use crate::types::error::S3bulkError;
use crate::types::token::PipelineCancellationToken;

// default refill interval 100ms
const REFILL_PER_INTERVAL_DIVIDER: usize = 10;

/// One storage per bucket (remote) or one for the filesystem (local), per side.
/// Remote storages of a side share one client.
pub async fn create_storages(
    config: &Config,
    cancellation_token: PipelineCancellationToken,
) -> Result<StorageSet> {
    let mut storages = StorageSet::new();

    insert_storages(
        &mut storages,
        config,
        StorageSide::Source,
        &config.sources,
        config.source_client_config.as_ref(),
        cancellation_token.clone(),
    )
    .await?;

    if let Some(target) = &config.target {
        insert_storages(
            &mut storages,
            config,
            StorageSide::Target,
            std::slice::from_ref(target),
            config.target_client_config.as_ref(),
            cancellation_token,
        )
        .await?;
    }

    Ok(storages)
}

async fn insert_storages(
    storages: &mut StorageSet,
    config: &Config,
    side: StorageSide,
    locations: &[Location],
    client_config: Option<&ClientConfig>,
    cancellation_token: PipelineCancellationToken,
) -> Result<()> {
    let mut client: Option<Arc<Client>> = None;

    for location in locations {
        if storages.contains(side, location) {
            continue;
        }

        let storage = match location.bucket() {
            Some(bucket) => {
                let client = match &client {
                    Some(client) => client.clone(),
                    None => {
                        let client_config = client_config.ok_or_else(|| {
                            anyhow!(S3bulkError::InvalidLocation {
                                location: location.original().to_string(),
                                reason: "no client configuration for a remote location"
                                    .to_string(),
                            })
                        })?;
                        let created = Arc::new(client_config.create_client().await);
                        client = Some(created.clone());
                        created
                    }
                };
                debug!(bucket = bucket, "s3 storage has been created.");
                S3Storage::boxed_new(client, bucket, cancellation_token.clone())
            }
            None => LocalStorage::boxed_new(
                cancellation_token.clone(),
                config.follow_symlinks,
                is_e_tag_required(config),
            ),
        };

        storages.insert(side, location, storage);
    }

    Ok(())
}

/// Local MD5s are only needed when sync compares hashes or ls shows ETags.
fn is_e_tag_required(config: &Config) -> bool {
    config
        .sync_config
        .is_some_and(|sync_config| sync_config.strategy == CompareStrategy::Hash)
        || config
            .list_config
            .is_some_and(|list_config| list_config.show_e_tag)
}

pub fn create_rate_limiter(rate_limit_objects: Option<u32>) -> Option<Arc<RateLimiter>> {
    let rate_limit_value = rate_limit_objects? as usize;
    let refill = if rate_limit_value <= REFILL_PER_INTERVAL_DIVIDER {
        1
    } else {
        rate_limit_value / REFILL_PER_INTERVAL_DIVIDER
    };

    Some(Arc::new(
        RateLimiter::builder()
            .max(rate_limit_value)
            .initial(rate_limit_value)
            .refill(refill)
            .fair(true)
            .build(),
    ))
}
