// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-instance-group update sequencing.
//!
//! A deployment's instance groups update in batches: maximal contiguous runs
//! of groups sharing the `serial` flag. Serial runs go one group at a time
//! with a cancellation checkpoint before each; parallel runs take one
//! checkpoint up front and then fan out onto a bounded tokio task pool. The
//! actual per-group convergence work lives behind [InstanceGroupUpdater].

use async_trait::async_trait;
use director_types::InstanceGroupSpec;
use itertools::Itertools;
use slog::info;
use slog::o;
use slog::Logger;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The default number of instance groups updated in parallel within one
/// non-serial batch.
pub const DEFAULT_MAX_PARALLEL_INSTANCE_GROUPS: usize = 32;

/// Converges every instance of one instance group. Implementations are
/// expected to be long-running and internally fallible; a returned error
/// means the group did not reach its desired state.
#[async_trait]
pub trait InstanceGroupUpdater: Send + Sync {
    async fn update(
        &self,
        group: Arc<InstanceGroupSpec>,
    ) -> Result<(), anyhow::Error>;
}

/// Cooperative cancellation point. Sequencers call this at batch boundaries;
/// a canceled task stops before the next group begins, never mid-group.
pub trait TaskCheckpoint: Send + Sync {
    fn checkpoint(&self) -> Result<(), UpdateError>;
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("task canceled")]
    Canceled,

    #[error("update of instance group '{group}' failed")]
    GroupUpdateFailed {
        group: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Updates groups strictly one at a time, in input order, with a checkpoint
/// before each group.
pub struct SerialMultiInstanceGroupUpdater {
    updater: Arc<dyn InstanceGroupUpdater>,
    log: Logger,
}

impl SerialMultiInstanceGroupUpdater {
    pub fn new(updater: Arc<dyn InstanceGroupUpdater>, log: &Logger) -> Self {
        Self {
            updater,
            log: log.new(o!("component" => "SerialMultiInstanceGroupUpdater")),
        }
    }

    pub async fn update(
        &self,
        checkpoint: &dyn TaskCheckpoint,
        groups: &[Arc<InstanceGroupSpec>],
    ) -> Result<(), UpdateError> {
        for group in groups {
            checkpoint.checkpoint()?;
            info!(self.log, "updating instance group"; "group" => &group.name);
            self.updater.update(Arc::clone(group)).await.map_err(
                |source| UpdateError::GroupUpdateFailed {
                    group: group.name.clone(),
                    source,
                },
            )?;
        }
        Ok(())
    }
}

/// Updates groups concurrently on a bounded task pool.
///
/// One checkpoint covers the whole batch: no group update begins before it
/// returns, and there is no cancellation point between groups of the batch.
/// Each group is dispatched exactly once; every spawned update runs to
/// completion even when a sibling fails, and the first joined error wins.
pub struct ParallelMultiInstanceGroupUpdater {
    updater: Arc<dyn InstanceGroupUpdater>,
    max_parallel: usize,
    log: Logger,
}

impl ParallelMultiInstanceGroupUpdater {
    pub fn new(updater: Arc<dyn InstanceGroupUpdater>, log: &Logger) -> Self {
        Self::new_with_parallelism(
            updater,
            DEFAULT_MAX_PARALLEL_INSTANCE_GROUPS,
            log,
        )
    }

    pub fn new_with_parallelism(
        updater: Arc<dyn InstanceGroupUpdater>,
        max_parallel: usize,
        log: &Logger,
    ) -> Self {
        Self {
            updater,
            max_parallel,
            log: log
                .new(o!("component" => "ParallelMultiInstanceGroupUpdater")),
        }
    }

    pub async fn update(
        &self,
        checkpoint: &dyn TaskCheckpoint,
        groups: &[Arc<InstanceGroupSpec>],
    ) -> Result<(), UpdateError> {
        checkpoint.checkpoint()?;
        info!(
            self.log, "updating instance groups in parallel";
            "groups" => groups.len(),
            "max_parallel" => self.max_parallel,
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut set: JoinSet<Result<(), UpdateError>> = JoinSet::new();
        for group in groups {
            let updater = Arc::clone(&self.updater);
            let group = Arc::clone(group);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                // Hold the permit for the whole group update.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                updater.update(Arc::clone(&group)).await.map_err(|source| {
                    UpdateError::GroupUpdateFailed {
                        group: group.name.clone(),
                        source,
                    }
                })
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            let result =
                joined.expect("instance group update task panicked");
            if let Err(error) = result {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Splits the input into maximal contiguous runs sharing the `serial` flag
/// and executes the runs sequentially, serial runs through the serial
/// sequencer and the rest through the parallel one.
pub struct BatchMultiInstanceGroupUpdater {
    serial: SerialMultiInstanceGroupUpdater,
    parallel: ParallelMultiInstanceGroupUpdater,
    log: Logger,
}

impl BatchMultiInstanceGroupUpdater {
    pub fn new(
        updater: Arc<dyn InstanceGroupUpdater>,
        max_parallel: usize,
        log: &Logger,
    ) -> Self {
        Self {
            serial: SerialMultiInstanceGroupUpdater::new(
                Arc::clone(&updater),
                log,
            ),
            parallel: ParallelMultiInstanceGroupUpdater::new_with_parallelism(
                updater,
                max_parallel,
                log,
            ),
            log: log
                .new(o!("component" => "BatchMultiInstanceGroupUpdater")),
        }
    }

    pub async fn update(
        &self,
        checkpoint: &dyn TaskCheckpoint,
        groups: &[Arc<InstanceGroupSpec>],
    ) -> Result<(), UpdateError> {
        for (serial, batch) in
            &groups.iter().chunk_by(|group| group.update.serial)
        {
            let batch: Vec<Arc<InstanceGroupSpec>> =
                batch.map(Arc::clone).collect();
            info!(
                self.log, "starting update batch";
                "serial" => serial, "groups" => batch.len(),
            );
            if serial {
                self.serial.update(checkpoint, &batch).await?;
            } else {
                self.parallel.update(checkpoint, &batch).await?;
            }
        }
        Ok(())
    }
}
