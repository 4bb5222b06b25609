//! Starting node workers.
//!
//! Each running node owns exactly one worker task. The pipeline does not
//! know which executor it lives on; the host supplies a [`TaskSpawner`] when
//! the pipeline is built. On hardware that is [`EmbassySpawner`] (feature
//! `embassy`), backed by a static pool of embassy tasks. Host tests wrap
//! `tokio::spawn`.

use alloc::boxed::Box;
use core::future::Future;
use core::pin::Pin;

use thiserror_no_std::Error;

/// A node worker, type-erased so one static task pool can run any node.
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Failure to start a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpawnError {
    /// Every task slot is in use.
    #[error("no free task slot")]
    Busy,
    /// The node's previous worker has not handed its state back yet.
    #[error("node worker still exiting")]
    Exiting,
}

/// Starts node workers on some executor.
pub trait TaskSpawner: Send + Sync {
    /// Start `task`; `name` is the node name, for diagnostics.
    ///
    /// # Errors
    ///
    /// [`SpawnError::Busy`] when the executor has no room for another task.
    fn spawn(&self, name: &'static str, task: BoxedTask) -> Result<(), SpawnError>;
}

#[cfg(feature = "embassy")]
pub use self::embassy::EmbassySpawner;

#[cfg(feature = "embassy")]
mod embassy {
    use super::{BoxedTask, SpawnError, TaskSpawner};

    /// Upper bound on concurrently running node workers.
    const NODE_TASKS: usize = 8;

    #[embassy_executor::task(pool_size = NODE_TASKS)]
    async fn node_task(task: BoxedTask) {
        task.await;
    }

    /// Runs node workers on an embassy executor.
    pub struct EmbassySpawner(embassy_executor::SendSpawner);

    impl EmbassySpawner {
        /// Spawner bound to the executor behind `spawner`.
        pub fn new(spawner: embassy_executor::SendSpawner) -> Self {
            Self(spawner)
        }
    }

    impl TaskSpawner for EmbassySpawner {
        fn spawn(&self, name: &'static str, task: BoxedTask) -> Result<(), SpawnError> {
            self.0.spawn(node_task(task)).map_err(|_| {
                warn!("spawn {}: task pool exhausted", name);
                SpawnError::Busy
            })
        }
    }
}
