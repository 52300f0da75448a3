//! Config for the tokio runtime.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// Tokio runtime type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum TokioRuntimeType {
    /// Current-thread runtime.
    CurrentThread,

    /// Multi-thread runtime.
    #[default]
    MultiThread,
}

/// CLI config for the tokio runtime.
#[derive(Debug, Clone, clap::Parser)]
#[allow(missing_copy_implementations)]
pub struct TokioRuntimeConfig {
    /// Set the maximum number of runtime worker threads to use.
    ///
    /// Defaults to the number of logical cores on the system.
    #[clap(long = "num-threads", env = "LONGPOLL_NUM_THREADS", action)]
    pub num_threads: Option<NonZeroUsize>,

    /// Tokio runtime type.
    #[clap(
        long = "runtime-type",
        env = "LONGPOLL_RUNTIME_TYPE",
        default_value_t = TokioRuntimeType::default(),
        value_enum,
        action
    )]
    pub runtime_type: TokioRuntimeType,
}

impl TokioRuntimeConfig {
    /// Creates the tokio runtime builder.
    pub fn builder(&self) -> tokio::runtime::Builder {
        // NOTE: no log macros will work here! The log emitter is initialised after the runtime.
        let mut builder = match self.runtime_type {
            TokioRuntimeType::CurrentThread => tokio::runtime::Builder::new_current_thread(),
            TokioRuntimeType::MultiThread => {
                let mut builder = tokio::runtime::Builder::new_multi_thread();
                if let Some(num_threads) = self.num_threads {
                    builder.worker_threads(num_threads.get());
                }
                builder
            }
        };
        builder.enable_all();

        let thread_counter = Arc::new(AtomicUsize::new(1));
        builder.thread_name_fn(move || {
            format!(
                "longpoll tokio {}",
                thread_counter.fetch_add(1, Ordering::SeqCst)
            )
        });

        builder
    }
}
