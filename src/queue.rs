//! Kernel dispatcher.
//!
//! A [`Queue`] owns one in-order device queue and a program cache. Each call
//! to [`Queue::submit`] builds the program on first use, binds the arguments,
//! enqueues the launch and its readbacks behind one event and returns without
//! waiting for the device.

use crate::arg::KernelArg;
use crate::binder::Binder;
use crate::cache::ProgramCache;
use crate::config::{Config, BUILD_OPTIONS};
use crate::device::{
    self, CommandQueue, DeviceContext, DeviceInfo, Event, KernelLibrary, NdRange, Platform, Program,
};
use crate::error::Result;
use crate::future::Completion;
use crate::source::{FsSourceLoader, SourceLoader};
use crate::telemetry::Metrics;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Queue {
    config: Config,
    context: DeviceContext,
    cache: ProgramCache,
    library: KernelLibrary,
    loader: Box<dyn SourceLoader>,
    queue: CommandQueue,
}

impl Queue {
    /// Open a queue on the device named by `config`, reading sources from
    /// the filesystem.
    pub fn new(config: Config, library: KernelLibrary) -> Result<Self> {
        Self::with_loader(config, library, FsSourceLoader::new())
    }

    pub fn with_loader<L>(config: Config, library: KernelLibrary, loader: L) -> Result<Self>
    where
        L: SourceLoader + 'static,
    {
        config.validate()?;

        let (platform, device) = device::select(
            &Platform::all(),
            config.platform_name.as_deref(),
            config.device_name.as_deref(),
        )?;

        info!(
            platform = %platform.name,
            device = %device.name,
            compute_units = device.compute_units,
            kernels = library.len(),
            "queue opened"
        );

        let context = DeviceContext::new(platform, device);
        let queue = CommandQueue::new(context.clone(), &config)?;

        Ok(Self {
            config,
            context,
            cache: ProgramCache::new(),
            library,
            loader: Box::new(loader),
            queue,
        })
    }

    /// Run kernel `entry` from `source_id` over `range`.
    ///
    /// Build, binding and launch errors are returned here; faults while the
    /// kernel runs surface from [`Completion::wait`]. The returned
    /// completion borrows the host memory of `args` until it is waited on or
    /// dropped.
    pub fn submit<'a, I>(
        &mut self,
        source_id: &str,
        entry: &str,
        range: &NdRange,
        args: I,
    ) -> Result<Completion<'a>>
    where
        I: IntoIterator<Item = KernelArg<'a>>,
    {
        let loader = &self.loader;
        let library = &self.library;
        let kernel = self.cache.ensure(source_id, entry, |id| {
            let source = loader.load(id)?;
            Program::build(id, &source, BUILD_OPTIONS, library)
        })?;

        let binding = Binder::new(&self.context).bind(&kernel, args.into_iter().collect())?;

        let event = Event::for_task(Arc::clone(&self.context.metrics));
        self.queue.enqueue_ndrange(Arc::clone(&kernel), binding.values, range, &event)?;
        self.context.metrics.record_task_submitted();

        for output in &binding.outputs {
            let staging = Arc::clone(&output.staging);
            if let Err(e) = self.queue.enqueue_read(output.buffer.clone(), staging, &event) {
                event.close();
                return Err(e);
            }
        }
        event.close();

        debug!(
            source = source_id,
            kernel = entry,
            event = event.id(),
            outputs = binding.outputs.len(),
            "task submitted"
        );

        let buffers = binding.buffers.into_iter().flatten().collect();
        Ok(Completion::new(event, buffers, binding.outputs))
    }

    /// Block until every task submitted so far has finished.
    pub fn finish(&self) -> Result<()> {
        self.queue.finish()
    }

    /// Drop the cached program for `source_id` so the next submission
    /// rebuilds it.
    pub fn invalidate(&mut self, source_id: &str) -> bool {
        self.cache.invalidate(source_id)
    }

    pub fn cache(&self) -> &ProgramCache {
        &self.cache
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.context.device
    }

    pub fn platform(&self) -> &Platform {
        &self.context.platform
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.context.metrics
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("platform", &self.context.platform.name)
            .field("device", &self.context.device.name)
            .field("cache", &self.cache)
            .field("queue", &self.queue)
            .finish()
    }
}
