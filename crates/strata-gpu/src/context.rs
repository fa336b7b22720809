//! GPU context management.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};

/// Main GPU context holding the wgpu adapter, device and queue.
pub struct GpuContext {
    pub(crate) instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: Arc<wgpu::Device>,
    pub(crate) queue: Arc<wgpu::Queue>,
    pub(crate) capabilities: GpuCapabilities,
    uncaptured: Arc<Mutex<Option<String>>>,
}

impl GpuContext {
    /// Get the wgpu instance.
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    /// Get the adapter the device was created from.
    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    /// Get the device.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get a shared handle to the device.
    pub fn device_arc(&self) -> Arc<wgpu::Device> {
        Arc::clone(&self.device)
    }

    /// Get the queue.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Get a shared handle to the queue.
    pub fn queue_arc(&self) -> Arc<wgpu::Queue> {
        Arc::clone(&self.queue)
    }

    /// Get GPU capabilities.
    pub fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Take the most recent validation error that no error scope captured.
    pub fn take_uncaptured_error(&self) -> Option<String> {
        self.uncaptured.lock().take()
    }

    /// Drive pending map callbacks without blocking.
    pub fn poll(&self) {
        self.device.poll(wgpu::Maintain::Poll);
    }

    /// Wait for all submitted work to finish.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    power_preference: wgpu::PowerPreference,
    force_fallback_adapter: bool,
    backends: wgpu::Backends,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Strata".to_string(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: cfg!(feature = "headless"),
            backends: wgpu::Backends::all(),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name, used as the device label.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Prefer a low-power or high-performance adapter.
    pub fn power_preference(mut self, preference: wgpu::PowerPreference) -> Self {
        self.power_preference = preference;
        self
    }

    /// Only accept a software fallback adapter.
    pub fn force_fallback_adapter(mut self, force: bool) -> Self {
        self.force_fallback_adapter = force;
        self
    }

    /// Restrict the backends the instance may use.
    pub fn backends(mut self, backends: wgpu::Backends) -> Self {
        self.backends = backends;
        self
    }

    /// Build the GPU context, blocking on adapter and device requests.
    ///
    /// `atlas_side` is the voxel payload atlas edge in voxels; adapters that
    /// cannot host it are rejected.
    pub fn build(self, atlas_side: u32) -> Result<GpuContext> {
        pollster::block_on(self.build_async(atlas_side))
    }

    async fn build_async(self, atlas_side: u32) -> Result<GpuContext> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: self.backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: self.power_preference,
                force_fallback_adapter: self.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or(GpuError::NoSuitableAdapter)?;

        let capabilities = GpuCapabilities::query(&adapter);
        capabilities.check_requirements(atlas_side)?;

        tracing::info!("Selected GPU: {}", capabilities.summary());

        // The scene and voxel bind groups need more storage buffers than the
        // WebGPU defaults, so request everything the adapter offers.
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some(&self.app_name),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        let uncaptured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&uncaptured);
        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!(%error, "uncaptured GPU error");
            *sink.lock() = Some(error.to_string());
        }));

        Ok(GpuContext {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            capabilities,
            uncaptured,
        })
    }
}
