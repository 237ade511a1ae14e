//! Frame driver.
//!
//! [`FrameRenderer`] ties the fence counter, the frame ring, the upload pass and
//! command recording together behind a two-call frame protocol:
//!
//! ```no_run
//! use inflight_core::RendererConfig;
//! use inflight_renderer::FrameRenderer;
//! use inflight_rhi::headless::{self, CompletionPolicy};
//! use inflight_scene::PassInput;
//!
//! # fn example() -> Result<(), inflight_rhi::RhiError> {
//! let config = RendererConfig::default();
//! let context = headless::context(CompletionPolicy::Immediate);
//! let mut renderer = FrameRenderer::new(context, &config, None)?;
//! let mut registry = renderer.create_registry();
//!
//! for _ in 0..10 {
//!     let token = renderer.prepare_frame(&mut registry, &PassInput::default())?;
//!     renderer.submit_frame(token, &registry)?;
//! }
//! renderer.wait_for_gpu_idle()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Failure
//!
//! Every [`RhiError`] is fatal. After the first one the renderer stops and every
//! later call returns [`RhiError::DeviceLost`]; nothing is retried. Dropping a
//! stopped renderer still waits, for a bounded time, for the GPU to finish with
//! the frame resources unless the device itself was lost.

use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use inflight_core::RendererConfig;
use inflight_rhi::{
    CommandList, CommandQueue, FenceCounter, GpuContext, GpuDevice, RhiError, RhiResult,
    TimelineFence,
};
use inflight_scene::{MeshId, PassInput, RenderItemRegistry};

use crate::constants::{MAX_LIGHTS, PassConstants};
use crate::frame_resource::FrameResourceDesc;
use crate::frame_ring::FrameRing;
use crate::submission::{PipelineSet, record_draws};
use crate::upload_pass::upload_frame;

/// Drain bound for a stopped renderer without a configured fence timeout.
const FAILED_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// A prepared frame waiting to be submitted.
///
/// Not `Clone`: each prepared frame is submitted exactly once.
#[derive(Debug)]
#[must_use = "a prepared frame must be passed to submit_frame"]
pub struct FrameToken {
    slot: usize,
    frame: u64,
}

impl FrameToken {
    /// Ring slot the frame records into.
    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Sequence number of the frame, starting at 1.
    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// Running counters of the frame loop.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// Frames submitted so far.
    pub frames_submitted: u64,
    /// Fence value of the most recent submission.
    pub last_fence: u64,
    /// Acquires that waited longer than the stall threshold.
    pub stalls: u64,
    /// Total time spent waiting in acquire.
    pub total_wait: Duration,
    /// Longest single acquire wait.
    pub longest_wait: Duration,
    /// Item records uploaded, summed over all frames.
    pub items_uploaded: u64,
    /// Item instance ranges uploaded, summed over all frames.
    pub instance_ranges_uploaded: u64,
    /// Material records uploaded, summed over all frames.
    pub materials_uploaded: u64,
    /// Draws recorded by the most recent submission.
    pub last_draws: usize,
}

/// Drives frames through the ring of frame resources.
pub struct FrameRenderer<D: GpuDevice> {
    context: GpuContext<D>,
    fence: FenceCounter<D>,
    ring: FrameRing<D>,
    desc: FrameResourceDesc,
    meshes: Vec<D::Mesh>,
    pipelines: Option<PipelineSet<D::Pipeline>>,
    wireframe: bool,
    width: u32,
    height: u32,
    stall_warn: Duration,
    stats: FrameStats,
    frames_prepared: u64,
    /// Set by the first fatal error.
    failed: bool,
    device_lost: bool,
}

impl<D: GpuDevice> FrameRenderer<D> {
    /// Creates the fence counter and the ring of frame resources.
    ///
    /// Without `pipelines` frames still upload and submit, but record no draws.
    ///
    /// # Arguments
    ///
    /// * `context` - Device and queue to render with
    /// * `config` - Validated renderer configuration
    /// * `pipelines` - Pipelines for the opaque and transparent layers
    ///
    /// # Errors
    ///
    /// Returns an error if any GPU object cannot be created.
    pub fn new(
        context: GpuContext<D>,
        config: &RendererConfig,
        pipelines: Option<PipelineSet<D::Pipeline>>,
    ) -> RhiResult<Self> {
        let desc = FrameResourceDesc::from_config(config);
        let fence = FenceCounter::new(&context, config.fence_timeout())?;
        let ring = FrameRing::new(&context, config.frames_in_flight as usize, &desc)?;

        info!(
            "Frame renderer created on {}: {} frames in flight, {}x{}",
            context.device().name(),
            ring.len(),
            config.width,
            config.height
        );
        if pipelines.is_none() {
            warn!("No pipelines supplied; frames will record no draws");
        }

        Ok(Self {
            context,
            fence,
            ring,
            desc,
            meshes: Vec::new(),
            pipelines,
            wireframe: false,
            width: config.width,
            height: config.height,
            stall_warn: config.stall_warn(),
            stats: FrameStats::default(),
            frames_prepared: 0,
            failed: false,
            device_lost: false,
        })
    }

    /// Creates an empty registry sized to this renderer's ring and buffers.
    pub fn create_registry(&self) -> RenderItemRegistry {
        RenderItemRegistry::new(self.ring.len() as u32, self.desc.into())
    }

    /// Acquires the next frame resource and uploads the frame's data into it.
    ///
    /// Blocks if the GPU still uses the slot. Pass constants are rebuilt every
    /// frame; items and materials are uploaded while their window is open.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] if the GPU does not release the slot
    /// within the configured timeout, or [`RhiError::DeviceLost`].
    ///
    /// # Panics
    ///
    /// Panics if the registry was built for a different ring length or exceeds
    /// the buffer capacities, if `input` holds more than [`MAX_LIGHTS`] lights,
    /// or if the previous token was never submitted.
    pub fn prepare_frame(
        &mut self,
        registry: &mut RenderItemRegistry,
        input: &PassInput,
    ) -> RhiResult<FrameToken> {
        self.check_alive()?;
        assert_eq!(
            registry.frames_in_flight() as usize,
            self.ring.len(),
            "registry propagates over a different number of frames than the ring holds"
        );
        assert!(
            self.desc.fits(registry.capacity()),
            "registry capacity {:?} exceeds frame resource capacity {:?}",
            registry.capacity(),
            self.desc
        );
        assert!(
            input.lights.len() <= MAX_LIGHTS,
            "pass input has {} lights, the pass constants hold at most {MAX_LIGHTS}",
            input.lights.len()
        );

        let start = Instant::now();
        let acquired = self.ring.acquire_next(&self.fence);
        let slot = self.guard(acquired)?;
        self.record_wait(slot, start.elapsed());

        let pass = PassConstants::new(input, self.width, self.height);
        let counts = upload_frame(self.ring.slot_mut(slot).buffers_mut(), registry, &pass);
        self.stats.items_uploaded += counts.items as u64;
        self.stats.instance_ranges_uploaded += counts.instances as u64;
        self.stats.materials_uploaded += counts.materials as u64;

        self.frames_prepared += 1;
        trace!(
            "Frame {} prepared in slot {} ({} items, {} materials)",
            self.frames_prepared, slot, counts.items, counts.materials
        );

        Ok(FrameToken {
            slot,
            frame: self.frames_prepared,
        })
    }

    /// Records, executes and fences a prepared frame.
    ///
    /// Returns the fence value that completes when the GPU is done with it.
    ///
    /// # Errors
    ///
    /// Returns an error if recording, submission or signalling fails.
    pub fn submit_frame(
        &mut self,
        token: FrameToken,
        registry: &RenderItemRegistry,
    ) -> RhiResult<u64> {
        self.submit_frame_with(token, registry, |_| {})
    }

    /// Like [`FrameRenderer::submit_frame`], recording `overlay` after the scene.
    ///
    /// The overlay runs on the open command list, after the transparent layer
    /// and before the list is closed.
    ///
    /// # Errors
    ///
    /// See [`FrameRenderer::submit_frame`].
    ///
    /// # Panics
    ///
    /// Panics if `token` does not belong to the slot being recorded.
    pub fn submit_frame_with<F>(
        &mut self,
        token: FrameToken,
        registry: &RenderItemRegistry,
        overlay: F,
    ) -> RhiResult<u64>
    where
        F: FnOnce(&mut D::CommandList),
    {
        self.check_alive()?;
        let slot = token.slot;
        assert_eq!(
            self.ring.current(),
            Some(slot),
            "frame token for slot {slot} does not match the recording slot"
        );

        let recorded = self.record_and_execute(slot, registry, overlay);
        let draws = self.guard(recorded)?;
        let advanced = self.fence.advance();
        let value = self.guard(advanced)?;
        self.ring.stamp(slot, value);

        self.stats.frames_submitted += 1;
        self.stats.last_fence = value;
        self.stats.last_draws = draws;
        trace!(
            "Frame {} submitted from slot {} with fence {} ({} draws)",
            token.frame, slot, value, draws
        );
        Ok(value)
    }

    /// Blocks until the GPU has finished every submitted frame.
    ///
    /// Does not block if the GPU already has; calling it twice in a row waits at
    /// most once.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::FenceTimeout`] or [`RhiError::DeviceLost`].
    pub fn wait_for_gpu_idle(&mut self) -> RhiResult<()> {
        self.check_alive()?;
        let waited = self.fence.wait_idle();
        self.guard(waited)?;
        let retired = self.ring.retire_completed(&self.fence);
        self.guard(retired)?;
        debug!("GPU idle at fence {}", self.fence.last_issued());
        Ok(())
    }

    /// Changes the render target size used for the pass constants.
    ///
    /// Drains the GPU first. Zero sizes (a minimized window) are ignored.
    ///
    /// # Errors
    ///
    /// See [`FrameRenderer::wait_for_gpu_idle`].
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }

        self.wait_for_gpu_idle()?;
        self.width = width;
        self.height = height;
        info!("Render target resized to {}x{}", width, height);
        Ok(())
    }

    /// Takes ownership of a mesh and returns the id render items refer to it by.
    pub fn register_mesh(&mut self, mesh: D::Mesh) -> MeshId {
        let id = MeshId::new(self.meshes.len() as u32);
        self.meshes.push(mesh);
        debug!("Registered mesh {}", id.index());
        id
    }

    /// Switches the opaque layer between solid and wireframe pipelines.
    pub fn set_wireframe(&mut self, wireframe: bool) {
        if self.wireframe != wireframe {
            debug!("Wireframe {}", if wireframe { "on" } else { "off" });
        }
        self.wireframe = wireframe;
    }

    /// Whether the opaque layer draws in wireframe.
    #[inline]
    pub fn wireframe(&self) -> bool {
        self.wireframe
    }

    /// Frame loop counters.
    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Number of frame resources.
    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Render target size used for the pass constants.
    #[inline]
    pub fn render_target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Whether a fatal error stopped the renderer.
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// The ring of frame resources.
    #[inline]
    pub fn ring(&self) -> &FrameRing<D> {
        &self.ring
    }

    /// The fence counter.
    #[inline]
    pub fn fence(&self) -> &FenceCounter<D> {
        &self.fence
    }

    /// Device and queue.
    #[inline]
    pub fn context(&self) -> &GpuContext<D> {
        &self.context
    }

    fn record_and_execute<F>(
        &mut self,
        slot: usize,
        registry: &RenderItemRegistry,
        overlay: F,
    ) -> RhiResult<usize>
    where
        F: FnOnce(&mut D::CommandList),
    {
        let frame = self.ring.slot_mut(slot);
        frame.begin_recording()?;
        let (list, buffers) = frame.recording_parts();

        let draws = match &self.pipelines {
            Some(pipelines) => record_draws::<D>(
                &mut *list,
                buffers,
                registry,
                &self.meshes,
                pipelines,
                self.wireframe,
            ),
            None => 0,
        };
        overlay(&mut *list);
        list.close()?;

        self.context.queue().execute(&[&*list])?;
        Ok(draws)
    }

    fn record_wait(&mut self, slot: usize, waited: Duration) {
        self.stats.total_wait += waited;
        self.stats.longest_wait = self.stats.longest_wait.max(waited);
        if waited > self.stall_warn {
            self.stats.stalls += 1;
            warn!(
                "Frame stalled {:.1} ms waiting for slot {} (fence {})",
                waited.as_secs_f64() * 1000.0,
                slot,
                self.ring.slot(slot).fence()
            );
        }
    }

    fn check_alive(&self) -> RhiResult<()> {
        if self.failed {
            Err(RhiError::DeviceLost(
                "frame pipeline stopped after a fatal error".to_string(),
            ))
        } else {
            Ok(())
        }
    }

    /// Latches the renderer into the failed state on a fatal error.
    fn guard<T>(&mut self, result: RhiResult<T>) -> RhiResult<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            error!("Fatal GPU error, stopping frame pipeline: {}", e);
            self.failed = true;
            self.device_lost |= e.is_device_lost();
        }
        result
    }
}

impl<D: GpuDevice> Drop for FrameRenderer<D> {
    fn drop(&mut self) {
        // GPU must be done with every frame resource before they are freed.
        if self.device_lost {
            debug!("Frame renderer destroyed after device loss");
            return;
        }
        if self.failed {
            let target = self.fence.last_issued();
            let timeout = self.fence.timeout().unwrap_or(FAILED_DRAIN_TIMEOUT);
            match self.fence.timeline().wait(target, Some(timeout)) {
                Ok(true) => debug!("GPU reached fence {} after failure", target),
                Ok(false) => error!(
                    "GPU did not reach fence {} within {:?}, freeing frame resources anyway",
                    target, timeout
                ),
                Err(e) => error!("Failed to drain GPU after failure: {}", e),
            }
        } else if let Err(e) = self.wait_for_gpu_idle() {
            error!("Failed to drain GPU during renderer drop: {:?}", e);
        }
        debug!("Frame renderer destroyed");
    }
}
