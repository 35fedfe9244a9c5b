//! Synchronization primitives.

use crate::device::{QueueKind, SemaphoreWait, SharedDevice, Submission};
use crate::error::Result;
use crate::resources::{Fence, Semaphore};
use ash::vk;

/// Index of the frame currently being recorded, cycling through `[0, N)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCycle {
    current: usize,
    frames_in_flight: usize,
}

impl FrameCycle {
    /// Start at frame 0. `frames_in_flight` is clamped to at least 1.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            current: 0,
            frames_in_flight: frames_in_flight.max(1),
        }
    }

    /// Get the current frame index.
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }
}

/// Frame synchronization resources.
///
/// The in-flight fence is created signaled so the first wait on each frame
/// index returns immediately.
pub struct FrameSync {
    /// Signaled when the frame's last submission completes
    pub in_flight: Fence,
    /// Signaled when the acquired swapchain image is available
    pub image_available: Semaphore,
    /// Signaled by the shadow submission
    pub shadows_finished: Semaphore,
    /// Signaled by the main scene submission
    pub scene_finished: Semaphore,
    /// Signaled by the compute submission
    pub compute_finished: Semaphore,
    /// Signaled by the frame's last submission; presentation waits on it
    pub render_finished: Semaphore,
}

impl FrameSync {
    /// Create frame synchronization resources.
    pub fn new(device: &SharedDevice) -> Result<Self> {
        Ok(Self {
            in_flight: Fence::create(device, true)?,
            image_available: Semaphore::create(device)?,
            shadows_finished: Semaphore::create(device)?,
            scene_finished: Semaphore::create(device)?,
            compute_finished: Semaphore::create(device)?,
            render_finished: Semaphore::create(device)?,
        })
    }

    /// Wait for this frame to be available.
    pub fn wait(&self) -> Result<()> {
        self.in_flight.wait()
    }

    /// Reset the fence for the next submission.
    pub fn reset(&self) -> Result<()> {
        self.in_flight.reset()
    }
}

/// Manages synchronization for multiple frames in flight.
pub struct FrameSyncManager {
    frame_syncs: Vec<FrameSync>,
    cycle: FrameCycle,
}

impl FrameSyncManager {
    /// Create a sync manager for the given number of frames in flight.
    pub fn new(device: &SharedDevice, frames_in_flight: usize) -> Result<Self> {
        let cycle = FrameCycle::new(frames_in_flight);
        let frame_syncs = (0..cycle.frames_in_flight())
            .map(|_| FrameSync::new(device))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { frame_syncs, cycle })
    }

    /// Get the current frame's sync resources.
    pub fn current(&self) -> &FrameSync {
        &self.frame_syncs[self.cycle.current()]
    }

    /// Advance to the next frame.
    pub fn advance(&mut self) {
        self.cycle.advance();
    }

    /// Get the current frame index.
    pub fn current_frame(&self) -> usize {
        self.cycle.current()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.cycle.frames_in_flight()
    }

    /// Wait for every frame's last submission.
    pub fn wait_all(&self) -> Result<()> {
        self.frame_syncs.iter().try_for_each(FrameSync::wait)
    }
}

/// Chains submissions so each waits on the previous one's signal.
pub struct SubmissionChain<'a> {
    device: &'a SharedDevice,
    previous: Option<vk::Semaphore>,
}

impl<'a> SubmissionChain<'a> {
    pub fn new(device: &'a SharedDevice) -> Self {
        Self {
            device,
            previous: None,
        }
    }

    /// Submit `command_buffers` to `queue`.
    ///
    /// The submission waits on the previous link's signal at `wait_stage`,
    /// plus `extra_waits`, and signals `signals`. The first entry of
    /// `signals` is what the next link waits on.
    pub fn submit(
        &mut self,
        queue: QueueKind,
        command_buffers: &[vk::CommandBuffer],
        wait_stage: vk::PipelineStageFlags,
        extra_waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> Result<()> {
        let waits: Vec<SemaphoreWait> = self
            .previous
            .map(|semaphore| SemaphoreWait {
                semaphore,
                stage: wait_stage,
            })
            .into_iter()
            .chain(extra_waits.iter().copied())
            .collect();

        self.device.submit(
            queue,
            &Submission {
                command_buffers,
                waits: &waits,
                signals,
                fence,
            },
        )?;
        self.previous = signals.first().copied();
        Ok(())
    }

    /// Semaphore the next link will wait on.
    pub fn tail(&self) -> Option<vk::Semaphore> {
        self.previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;
    use std::sync::Arc;

    #[test]
    fn frame_index_returns_after_n_frames() {
        for n in 1..=4 {
            let mut cycle = FrameCycle::new(n);
            let start = cycle.current();
            let mut seen = Vec::new();
            for _ in 0..n {
                seen.push(cycle.current());
                cycle.advance();
            }
            assert_eq!(cycle.current(), start);
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), n, "in-flight frames must not share an index");
        }
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let mut cycle = FrameCycle::new(0);
        cycle.advance();
        assert_eq!(cycle.current(), 0);
    }

    #[test]
    fn first_wait_on_each_frame_returns_immediately() {
        let device: SharedDevice = Arc::new(HeadlessDevice::default());
        let mut syncs = FrameSyncManager::new(&device, 2).unwrap();
        syncs.current().wait().unwrap();
        syncs.advance();
        syncs.current().wait().unwrap();
        syncs.advance();
        assert_eq!(syncs.current_frame(), 0);
    }

    #[test]
    fn chain_links_each_submission_to_the_previous_signal() {
        let headless = Arc::new(HeadlessDevice::default());
        let device: SharedDevice = headless.clone();
        let first = device.create_semaphore().unwrap();
        let second = device.create_semaphore().unwrap();
        let acquire = device.create_semaphore().unwrap();

        let mut chain = SubmissionChain::new(&device);
        chain
            .submit(
                QueueKind::Graphics,
                &[],
                vk::PipelineStageFlags::TOP_OF_PIPE,
                &[],
                &[first],
                vk::Fence::null(),
            )
            .unwrap();
        chain
            .submit(
                QueueKind::Compute,
                &[],
                vk::PipelineStageFlags::COMPUTE_SHADER,
                &[SemaphoreWait {
                    semaphore: acquire,
                    stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                }],
                &[second],
                vk::Fence::null(),
            )
            .unwrap();

        let submissions = headless.submissions();
        assert!(submissions[0].waits.is_empty());
        assert_eq!(submissions[1].queue, QueueKind::Compute);
        assert_eq!(submissions[1].waits[0].semaphore, first);
        assert_eq!(submissions[1].waits[1].semaphore, acquire);
        assert_eq!(chain.tail(), Some(second));
    }
}
