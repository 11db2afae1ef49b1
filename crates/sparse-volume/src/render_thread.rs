//! A dedicated render thread driving a [`RenderScene`].

use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::scene::{RenderScene, SceneFrame};
use crate::{Result, SceneView, VolumeError};

/// Work sent to the render thread.
#[derive(Debug)]
pub enum FrameRequest {
    /// Run one full frame for these views.
    Frame(Vec<SceneView>),
    /// Stop after the frames already queued.
    Shutdown,
}

/// Owns a [`RenderScene`] on its own thread.
///
/// Frames are requested with [`RenderThread::render`] and their results
/// collected, in order, with [`RenderThread::recv_frame`].
#[derive(Debug)]
pub struct RenderThread {
    requests: mpsc::Sender<FrameRequest>,
    frames: mpsc::Receiver<Result<SceneFrame>>,
    handle: Option<JoinHandle<RenderScene>>,
}

impl RenderThread {
    /// Thread name shown in debuggers and panics.
    pub const THREAD_NAME: &'static str = "sparse-volume-render";

    /// Moves `scene` onto a new render thread.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the thread cannot be spawned.
    pub fn spawn(mut scene: RenderScene) -> Result<Self> {
        scene.clear_owner();
        let (requests, request_rx) = mpsc::channel::<FrameRequest>();
        let (frame_tx, frames) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || {
                log::debug!("render thread started");
                for request in request_rx {
                    match request {
                        FrameRequest::Frame(views) => {
                            let frame = scene.render_frame(&views);
                            if frame_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        FrameRequest::Shutdown => break,
                    }
                }
                log::debug!("render thread stopped at frame {}", scene.frame());
                scene.clear_owner();
                scene
            })?;

        Ok(Self {
            requests,
            frames,
            handle: Some(handle),
        })
    }

    /// Queues a frame for `views` without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Disconnected`] if the thread has stopped.
    pub fn render(&self, views: Vec<SceneView>) -> Result<()> {
        self.requests
            .send(FrameRequest::Frame(views))
            .map_err(|_| VolumeError::Disconnected)
    }

    /// Waits for the oldest outstanding frame.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Disconnected`] if the thread stopped first, or
    /// the frame's own error.
    pub fn recv_frame(&self) -> Result<SceneFrame> {
        self.frames.recv().map_err(|_| VolumeError::Disconnected)?
    }

    /// Queues a frame and waits for it.
    pub fn render_blocking(&self, views: Vec<SceneView>) -> Result<SceneFrame> {
        self.render(views)?;
        self.recv_frame()
    }

    /// Stops the thread and hands the scene back.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::RenderError`] if the thread panicked.
    pub fn shutdown(mut self) -> Result<RenderScene> {
        let _ = self.requests.send(FrameRequest::Shutdown);
        let handle = self.handle.take().ok_or(VolumeError::Disconnected)?;
        handle
            .join()
            .map_err(|_| VolumeError::RenderError("render thread panicked".to_string()))
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.requests.send(FrameRequest::Shutdown);
            if handle.join().is_err() {
                log::warn!("render thread panicked");
            }
        }
    }
}
