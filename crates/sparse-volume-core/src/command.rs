//! Commands marshalled from the simulation timeline to the render timeline.
//!
//! The simulation side never touches render state directly. It enqueues
//! [`RenderCommand`]s through a [`CommandSender`]; the render timeline drains
//! them once per frame through a [`CommandReceiver`]. The queue is a single
//! FIFO channel, so commands for one object are applied in the order they
//! were sent. No ordering is promised between different senders.

use std::sync::mpsc;

use glam::Mat4;

use crate::error::{Result, VolumeError};
use crate::proxy::{ProxyDesc, ProxyId};
use crate::transform::VolumeTransform;
use crate::voxel::{RenderBufferId, VoxelPayload};

/// A fire-and-forget update applied on the render timeline.
#[derive(Debug, Clone)]
pub enum RenderCommand {
    /// Allocate and upload a buffer under a pre-minted id.
    CreateBuffer {
        id: RenderBufferId,
        payload: VoxelPayload,
    },
    /// The simulation side no longer needs this buffer.
    ReleaseBuffer { id: RenderBufferId },
    /// Create a proxy.
    AddProxy { id: ProxyId, desc: ProxyDesc },
    /// Replace a proxy's transform and current buffer.
    UpdateProxy {
        id: ProxyId,
        transform: VolumeTransform,
        render_buffer: Option<RenderBufferId>,
    },
    /// Move a proxy in the world.
    UpdateProxyTransform { id: ProxyId, local_to_world: Mat4 },
    /// Toggle hidden-in-game.
    SetProxyHidden { id: ProxyId, hidden: bool },
    /// Destroy a proxy.
    RemoveProxy { id: ProxyId },
}

impl RenderCommand {
    /// Short name for logging.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RenderCommand::CreateBuffer { .. } => "CreateBuffer",
            RenderCommand::ReleaseBuffer { .. } => "ReleaseBuffer",
            RenderCommand::AddProxy { .. } => "AddProxy",
            RenderCommand::UpdateProxy { .. } => "UpdateProxy",
            RenderCommand::UpdateProxyTransform { .. } => "UpdateProxyTransform",
            RenderCommand::SetProxyHidden { .. } => "SetProxyHidden",
            RenderCommand::RemoveProxy { .. } => "RemoveProxy",
        }
    }
}

/// Simulation-side end of the command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<RenderCommand>,
}

impl CommandSender {
    /// Enqueues a command.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::Disconnected`] once the render timeline is gone.
    pub fn send(&self, command: RenderCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| VolumeError::Disconnected)
    }
}

/// Render-timeline end of the command queue.
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::Receiver<RenderCommand>,
}

impl CommandReceiver {
    /// Takes every command queued so far without blocking.
    #[must_use]
    pub fn drain(&self) -> Vec<RenderCommand> {
        self.rx.try_iter().collect()
    }
}

/// Creates a connected sender/receiver pair.
#[must_use]
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_arrive_in_order() {
        let (tx, rx) = command_queue();
        let id = ProxyId::next();
        let first = RenderBufferId::next();
        let second = RenderBufferId::next();
        for buffer in [first, second] {
            tx.send(RenderCommand::UpdateProxy {
                id,
                transform: VolumeTransform::default(),
                render_buffer: Some(buffer),
            })
            .unwrap();
        }

        let drained: Vec<_> = rx
            .drain()
            .into_iter()
            .filter_map(|c| match c {
                RenderCommand::UpdateProxy { render_buffer, .. } => render_buffer,
                _ => None,
            })
            .collect();
        assert_eq!(drained, vec![first, second]);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (tx, rx) = command_queue();
        drop(rx);
        let result = tx.send(RenderCommand::RemoveProxy { id: ProxyId::next() });
        assert!(matches!(result, Err(VolumeError::Disconnected)));
    }
}
