//! Simulation-side handle of a volume.

use glam::Mat4;

use crate::{
    CommandSender, ProxyDesc, ProxyId, RenderBufferId, RenderCommand, RenderParameters, Result,
    VolumeTransform, VoxelPayload,
};

/// A volume as seen by simulation code.
///
/// The component never touches render state. Every change is sent as a
/// [`RenderCommand`] and applied on the render timeline at the start of a
/// later frame. Dropping a registered component removes its proxy.
#[derive(Debug)]
pub struct VolumeComponent {
    sender: CommandSender,
    desc: ProxyDesc,
    proxy: Option<ProxyId>,
}

impl VolumeComponent {
    /// Creates an unregistered component.
    #[must_use]
    pub fn new(sender: CommandSender, desc: ProxyDesc) -> Self {
        Self {
            sender,
            desc,
            proxy: None,
        }
    }

    /// Adds the proxy to the render scene. Registering twice returns the same id.
    pub fn register(&mut self) -> Result<ProxyId> {
        if let Some(id) = self.proxy {
            return Ok(id);
        }
        let id = ProxyId::next();
        self.sender.send(RenderCommand::AddProxy {
            id,
            desc: self.desc.clone(),
        })?;
        self.proxy = Some(id);
        Ok(id)
    }

    /// Removes the proxy. Does nothing when not registered.
    pub fn unregister(&mut self) -> Result<()> {
        if let Some(id) = self.proxy.take() {
            self.sender.send(RenderCommand::RemoveProxy { id })?;
        }
        Ok(())
    }

    /// Uploads a new grid and makes it the drawn buffer.
    ///
    /// The buffer id is minted here, so the update referencing it can be
    /// queued right behind the upload.
    pub fn upload_grid(&mut self, payload: VoxelPayload) -> Result<RenderBufferId> {
        let id = RenderBufferId::next();
        self.sender
            .send(RenderCommand::CreateBuffer { id, payload })?;
        self.set_render_buffer(Some(id))?;
        Ok(id)
    }

    /// Points the proxy at an existing buffer, or at none.
    pub fn set_render_buffer(&mut self, render_buffer: Option<RenderBufferId>) -> Result<()> {
        let previous = std::mem::replace(&mut self.desc.render_buffer, render_buffer);
        match self.proxy {
            Some(id) => self.sender.send(RenderCommand::UpdateProxy {
                id,
                transform: self.desc.transform,
                render_buffer,
            }),
            // Not drawn yet; the render timeline may drop the old buffer now
            None => match previous.filter(|prev| Some(*prev) != render_buffer) {
                Some(prev) => self.sender.send(RenderCommand::ReleaseBuffer { id: prev }),
                None => Ok(()),
            },
        }
    }

    /// Replaces the grid placement.
    pub fn set_transform(&mut self, transform: VolumeTransform) -> Result<()> {
        self.desc.transform = transform;
        match self.proxy {
            Some(id) => self.sender.send(RenderCommand::UpdateProxy {
                id,
                transform,
                render_buffer: self.desc.render_buffer,
            }),
            None => Ok(()),
        }
    }

    /// Moves the volume in the world.
    pub fn set_local_to_world(&mut self, local_to_world: Mat4) -> Result<()> {
        self.desc.local_to_world = local_to_world;
        match self.proxy {
            Some(id) => self
                .sender
                .send(RenderCommand::UpdateProxyTransform { id, local_to_world }),
            None => Ok(()),
        }
    }

    /// Hides the volume in game views.
    pub fn set_hidden(&mut self, hidden: bool) -> Result<()> {
        self.desc.hidden_in_game = hidden;
        match self.proxy {
            Some(id) => self.sender.send(RenderCommand::SetProxyHidden { id, hidden }),
            None => Ok(()),
        }
    }

    /// Replaces the shading inputs.
    ///
    /// Parameters are fixed for a proxy's update cycle, so the proxy is
    /// recreated under a new id.
    pub fn set_params(&mut self, params: RenderParameters) -> Result<()> {
        self.desc.params = params;
        if self.proxy.is_some() {
            self.unregister()?;
            self.register()?;
        }
        Ok(())
    }

    /// Proxy id while registered.
    #[must_use]
    pub fn proxy(&self) -> Option<ProxyId> {
        self.proxy
    }

    /// Current description, as last sent.
    #[must_use]
    pub fn desc(&self) -> &ProxyDesc {
        &self.desc
    }

    /// Buffer the proxy draws.
    #[must_use]
    pub fn render_buffer(&self) -> Option<RenderBufferId> {
        self.desc.render_buffer
    }
}

impl Drop for VolumeComponent {
    fn drop(&mut self) {
        if let Err(err) = self.unregister() {
            log::debug!("volume component dropped after the render scene: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_queue;
    use glam::UVec3;

    #[test]
    fn test_commands_are_queued_in_order() {
        let (sender, receiver) = command_queue();
        let mut component = VolumeComponent::new(sender, ProxyDesc::default());
        let id = component.register().unwrap();
        assert_eq!(component.register().unwrap(), id);

        let buffer = component
            .upload_grid(VoxelPayload::from_f32(UVec3::ONE, &[1.0]).unwrap())
            .unwrap();
        component.set_hidden(true).unwrap();
        drop(component);

        let names: Vec<_> = receiver.drain().iter().map(RenderCommand::name).collect();
        assert_eq!(
            names,
            [
                "AddProxy",
                "CreateBuffer",
                "UpdateProxy",
                "SetProxyHidden",
                "RemoveProxy"
            ]
        );
        assert!(buffer.0 > 0);
    }

    #[test]
    fn test_unregistered_component_releases_replaced_buffer() {
        let (sender, receiver) = command_queue();
        let mut component = VolumeComponent::new(sender, ProxyDesc::default());
        let first = component
            .upload_grid(VoxelPayload::from_f32(UVec3::ONE, &[1.0]).unwrap())
            .unwrap();
        component
            .upload_grid(VoxelPayload::from_f32(UVec3::ONE, &[2.0]).unwrap())
            .unwrap();
        let commands = receiver.drain();
        assert!(commands
            .iter()
            .any(|c| matches!(c, RenderCommand::ReleaseBuffer { id } if *id == first)));
    }

    #[test]
    fn test_send_after_scene_is_gone_fails() {
        let (sender, receiver) = command_queue();
        drop(receiver);
        let mut component = VolumeComponent::new(sender, ProxyDesc::default());
        assert!(matches!(
            component.register(),
            Err(crate::VolumeError::Disconnected)
        ));
    }
}
