//! Shader bindings for the volume ray marchers.
//!
//! Static descriptors register each shader permutation (vertex + pixel
//! source pair and entry points) and the uniform block it reads. Both render
//! extensions resolve their pipelines through these tables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{RenderError, RenderResult};
use crate::uniforms::{ResearchShaderParams, VolumeProxyUniforms, VolumeViewUniforms};

/// Virtual directory the shader sources are registered under.
pub const SHADER_VIRTUAL_DIR: &str = "/Plugin/VdbVolume";

/// A precompiled pipeline variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderPermutation {
    /// Surface shading of a level set's zero crossing.
    LevelSet,
    /// Density accumulation through participating media.
    FogVolume,
    /// Experimental single-pair research shader.
    Research,
}

impl ShaderPermutation {
    /// Permutations drawn by the main extension.
    pub const STANDARD: [ShaderPermutation; 2] =
        [ShaderPermutation::LevelSet, ShaderPermutation::FogVolume];

    /// Picks the main-extension permutation for a shading mode.
    #[must_use]
    pub fn for_mode(mode: sparse_volume_core::ShadingMode) -> Self {
        if mode.is_level_set() {
            ShaderPermutation::LevelSet
        } else {
            ShaderPermutation::FogVolume
        }
    }

    /// Returns the static descriptor of this permutation.
    #[must_use]
    pub fn descriptor(self) -> &'static ShaderDescriptor {
        match self {
            ShaderPermutation::LevelSet => &VDB_LEVEL_SET_SHADER,
            ShaderPermutation::FogVolume => &VDB_FOG_VOLUME_SHADER,
            ShaderPermutation::Research => &VDB_RESEARCH_SHADER,
        }
    }
}

/// One source file of a shader stage.
#[derive(Debug)]
pub struct ShaderStageSource {
    /// Path under [`SHADER_VIRTUAL_DIR`].
    pub virtual_path: &'static str,
    /// Entry point name.
    pub entry: &'static str,
    /// Source compiled into the crate.
    pub embedded: &'static str,
}

/// Layout of a uniform block shared with WGSL.
#[derive(Debug)]
pub struct UniformBlockLayout {
    /// WGSL struct name.
    pub name: &'static str,
    /// Size in bytes.
    pub size: usize,
    /// Field names in declaration order.
    pub fields: &'static [&'static str],
}

/// Static registration of one shader permutation.
#[derive(Debug)]
pub struct ShaderDescriptor {
    /// Permutation this descriptor registers.
    pub permutation: ShaderPermutation,
    /// Debug label.
    pub label: &'static str,
    /// Vertex stage.
    pub vertex: ShaderStageSource,
    /// Pixel stage.
    pub fragment: ShaderStageSource,
    /// Uniform blocks bound, in bind group order.
    pub uniform_blocks: &'static [&'static UniformBlockLayout],
}

/// Per-view block read by the standard permutations.
pub static VDB_VIEW_PARAMS: UniformBlockLayout = UniformBlockLayout {
    name: "VdbViewParams",
    size: std::mem::size_of::<VolumeViewUniforms>(),
    fields: &[
        "view",
        "projection",
        "view_projection",
        "inv_view_projection",
        "camera_position",
        "viewport_size",
        "inv_viewport_size",
    ],
};

/// Per-volume block read by the standard permutations.
pub static VDB_PARAMS: UniformBlockLayout = UniformBlockLayout {
    name: "VdbParams",
    size: std::mem::size_of::<VolumeProxyUniforms>(),
    fields: &[
        "normalized_to_world",
        "world_to_index",
        "index_to_world",
        "index_min",
        "step_length",
        "index_size",
        "density_multiplier",
        "grid_dims",
        "max_steps",
        "base_color",
        "emissive_strength",
        "voxel_format",
        "level_set",
        "step_multiplier",
    ],
};

/// Block read by the research permutation.
pub static VDB_RESEARCH_PARAMS: UniformBlockLayout = UniformBlockLayout {
    name: "VdbResearchParams",
    size: std::mem::size_of::<ResearchShaderParams>(),
    fields: &[
        "view_projection",
        "normalized_to_world",
        "world_to_index",
        "camera_position",
        "density_multiplier",
        "index_min",
        "step_length",
        "index_size",
        "max_steps",
        "grid_dims",
        "voxel_format",
    ],
};

const VDB_VERTEX: ShaderStageSource = ShaderStageSource {
    virtual_path: "Private/vdb_vertex.wgsl",
    entry: "vs_main",
    embedded: include_str!("shaders/vdb_vertex.wgsl"),
};

/// Level-set permutation.
pub static VDB_LEVEL_SET_SHADER: ShaderDescriptor = ShaderDescriptor {
    permutation: ShaderPermutation::LevelSet,
    label: "VDB Level Set",
    vertex: VDB_VERTEX,
    fragment: ShaderStageSource {
        virtual_path: "Private/vdb_level_set.wgsl",
        entry: "fs_main",
        embedded: include_str!("shaders/vdb_level_set.wgsl"),
    },
    uniform_blocks: &[&VDB_VIEW_PARAMS, &VDB_PARAMS],
};

/// Fog-volume permutation.
pub static VDB_FOG_VOLUME_SHADER: ShaderDescriptor = ShaderDescriptor {
    permutation: ShaderPermutation::FogVolume,
    label: "VDB Fog Volume",
    vertex: VDB_VERTEX,
    fragment: ShaderStageSource {
        virtual_path: "Private/vdb_fog_volume.wgsl",
        entry: "fs_main",
        embedded: include_str!("shaders/vdb_fog_volume.wgsl"),
    },
    uniform_blocks: &[&VDB_VIEW_PARAMS, &VDB_PARAMS],
};

const VDB_RESEARCH: &str = include_str!("shaders/vdb_research.wgsl");

/// Research permutation: one file holding both stages.
pub static VDB_RESEARCH_SHADER: ShaderDescriptor = ShaderDescriptor {
    permutation: ShaderPermutation::Research,
    label: "VDB Research",
    vertex: ShaderStageSource {
        virtual_path: "Private/vdb_research.wgsl",
        entry: "vs_main",
        embedded: VDB_RESEARCH,
    },
    fragment: ShaderStageSource {
        virtual_path: "Private/vdb_research.wgsl",
        entry: "fs_main",
        embedded: VDB_RESEARCH,
    },
    uniform_blocks: &[&VDB_RESEARCH_PARAMS],
};

/// Maps virtual shader directories to directories on disk.
///
/// Sources found on disk override the embedded copies, so shader files can
/// be edited without rebuilding.
#[derive(Debug, Default, Clone)]
pub struct ShaderSourceMap {
    mappings: HashMap<String, PathBuf>,
}

impl ShaderSourceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `virtual_dir` to `directory`, replacing an earlier mapping.
    pub fn add_mapping(&mut self, virtual_dir: impl Into<String>, directory: impl Into<PathBuf>) {
        let virtual_dir = virtual_dir.into();
        let directory = directory.into();
        log::info!("shader directory {virtual_dir} -> {}", directory.display());
        self.mappings.insert(virtual_dir, directory);
    }

    /// Removes a mapping.
    pub fn remove_mapping(&mut self, virtual_dir: &str) -> Option<PathBuf> {
        self.mappings.remove(virtual_dir)
    }

    /// Resolves `relative` under `virtual_dir` to a disk path.
    #[must_use]
    pub fn resolve(&self, virtual_dir: &str, relative: &str) -> Option<PathBuf> {
        self.mappings.get(virtual_dir).map(|dir| dir.join(relative))
    }

    /// Loads a stage's source: the mapped file when present, else the embedded copy.
    #[must_use]
    pub fn load(&self, stage: &ShaderStageSource) -> String {
        self.resolve(SHADER_VIRTUAL_DIR, stage.virtual_path)
            .filter(|path| path.is_file())
            .and_then(|path| read_source(&path))
            .unwrap_or_else(|| stage.embedded.to_string())
    }

    /// Returns a builder loaded with a permutation's sources.
    #[must_use]
    pub fn builder_for(&self, permutation: ShaderPermutation) -> ShaderBuilder {
        let desc = permutation.descriptor();
        ShaderBuilder::new()
            .with_label(desc.label)
            .with_vertex(self.load(&desc.vertex))
            .with_vertex_entry(desc.vertex.entry)
            .with_fragment(self.load(&desc.fragment))
            .with_fragment_entry(desc.fragment.entry)
    }
}

fn read_source(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(err) => {
            log::warn!("failed to read shader {}: {err}", path.display());
            None
        }
    }
}

/// Builder for creating shader modules from stage sources.
pub struct ShaderBuilder {
    vertex_source: Option<String>,
    fragment_source: Option<String>,
    vertex_entry: String,
    fragment_entry: String,
    label: Option<String>,
}

impl ShaderBuilder {
    /// Creates a new shader builder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vertex_source: None,
            fragment_source: None,
            vertex_entry: "vs_main".to_string(),
            fragment_entry: "fs_main".to_string(),
            label: None,
        }
    }

    /// Sets the vertex shader source (WGSL).
    #[must_use]
    pub fn with_vertex(mut self, source: impl Into<String>) -> Self {
        self.vertex_source = Some(source.into());
        self
    }

    /// Sets the fragment shader source (WGSL).
    #[must_use]
    pub fn with_fragment(mut self, source: impl Into<String>) -> Self {
        self.fragment_source = Some(source.into());
        self
    }

    /// Sets the vertex shader entry point.
    #[must_use]
    pub fn with_vertex_entry(mut self, entry: impl Into<String>) -> Self {
        self.vertex_entry = entry.into();
        self
    }

    /// Sets the fragment shader entry point.
    #[must_use]
    pub fn with_fragment_entry(mut self, entry: impl Into<String>) -> Self {
        self.fragment_entry = entry.into();
        self
    }

    /// Sets the shader label for debugging.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Vertex entry point.
    #[must_use]
    pub fn vertex_entry(&self) -> &str {
        &self.vertex_entry
    }

    /// Fragment entry point.
    #[must_use]
    pub fn fragment_entry(&self) -> &str {
        &self.fragment_entry
    }

    /// Builds the shader module (does not create pipeline).
    pub fn build_module(&self, device: &wgpu::Device) -> RenderResult<wgpu::ShaderModule> {
        let source = self.combined_source()?;

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: self.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });

        Ok(module)
    }

    /// Concatenates vertex and fragment sources into one module.
    pub fn combined_source(&self) -> RenderResult<String> {
        let vertex = self
            .vertex_source
            .as_ref()
            .ok_or_else(|| RenderError::ShaderCompilationFailed("missing vertex shader".into()))?;

        let fragment = self.fragment_source.as_ref().ok_or_else(|| {
            RenderError::ShaderCompilationFailed("missing fragment shader".into())
        })?;

        // If sources are the same file, just return one
        if vertex == fragment {
            return Ok(vertex.clone());
        }

        Ok(format!("{vertex}\n\n{fragment}"))
    }
}

impl Default for ShaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permutation_for_mode() {
        use sparse_volume_core::ShadingMode;
        assert_eq!(
            ShaderPermutation::for_mode(ShadingMode::LevelSet),
            ShaderPermutation::LevelSet
        );
        assert_eq!(
            ShaderPermutation::for_mode(ShadingMode::FogVolume),
            ShaderPermutation::FogVolume
        );
    }

    #[test]
    fn test_descriptors_register_their_permutation() {
        for permutation in [
            ShaderPermutation::LevelSet,
            ShaderPermutation::FogVolume,
            ShaderPermutation::Research,
        ] {
            assert_eq!(permutation.descriptor().permutation, permutation);
        }
    }

    #[test]
    fn test_wgsl_declares_every_uniform_field() {
        for permutation in [
            ShaderPermutation::LevelSet,
            ShaderPermutation::FogVolume,
            ShaderPermutation::Research,
        ] {
            let source = ShaderSourceMap::new()
                .builder_for(permutation)
                .combined_source()
                .unwrap();
            for block in permutation.descriptor().uniform_blocks {
                assert!(
                    source.contains(&format!("struct {}", block.name)),
                    "{:?} is missing struct {}",
                    permutation,
                    block.name
                );
                for field in block.fields {
                    assert!(
                        source.contains(&format!("{field}:")),
                        "{:?} is missing field {}.{}",
                        permutation,
                        block.name,
                        field
                    );
                }
            }
        }
    }

    #[test]
    fn test_standard_permutations_share_vertex_stage() {
        let level_set = ShaderPermutation::LevelSet.descriptor();
        let fog = ShaderPermutation::FogVolume.descriptor();
        assert_eq!(level_set.vertex.virtual_path, fog.vertex.virtual_path);
        assert_ne!(level_set.fragment.virtual_path, fog.fragment.virtual_path);
    }

    #[test]
    fn test_mapped_directory_overrides_embedded_source() {
        let dir = std::env::temp_dir().join(format!("vdb-shaders-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("Private")).unwrap();
        std::fs::write(dir.join("Private/vdb_fog_volume.wgsl"), "// override").unwrap();

        let mut map = ShaderSourceMap::new();
        map.add_mapping(SHADER_VIRTUAL_DIR, &dir);
        let fog = map.load(&VDB_FOG_VOLUME_SHADER.fragment);
        let level_set = map.load(&VDB_LEVEL_SET_SHADER.fragment);
        assert_eq!(fog, "// override");
        assert_eq!(level_set, VDB_LEVEL_SET_SHADER.fragment.embedded);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_builder_requires_both_stages() {
        let result = ShaderBuilder::new().with_vertex("fn a() {}").combined_source();
        assert!(matches!(result, Err(RenderError::ShaderCompilationFailed(_))));
    }
}
