//! Logical resources of the render graph.
//!
//! Resources are declared by name through pass edges and live in an arena
//! owned by the [`RenderGraph`](crate::RenderGraph); passes refer to them by
//! index only. During baking every surviving resource is assigned a *physical*
//! index, and multiple logical resources may end up sharing one physical
//! allocation (aliasing, or an explicitly declared input twin).

use std::collections::HashSet;

use ash::vk;

/// How the final size of an attachment is computed.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum SizeClass {
    /// `size_x`/`size_y` are absolute pixel counts.
    Absolute,
    /// `size_x`/`size_y` scale the swapchain dimensions.
    #[default]
    SwapchainRelative,
    /// `size_x`/`size_y` scale the resolved dimensions of `size_relative_name`.
    InputRelative,
}

/// Describes an image attachment. Sizes are resolved against the swapchain or
/// another resource at bake time depending on [`SizeClass`].
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentInfo {
    pub size_class: SizeClass,
    pub size_x: f32,
    pub size_y: f32,
    pub format: vk::Format,
    /// Referent resource when `size_class` is [`SizeClass::InputRelative`].
    pub size_relative_name: Option<String>,
    pub levels: u32,
    pub layers: u32,
    /// Contents survive across frames. Non-persistent attachments may be
    /// recreated freely whenever attachments are set up again.
    pub persistent: bool,
}

impl Default for AttachmentInfo {
    fn default() -> Self {
        Self {
            size_class: SizeClass::SwapchainRelative,
            size_x: 1.0,
            size_y: 1.0,
            format: vk::Format::UNDEFINED,
            size_relative_name: None,
            levels: 1,
            layers: 1,
            persistent: true,
        }
    }
}

impl AttachmentInfo {
    /// Swapchain-relative attachment with the given format.
    pub fn with_format(format: vk::Format) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

/// Describes a buffer resource. Equality on this drives physical reuse.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BufferInfo {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub persistent: bool,
}

impl Default for BufferInfo {
    fn default() -> Self {
        Self {
            size: 0,
            usage: vk::BufferUsageFlags::empty(),
            persistent: true,
        }
    }
}

/// Fully resolved dimensions of one physical resource. Two logical resources
/// whose dimension records compare equal are candidates for sharing a physical
/// allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDimensions {
    pub format: vk::Format,
    pub buffer_info: BufferInfo,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layers: u32,
    pub levels: u32,
    pub transient: bool,
    pub persistent: bool,
    pub storage: bool,
}

impl Default for ResourceDimensions {
    fn default() -> Self {
        Self {
            format: vk::Format::UNDEFINED,
            buffer_info: BufferInfo {
                size: 0,
                usage: vk::BufferUsageFlags::empty(),
                persistent: false,
            },
            width: 0,
            height: 0,
            depth: 1,
            layers: 1,
            levels: 1,
            transient: false,
            persistent: false,
            storage: false,
        }
    }
}

impl ResourceDimensions {
    /// Dimension records with a non-zero buffer size describe buffers, all
    /// others describe images.
    pub fn is_buffer(&self) -> bool {
        self.buffer_info.size != 0
    }
}

/// Payload distinguishing image resources from buffer resources.
#[derive(Debug, Clone)]
pub enum ResourceKind {
    Texture {
        info: AttachmentInfo,
        /// Contents never leave the physical pass writing them; may be backed
        /// by lazily allocated memory.
        transient: bool,
        /// Used as a storage image somewhere in the graph.
        storage: bool,
    },
    Buffer { info: BufferInfo },
}

/// A logical resource: a name, the set of passes reading and writing it, and
/// the physical slot assigned during baking.
#[derive(Debug, Clone)]
pub struct RenderResource {
    pub(crate) index: usize,
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) written_in_passes: HashSet<usize>,
    pub(crate) read_in_passes: HashSet<usize>,
    pub(crate) physical_index: Option<usize>,
}

impl RenderResource {
    pub(crate) fn texture(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            kind: ResourceKind::Texture {
                info: AttachmentInfo::default(),
                transient: false,
                storage: false,
            },
            written_in_passes: HashSet::new(),
            read_in_passes: HashSet::new(),
            physical_index: None,
        }
    }

    pub(crate) fn buffer(index: usize, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            kind: ResourceKind::Buffer {
                info: BufferInfo::default(),
            },
            written_in_passes: HashSet::new(),
            read_in_passes: HashSet::new(),
            physical_index: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_texture(&self) -> bool {
        matches!(self.kind, ResourceKind::Texture { .. })
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self.kind, ResourceKind::Buffer { .. })
    }

    /// Physical slot assigned by the last bake, if any.
    pub fn physical_index(&self) -> Option<usize> {
        self.physical_index
    }

    pub fn attachment_info(&self) -> Option<&AttachmentInfo> {
        match &self.kind {
            ResourceKind::Texture { info, .. } => Some(info),
            ResourceKind::Buffer { .. } => None,
        }
    }

    pub fn buffer_info(&self) -> Option<&BufferInfo> {
        match &self.kind {
            ResourceKind::Buffer { info } => Some(info),
            ResourceKind::Texture { .. } => None,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self.kind, ResourceKind::Texture { storage: true, .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ResourceKind::Texture { transient: true, .. })
    }

    /// Passes writing this resource this frame.
    pub fn write_passes(&self) -> &HashSet<usize> {
        &self.written_in_passes
    }

    /// Passes reading this resource this frame. History reads are not
    /// included, they observe the previous frame.
    pub fn read_passes(&self) -> &HashSet<usize> {
        &self.read_in_passes
    }

    pub(crate) fn written_in_pass(&mut self, pass: usize) {
        self.written_in_passes.insert(pass);
    }

    pub(crate) fn read_in_pass(&mut self, pass: usize) {
        self.read_in_passes.insert(pass);
    }

    pub(crate) fn set_attachment_info(&mut self, new_info: AttachmentInfo) {
        if let ResourceKind::Texture { info, .. } = &mut self.kind {
            *info = new_info;
        }
    }

    pub(crate) fn set_buffer_info(&mut self, new_info: BufferInfo) {
        if let ResourceKind::Buffer { info } = &mut self.kind {
            *info = new_info;
        }
    }

    pub(crate) fn set_storage(&mut self) {
        if let ResourceKind::Texture { storage, .. } = &mut self.kind {
            *storage = true;
        }
    }

    pub(crate) fn set_transient(&mut self, enable: bool) {
        if let ResourceKind::Texture { transient, .. } = &mut self.kind {
            *transient = enable;
        }
    }
}
