//! Geometry for the unlit pass and node transforms.
//!
//! - [`Vertex`]: position + texture coordinates, 20 bytes per vertex
//! - [`MeshData`]: CPU-side vertices and indices, consumed once at upload
//! - [`Mesh`]: GPU-resident vertex and index buffers
//! - [`Transform`]: local translation, rotation, and scale of a scene node
//!
//! # Vertex Layout
//!
//! | Attribute | Format    | Offset | Shader Location |
//! |-----------|-----------|--------|-----------------|
//! | position  | Float32x3 | 0      | 0               |
//! | texcoords | Float32x2 | 12     | 1               |

use glam::{Mat4, Quat, Vec3};

/// A vertex for the unlit pass.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub texcoords: [f32; 2],
}

impl Vertex {
    /// The wgpu vertex buffer layout for this vertex type.
    pub const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            // position
            wgpu::VertexAttribute {
                offset: 0,
                shader_location: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            // texcoords
            wgpu::VertexAttribute {
                offset: 12,
                shader_location: 1,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    pub fn new(position: [f32; 3], texcoords: [f32; 2]) -> Self {
        Self {
            position,
            texcoords,
        }
    }
}

/// Vertex and index data waiting to be uploaded.
#[derive(Clone, Debug, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// A `size` × `size` plane on the XZ axis facing +Y, centered at the origin.
    ///
    /// Texture coordinates repeat `uv_repeat` times across the plane.
    pub fn plane(size: f32, uv_repeat: f32) -> Self {
        let h = size / 2.0;
        let r = uv_repeat;
        #[rustfmt::skip]
        let vertices = vec![
            Vertex::new([-h, 0.0, -h], [0.0, 0.0]),
            Vertex::new([ h, 0.0, -h], [r,   0.0]),
            Vertex::new([ h, 0.0,  h], [r,   r  ]),
            Vertex::new([-h, 0.0,  h], [0.0, r  ]),
        ];
        // CCW seen from above
        let indices = vec![0, 2, 1, 0, 3, 2];
        Self::new(vertices, indices)
    }

    /// A unit cube centered at the origin, one quad per face.
    pub fn cube() -> Self {
        const FACES: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
            // normal, u axis, v axis
            ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
            ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
            ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
            ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ];

        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (n, u, v) in FACES {
            let (n, u, v) = (Vec3::from(n), Vec3::from(u), Vec3::from(v));
            let base = vertices.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let p = (n + u * su + v * sv) * 0.5;
                vertices.push(Vertex::new(p.into(), [(su + 1.0) / 2.0, (1.0 - sv) / 2.0]));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self::new(vertices, indices)
    }
}

/// GPU-resident geometry.
#[derive(Debug)]
pub struct Mesh {
    pub(crate) vertex_buffer: wgpu::Buffer,
    pub(crate) index_buffer: wgpu::Buffer,
    pub(crate) index_count: u32,
}

impl Mesh {
    pub fn new(device: &wgpu::Device, data: &MeshData, label: &str) -> Self {
        use wgpu::util::DeviceExt;

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Vertex Buffer")),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label} Index Buffer")),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// Local placement of a scene node.
///
/// Composed as translation × rotation × scale.
///
/// ```
/// use cumulus::{Transform, Vec3};
///
/// let plume = Transform::new()
///     .position(Vec3::new(0.0, 4.7, 0.0))
///     .uniform_scale(5.0);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self::new().position(position)
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    /// Rotates so the -Z axis faces `target` from the current position.
    pub fn looking_at(mut self, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(self.position, target, up);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        self.rotation = rotation;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_is_20_bytes() {
        assert_eq!(std::mem::size_of::<Vertex>(), 20);
        assert_eq!(Vertex::LAYOUT.array_stride, 20);
        assert_eq!(Vertex::LAYOUT.attributes[1].offset, 12);
    }

    #[test]
    fn plane_faces_up() {
        let plane = MeshData::plane(10.0, 4.0);
        assert_eq!(plane.vertices.len(), 4);
        assert_eq!(plane.indices.len(), 6);

        let p = |i: u32| Vec3::from(plane.vertices[i as usize].position);
        let tri = &plane.indices[0..3];
        let normal = (p(tri[1]) - p(tri[0])).cross(p(tri[2]) - p(tri[0]));
        assert!(normal.y > 0.0);
    }

    #[test]
    fn cube_has_a_quad_per_face() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert!(cube
            .vertices
            .iter()
            .all(|v| v.position.iter().all(|c| c.abs() == 0.5)));
    }

    #[test]
    fn transform_applies_scale_before_translation() {
        let t = Transform::new()
            .position(Vec3::new(0.0, 4.7, 0.0))
            .uniform_scale(5.0);
        let p = t.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(5.0, 4.7, 0.0)).length() < 1e-5);
    }

    #[test]
    fn looking_at_points_forward_at_the_target() {
        let t = Transform::from_position(Vec3::new(0.0, 0.0, 10.0)).looking_at(Vec3::ZERO, Vec3::Y);
        let forward = t.rotation * Vec3::NEG_Z;
        assert!((forward - Vec3::NEG_Z).length() < 1e-5);
    }
}
