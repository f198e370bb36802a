//! The scene the renderer walks each frame.
//!
//! Nodes are [`hecs`] entities. What a node *is* comes from which components
//! it carries:
//!
//! | Component            | Meaning                                    |
//! |----------------------|--------------------------------------------|
//! | [`Transform`]        | local placement relative to the parent     |
//! | [`Children`]         | ordered child list, insertion order        |
//! | [`Parent`]           | back-link used for world matrices          |
//! | [`Model`]            | primitives drawn by the unlit pass         |
//! | [`VolumeAttachment`] | an animated volume drawn by the volume pass |
//! | [`Camera`]           | a perspective projection                   |
//!
//! Mesh, material, texture, and volume data live in asset tables on
//! [`Scene`] and are referenced from components by typed ids. The renderer
//! reads the scene but never changes its topology.

use glam::Mat4;
use hecs::{Entity, World};

use crate::mesh::{MeshData, Transform};
use crate::volume::AnimatedVolume;

/// Handle to a mesh in [`Scene`]'s asset table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshId(pub(crate) usize);

/// Handle to a material in [`Scene`]'s asset table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MaterialId(pub(crate) usize);

/// Handle to an RGBA image in [`Scene`]'s asset table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub(crate) usize);

/// Handle to an animated volume in [`Scene`]'s asset table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VolumeId(pub(crate) usize);

/// Surface description for the unlit pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    /// Multiplied with the sampled texture color.
    pub base_factor: [f32; 4],
    /// `None` samples a 1×1 white texture.
    pub texture: Option<TextureId>,
}

impl Material {
    pub fn textured(texture: TextureId) -> Self {
        Self {
            base_factor: [1.0; 4],
            texture: Some(texture),
        }
    }

    pub fn solid(base_factor: [f32; 4]) -> Self {
        Self {
            base_factor,
            texture: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Primitive {
    pub mesh: MeshId,
    pub material: MaterialId,
}

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub primitives: Vec<Primitive>,
}

impl Model {
    pub fn single(mesh: MeshId, material: MaterialId) -> Self {
        Self {
            primitives: vec![Primitive { mesh, material }],
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Children(pub Vec<Entity>);

#[derive(Clone, Copy, Debug)]
pub struct Parent(pub Entity);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VolumeAttachment {
    pub volume: VolumeId,
}

/// Perspective camera. The view matrix is the inverse of the node's world matrix.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y: 45f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    /// Right-handed perspective with wgpu's 0..1 depth range.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect.max(f32::EPSILON), self.near, self.far)
    }
}

/// View and projection for one camera node, as uploaded to the GPU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
}

/// One node reached by [`Scene::traverse`], with its accumulated world matrix.
#[derive(Clone, Copy, Debug)]
pub struct VisitedNode {
    pub entity: Entity,
    pub world: Mat4,
}

#[derive(Default)]
pub struct Scene {
    world: World,
    roots: Vec<Entity>,
    meshes: Vec<MeshData>,
    materials: Vec<Material>,
    textures: Vec<image::RgbaImage>,
    volumes: Vec<AnimatedVolume>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_texture(&mut self, image: image::RgbaImage) -> TextureId {
        self.textures.push(image);
        TextureId(self.textures.len() - 1)
    }

    /// Decodes an image file into the texture table.
    pub fn load_texture(&mut self, path: &str) -> Result<TextureId, image::ImageError> {
        let img = image::open(path)?.to_rgba8();
        log::debug!("loaded texture {path} ({}x{})", img.width(), img.height());
        Ok(self.add_texture(img))
    }

    pub fn add_volume(&mut self, volume: AnimatedVolume) -> VolumeId {
        self.volumes.push(volume);
        VolumeId(self.volumes.len() - 1)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&MeshData> {
        self.meshes.get(id.0)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn texture(&self, id: TextureId) -> Option<&image::RgbaImage> {
        self.textures.get(id.0)
    }

    pub fn volume(&self, id: VolumeId) -> Option<&AnimatedVolume> {
        self.volumes.get(id.0)
    }

    /// Spawns a top-level node.
    pub fn spawn_node(&mut self, transform: Transform) -> Entity {
        let entity = self.world.spawn((transform, Children::default()));
        self.roots.push(entity);
        entity
    }

    /// Spawns a node under `parent`, after any existing children.
    pub fn spawn_child(
        &mut self,
        parent: Entity,
        transform: Transform,
    ) -> Result<Entity, hecs::NoSuchEntity> {
        if !self.world.contains(parent) {
            return Err(hecs::NoSuchEntity);
        }
        let child = self
            .world
            .spawn((transform, Children::default(), Parent(parent)));
        let appended = self
            .world
            .get::<&mut Children>(parent)
            .map(|mut children| children.0.push(child))
            .is_ok();
        if !appended {
            self.world.insert_one(parent, Children(vec![child]))?;
        }
        Ok(child)
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform) -> Result<(), hecs::NoSuchEntity> {
        self.world.insert_one(entity, transform)
    }

    pub fn set_model(&mut self, entity: Entity, model: Model) -> Result<(), hecs::NoSuchEntity> {
        self.world.insert_one(entity, model)
    }

    pub fn attach_volume(&mut self, entity: Entity, volume: VolumeId) -> Result<(), hecs::NoSuchEntity> {
        self.world.insert_one(entity, VolumeAttachment { volume })
    }

    /// Removes a volume attachment, turning the node back into an ordinary one.
    pub fn detach_volume(&mut self, entity: Entity) -> bool {
        self.world.remove_one::<VolumeAttachment>(entity).is_ok()
    }

    pub fn set_camera(&mut self, entity: Entity, camera: Camera) -> Result<(), hecs::NoSuchEntity> {
        self.world.insert_one(entity, camera)
    }

    /// Updates the aspect ratio of `camera` after a resize.
    pub fn set_camera_aspect(&mut self, camera: Entity, aspect: f32) {
        if let Ok(mut cam) = self.world.get::<&mut Camera>(camera) {
            cam.aspect = aspect;
        }
    }

    pub fn local_matrix(&self, entity: Entity) -> Mat4 {
        self.world
            .get::<&Transform>(entity)
            .map(|t| t.matrix())
            .unwrap_or(Mat4::IDENTITY)
    }

    /// World matrix of `entity`: its ancestors' local matrices applied outermost first.
    pub fn world_matrix(&self, entity: Entity) -> Option<Mat4> {
        if !self.world.contains(entity) {
            return None;
        }
        let mut matrix = self.local_matrix(entity);
        let mut current = entity;
        while let Ok(parent) = self.world.get::<&Parent>(current).map(|p| p.0) {
            matrix = self.local_matrix(parent) * matrix;
            current = parent;
        }
        Some(matrix)
    }

    pub fn camera_matrices(&self, camera: Entity) -> Option<CameraMatrices> {
        let projection = self.world.get::<&Camera>(camera).ok()?.projection();
        let view = self.world_matrix(camera)?.inverse();
        Some(CameraMatrices { view, projection })
    }

    /// Depth-first, parent before children, children in insertion order.
    pub fn traverse(&self) -> Vec<VisitedNode> {
        let mut visited = Vec::new();
        let mut stack: Vec<(Entity, Mat4)> = self
            .roots
            .iter()
            .rev()
            .filter(|e| self.world.contains(**e))
            .map(|&e| (e, Mat4::IDENTITY))
            .collect();

        while let Some((entity, parent_world)) = stack.pop() {
            let world = parent_world * self.local_matrix(entity);
            visited.push(VisitedNode { entity, world });

            if let Ok(children) = self.world.get::<&Children>(entity) {
                for &child in children.0.iter().rev() {
                    if self.world.contains(child) {
                        stack.push((child, world));
                    }
                }
            }
        }
        visited
    }

    pub fn is_volume(&self, entity: Entity) -> bool {
        self.world
            .entity(entity)
            .map(|e| e.has::<VolumeAttachment>())
            .unwrap_or(false)
    }

    pub fn volume_of(&self, entity: Entity) -> Option<VolumeId> {
        self.world
            .get::<&VolumeAttachment>(entity)
            .ok()
            .map(|v| v.volume)
    }

    pub fn primitives_of(&self, entity: Entity) -> Vec<Primitive> {
        self.world
            .get::<&Model>(entity)
            .map(|m| m.primitives.clone())
            .unwrap_or_default()
    }
}

/// A `size` × `size` checkerboard with `cells` squares per side and slight per-pixel grain.
pub fn checker_image(size: u32, cells: u32, light: [u8; 3], dark: [u8; 3], seed: u32) -> image::RgbaImage {
    let cell = (size / cells.max(1)).max(1);
    image::RgbaImage::from_fn(size, size, |x, y| {
        let base = if ((x / cell) + (y / cell)) % 2 == 0 { light } else { dark };
        let grain = (hash(x, y, seed) % 12) as i32 - 6;
        let c = |v: u8| (v as i32 + grain).clamp(0, 255) as u8;
        image::Rgba([c(base[0]), c(base[1]), c(base[2]), 255])
    })
}

fn hash(x: u32, y: u32, seed: u32) -> u32 {
    let mut h = seed;
    h = h.wrapping_add(x.wrapping_mul(374761393));
    h = h.wrapping_add(y.wrapping_mul(668265263));
    h ^= h >> 13;
    h = h.wrapping_mul(1274126177);
    h ^= h >> 16;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    use crate::volume::{AnimatedVolume, VoxelExtent};

    fn tiny_volume() -> AnimatedVolume {
        AnimatedVolume::procedural(VoxelExtent::cube(2), 1, 0).unwrap()
    }

    #[test]
    fn traversal_is_depth_first_in_insertion_order() {
        let mut scene = Scene::new();
        let a = scene.spawn_node(Transform::new());
        let a1 = scene.spawn_child(a, Transform::new()).unwrap();
        let a1x = scene.spawn_child(a1, Transform::new()).unwrap();
        let a2 = scene.spawn_child(a, Transform::new()).unwrap();
        let b = scene.spawn_node(Transform::new());

        let order: Vec<Entity> = scene.traverse().iter().map(|n| n.entity).collect();
        assert_eq!(order, vec![a, a1, a1x, a2, b]);
    }

    #[test]
    fn world_matrix_composes_parent_first() {
        let mut scene = Scene::new();
        let parent = scene.spawn_node(Transform::new().position(Vec3::new(0.0, 2.0, 0.0)).uniform_scale(2.0));
        let child = scene
            .spawn_child(parent, Transform::from_position(Vec3::new(1.0, 0.0, 0.0)))
            .unwrap();

        let world = scene.world_matrix(child).unwrap();
        let origin = world.transform_point3(Vec3::ZERO);
        assert!((origin - Vec3::new(2.0, 2.0, 0.0)).length() < 1e-5);

        let visited = scene.traverse();
        let from_traversal = visited.iter().find(|n| n.entity == child).unwrap().world;
        assert!(from_traversal.abs_diff_eq(world, 1e-5));
    }

    #[test]
    fn camera_view_inverts_its_world_matrix() {
        let mut scene = Scene::new();
        let cam = scene.spawn_node(Transform::from_position(Vec3::new(0.0, 0.0, 10.0)));
        scene.set_camera(cam, Camera::default()).unwrap();

        let m = scene.camera_matrices(cam).unwrap();
        let p = m.view.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 0.0, -10.0)).length() < 1e-5);
    }

    #[test]
    fn volume_attachment_changes_node_kind() {
        let mut scene = Scene::new();
        let vol = scene.add_volume(tiny_volume());
        let node = scene.spawn_node(Transform::new());
        assert!(!scene.is_volume(node));

        scene.attach_volume(node, vol).unwrap();
        assert!(scene.is_volume(node));
        assert_eq!(scene.volume_of(node), Some(vol));

        assert!(scene.detach_volume(node));
        assert!(!scene.is_volume(node));
    }

    #[test]
    fn sibling_volumes_are_visited_in_insertion_order() {
        let mut scene = Scene::new();
        let vol = scene.add_volume(tiny_volume());
        let root = scene.spawn_node(Transform::new());
        let first = scene.spawn_child(root, Transform::new()).unwrap();
        let second = scene.spawn_child(root, Transform::new()).unwrap();
        scene.attach_volume(second, vol).unwrap();
        scene.attach_volume(first, vol).unwrap();

        let volumes: Vec<Entity> = scene
            .traverse()
            .iter()
            .map(|n| n.entity)
            .filter(|&e| scene.is_volume(e))
            .collect();
        assert_eq!(volumes, vec![first, second]);
    }

    #[test]
    fn spawning_under_a_despawned_parent_fails() {
        let mut scene = Scene::new();
        let parent = scene.spawn_node(Transform::new());
        scene.world.despawn(parent).unwrap();
        assert!(scene.spawn_child(parent, Transform::new()).is_err());
        assert!(scene.traverse().is_empty());
    }

    #[test]
    fn checker_alternates_cells() {
        let img = checker_image(8, 2, [200, 200, 200], [40, 40, 40], 1);
        assert!(img.get_pixel(0, 0)[0] > 150);
        assert!(img.get_pixel(4, 0)[0] < 100);
        assert_eq!(img.get_pixel(3, 3)[3], 255);
    }
}
