//! WGSL sources for every pass.
//!
//! [`ShaderLibrary::embedded`] uses the sources compiled into the binary.
//! [`ShaderLibrary::from_dir`] reads the same file names from a directory,
//! which is how shaders are iterated on without rebuilding. A missing or
//! unreadable file fails immediately with [`ShaderError::Fetch`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::ShaderError;

const UNLIT: &str = include_str!("shaders/unlit.wgsl");
const NOISE: &str = include_str!("shaders/noise.wgsl");
const VOLUME: &str = include_str!("shaders/volume.wgsl");
const BRIGHT: &str = include_str!("shaders/bright.wgsl");
const BLOOM_DOWNSAMPLE: &str = include_str!("shaders/bloom_downsample.wgsl");
const BLOOM_UPSAMPLE: &str = include_str!("shaders/bloom_upsample.wgsl");
const FINAL: &str = include_str!("shaders/final.wgsl");

/// Source text for each pipeline.
#[derive(Clone, Debug)]
pub struct ShaderLibrary {
    pub unlit: String,
    /// `noise.wgsl` followed by `volume.wgsl`.
    pub volume: String,
    pub bright: String,
    pub bloom_downsample: String,
    pub bloom_upsample: String,
    pub final_composite: String,
    origin: Option<(PathBuf, SystemTime)>,
}

impl ShaderLibrary {
    pub fn embedded() -> Self {
        Self {
            unlit: UNLIT.to_string(),
            volume: concat_volume(NOISE, VOLUME),
            bright: BRIGHT.to_string(),
            bloom_downsample: BLOOM_DOWNSAMPLE.to_string(),
            bloom_upsample: BLOOM_UPSAMPLE.to_string(),
            final_composite: FINAL.to_string(),
            origin: None,
        }
    }

    /// Reads every stage from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ShaderError> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            let path = dir.join(name);
            fs::read_to_string(&path).map_err(|source| ShaderError::Fetch { path, source })
        };

        let library = Self {
            unlit: read("unlit.wgsl")?,
            volume: concat_volume(&read("noise.wgsl")?, &read("volume.wgsl")?),
            bright: read("bright.wgsl")?,
            bloom_downsample: read("bloom_downsample.wgsl")?,
            bloom_upsample: read("bloom_upsample.wgsl")?,
            final_composite: read("final.wgsl")?,
            origin: Some((dir.to_path_buf(), newest_modification(dir))),
        };
        log::info!("loaded shaders from {}", dir.display());
        Ok(library)
    }

    /// The directory these sources came from, if not embedded.
    pub fn source_dir(&self) -> Option<&Path> {
        self.origin.as_ref().map(|(dir, _)| dir.as_path())
    }

    /// Whether any file in the source directory changed since loading.
    pub fn is_stale(&self) -> bool {
        match &self.origin {
            Some((dir, loaded)) => newest_modification(dir) > *loaded,
            None => false,
        }
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::embedded()
    }
}

fn concat_volume(noise: &str, volume: &str) -> String {
    let mut source = String::with_capacity(noise.len() + volume.len() + 1);
    source.push_str(noise);
    source.push('\n');
    source.push_str(volume);
    source
}

fn newest_modification(dir: &Path) -> SystemTime {
    let Ok(entries) = fs::read_dir(dir) else {
        return SystemTime::UNIX_EPOCH;
    };
    entries
        .filter_map(|e| e.ok()?.metadata().ok()?.modified().ok())
        .max()
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_volume_source_has_noise_first() {
        let lib = ShaderLibrary::embedded();
        let noise_at = lib.volume.find("fn sample_noise").unwrap();
        let fs_at = lib.volume.find("fn fs(").unwrap();
        assert!(noise_at < fs_at);
        assert!(lib.source_dir().is_none());
        assert!(!lib.is_stale());
    }

    #[test]
    fn every_stage_declares_its_entry_points() {
        let lib = ShaderLibrary::embedded();
        for src in [
            &lib.unlit,
            &lib.volume,
            &lib.bloom_downsample,
            &lib.bloom_upsample,
            &lib.final_composite,
        ] {
            assert!(src.contains("fn vs("));
            assert!(src.contains("fn fs("));
        }
        assert!(lib.bright.contains("@workgroup_size(8, 8)"));
    }

    #[test]
    fn missing_directory_is_a_fetch_error() {
        let err = ShaderLibrary::from_dir("/nonexistent/shaders").unwrap_err();
        let ShaderError::Fetch { path, .. } = err;
        assert!(path.ends_with("unlit.wgsl"));
    }

    #[test]
    fn loads_from_the_source_tree() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/shaders");
        let lib = ShaderLibrary::from_dir(&dir).unwrap();
        assert_eq!(lib.bright, BRIGHT);
        assert_eq!(lib.source_dir(), Some(dir.as_path()));
    }

    #[test]
    fn edited_file_marks_the_library_stale() {
        let source = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/shaders");
        let dir = std::env::temp_dir().join(format!("cumulus-shaders-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for entry in fs::read_dir(&source).unwrap() {
            let path = entry.unwrap().path();
            fs::copy(&path, dir.join(path.file_name().unwrap())).unwrap();
        }

        let lib = ShaderLibrary::from_dir(&dir).unwrap();
        assert!(!lib.is_stale());

        let later = SystemTime::now() + std::time::Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(dir.join("bright.wgsl"))
            .unwrap()
            .set_modified(later)
            .unwrap();
        assert!(lib.is_stale());
        assert!(!ShaderLibrary::from_dir(&dir).unwrap().is_stale());

        fs::remove_dir_all(&dir).unwrap();
    }
}
