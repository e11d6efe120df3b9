//! Output paths

use crate::utils::{CaptureError, CaptureResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Default session directory name: the current Unix time in seconds
pub fn default_root_name() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Session directory under the selected volume, or the working directory
pub fn resolve_root(volume: Option<&Path>, name: &str) -> PathBuf {
    match volume {
        Some(volume) => volume.join(name),
        None => PathBuf::from(name),
    }
}

pub fn camera_dir(root: &Path, camera: usize) -> PathBuf {
    root.join(format!("cam{camera}"))
}

pub fn image_file_name(index: u64) -> String {
    format!("image{index:06}.jpg")
}

pub fn image_path(root: &Path, camera: usize, index: u64) -> PathBuf {
    camera_dir(root, camera).join(image_file_name(index))
}

/// Create the session directory; it must not exist yet
pub fn create_root(root: &Path) -> CaptureResult<()> {
    create_dir(root, "output directory")
}

/// Create `<root>/cam<id>/`
pub fn create_camera_dir(root: &Path, camera: usize) -> CaptureResult<PathBuf> {
    let dir = camera_dir(root, camera);
    create_dir(&dir, "camera directory")?;
    Ok(dir)
}

fn create_dir(path: &Path, resource: &'static str) -> CaptureResult<()> {
    fs::create_dir(path)
        .map_err(|e| CaptureError::resource(resource, format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_image_names_are_zero_padded() {
        assert_eq!(image_file_name(1), "image000001.jpg");
        assert_eq!(image_file_name(123456), "image123456.jpg");
        assert_eq!(image_file_name(1234567), "image1234567.jpg");
        assert_eq!(
            image_path(Path::new("/data/run"), 2, 7),
            PathBuf::from("/data/run/cam2/image000007.jpg")
        );
    }

    #[test]
    fn test_resolve_root() {
        assert_eq!(
            resolve_root(Some(Path::new("/media/usb")), "trial"),
            PathBuf::from("/media/usb/trial")
        );
        assert_eq!(resolve_root(None, "trial"), PathBuf::from("trial"));
        assert!(default_root_name().chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_directories_are_not_reused() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("session");

        create_root(&root).unwrap();
        let cam = create_camera_dir(&root, 0).unwrap();
        assert!(cam.is_dir());

        let err = create_root(&root).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_CREATION_ERROR");
        assert!(create_camera_dir(&root, 0).is_err());
    }

    #[test]
    fn test_root_parent_must_exist() {
        let dir = tempdir().unwrap();
        assert!(create_root(&dir.path().join("missing/session")).is_err());
    }
}
