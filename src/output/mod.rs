//! On-disk session layout
//!
//! A session directory looks like:
//! - options.txt: the configuration manifest
//! - log.txt: the session log
//! - cam<id>/image<NNNNNN>.jpg: saved stills, one directory per camera

pub mod layout;
pub mod manifest;

pub use layout::{camera_dir, create_camera_dir, create_root, image_path};
pub use manifest::{render_manifest, write_manifest, MANIFEST_FILE_NAME};
