use image::imageops::{self, FilterType};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use super::dataset::{DataError, ImageItem};

const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "ppm"];

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.as_str()))
}

/// Sorted class directories directly under `root`; the position is the label.
pub fn class_dirs(root: &Path) -> Result<Vec<PathBuf>, DataError> {
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|err| DataError::Io {
            path: root.to_path_buf(),
            source: err.into(),
        })?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }
    dirs.sort();

    if dirs.is_empty() {
        return Err(DataError::NoClasses(root.to_path_buf()));
    }
    Ok(dirs)
}

/// Reads an image, converts to RGB, resizes to `edge` and lays it out channel-major.
pub fn load_image(path: &Path, edge: usize) -> Result<Vec<u8>, DataError> {
    let rgb = image::open(path)
        .map_err(|source| DataError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();

    let side = edge as u32;
    let rgb = if rgb.width() == side && rgb.height() == side {
        rgb
    } else {
        imageops::resize(&rgb, side, side, FilterType::Triangle)
    };

    let plane = edge * edge;
    let mut pixels = vec![0u8; 3 * plane];
    for (i, pixel) in rgb.pixels().enumerate() {
        for channel in 0..3 {
            pixels[channel * plane + i] = pixel.0[channel];
        }
    }
    Ok(pixels)
}

/// Loads `root/<class>/<image>` trees. Labels follow sorted directory names.
pub fn load_folder(root: &Path, edge: usize, num_classes: usize) -> Result<Vec<ImageItem>, DataError> {
    let classes = class_dirs(root)?;
    if classes.len() > num_classes {
        return Err(DataError::LabelOutOfRange {
            label: classes.len() - 1,
            num_classes,
        });
    }

    let mut items = Vec::new();
    for (label, dir) in classes.iter().enumerate() {
        let label = u8::try_from(label).map_err(|_| DataError::LabelOutOfRange { label, num_classes })?;

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(|err| DataError::Io {
                path: dir.clone(),
                source: err.into(),
            })?;
            if entry.file_type().is_file() && is_image(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        if files.is_empty() {
            warn!("Class directory {:?} holds no images", dir);
        }

        for file in files {
            items.push(ImageItem {
                pixels: load_image(&file, edge)?,
                label,
            });
        }
    }

    info!("Loaded {} images in {} classes from {:?}", items.len(), classes.len(), root);
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_image(path: &Path, side: u32, color: [u8; 3]) {
        RgbImage::from_pixel(side, side, Rgb(color)).save(path).unwrap();
    }

    #[test]
    fn labels_follow_sorted_directory_names() {
        let root = TempDir::new().unwrap();
        for (class, color) in [("b_dog", [0, 255, 0]), ("a_cat", [255, 0, 0])] {
            let dir = root.path().join(class);
            std::fs::create_dir(&dir).unwrap();
            write_image(&dir.join("0.png"), 4, color);
        }

        let items = load_folder(root.path(), 4, 10).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 0);
        assert_eq!(items[0].pixels[0], 255);
        assert_eq!(items[1].label, 1);
        assert_eq!(items[1].pixels[16], 255);
    }

    #[test]
    fn images_are_resized_channel_major() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("big.png");
        write_image(&path, 8, [10, 20, 30]);

        let pixels = load_image(&path, 2).unwrap();
        assert_eq!(pixels, vec![10, 10, 10, 10, 20, 20, 20, 20, 30, 30, 30, 30]);
    }

    #[test]
    fn too_many_classes_is_an_error() {
        let root = TempDir::new().unwrap();
        for class in ["a", "b", "c"] {
            std::fs::create_dir(root.path().join(class)).unwrap();
        }
        assert!(matches!(
            load_folder(root.path(), 4, 2),
            Err(DataError::LabelOutOfRange { .. })
        ));
    }

    #[test]
    fn more_than_256_classes_cannot_be_labelled() {
        let root = TempDir::new().unwrap();
        for class in 0..257 {
            std::fs::create_dir(root.path().join(format!("{class:03}"))).unwrap();
        }
        assert!(matches!(
            load_folder(root.path(), 4, 1000),
            Err(DataError::LabelOutOfRange { label: 256, num_classes: 1000 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_entry_in_class_dir_fails_the_split() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("cat");
        std::fs::create_dir(&dir).unwrap();
        write_image(&dir.join("0.png"), 4, [1, 2, 3]);
        std::os::unix::fs::symlink(root.path().join("missing"), dir.join("gone.png")).unwrap();

        assert!(matches!(
            load_folder(root.path(), 4, 10),
            Err(DataError::Io { path, .. }) if path == dir
        ));
    }

    #[test]
    fn empty_root_has_no_classes() {
        let root = TempDir::new().unwrap();
        assert!(matches!(class_dirs(root.path()), Err(DataError::NoClasses(_))));
    }
}
