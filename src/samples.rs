use std::{
    io,
    path::{Path, PathBuf},
};

/// Directory checked for sample images in demo mode.
pub const DEFAULT_IMAGES_DIR: &str = "images";

/// Image captioned in demo mode when no local samples exist.
pub const DEMO_IMAGE_URL: &str = "https://cf-courses-data.s3.us.cloud-object-storage.appdomain.cloud/Bp47tyvcJN9LUK7fUNHNpQ/149-22-JPG-jpg-rf-4899cbb6f4aad9588fa3811bb886c34d.jpg";

/// Extensions accepted as sample images, compared case-insensitively.
pub const SAMPLE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

/// Number of local samples captioned in demo mode.
pub const MAX_SAMPLE_IMAGES: usize = 3;

fn has_sample_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SAMPLE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// Lists the first sample images in `dir`, sorted by file name.
///
/// A missing or unreadable directory yields no samples.
pub fn find_sample_images(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::debug!("No sample directory at {}: {e}", dir.display());
            return Vec::new();
        }
    };

    let mut images: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_sample_extension(path))
        .collect();

    images.sort();
    images.truncate(MAX_SAMPLE_IMAGES);
    images
}

/// Inputs for demo mode: local samples when there are any, the demo url otherwise.
pub fn demo_inputs(dir: &Path) -> Vec<String> {
    let images = find_sample_images(dir);
    if images.is_empty() {
        log::info!("No local sample images found, using the demo url");
        return vec![DEMO_IMAGE_URL.to_string()];
    }

    log::info!("Found {} sample images in {}", images.len(), dir.display());
    images
        .into_iter()
        .map(|path| path.display().to_string())
        .collect()
}

/// Reads a list of sources, one per line. Blank lines and `#` comments are skipped.
pub fn read_source_list(path: &Path) -> io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
