use crate::data::{ElementSpacing, ProjectionImage, ProjectionStack};
use crate::io::metaimage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const IMAGE_EXTENSIONS: &[&str] = &["png", "tif", "tiff", "jpg", "jpeg", "bmp", "pgm"];

/// Smallest width and height a projection can have; the bilinear sampler
/// needs two samples along each axis.
pub const MIN_PROJECTION_SIZE: usize = 2;

/// Load a single 2D image as float luminance.
pub fn load_image<P: AsRef<Path>>(path: P) -> crate::Result<ProjectionImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(anyhow::anyhow!(
            "Image file does not exist: {}",
            path.display()
        ));
    }
    let img = image::open(path)?;
    Ok(ProjectionImage::from(&img.to_luma32f()))
}

pub fn validate_image_size(img: &ProjectionImage, min_size: usize) -> crate::Result<()> {
    if img.width() < min_size || img.height() < min_size {
        return Err(anyhow::anyhow!(
            "Image too small: {}x{}, minimum: {}x{}",
            img.width(),
            img.height(),
            min_size,
            min_size
        ));
    }
    Ok(())
}

/// Load a projection stack from a MetaImage header or a directory of images.
///
/// Directory entries are ordered by file name. `fallback_spacing` is used
/// when the source carries no spacing of its own.
pub fn load_stack<P: AsRef<Path>>(
    path: P,
    fallback_spacing: ElementSpacing,
) -> crate::Result<ProjectionStack> {
    let path = path.as_ref();
    let stack = if path.is_dir() {
        load_image_directory(path, fallback_spacing)?
    } else if has_extension(path, &["mhd"]) {
        metaimage::read_stack(path, fallback_spacing)?
    } else {
        return Err(anyhow::anyhow!(
            "Unsupported stack source {} (expected a directory or .mhd file)",
            path.display()
        ));
    };
    validate_image_size(stack.first(), MIN_PROJECTION_SIZE)?;

    info!(
        source = %path.display(),
        width = stack.width(),
        height = stack.height(),
        slices = stack.len(),
        "Loaded projection stack"
    );
    Ok(stack)
}

fn load_image_directory(dir: &Path, spacing: ElementSpacing) -> crate::Result<ProjectionStack> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_extension(p, IMAGE_EXTENSIONS))
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(anyhow::anyhow!("No image files found in {}", dir.display()));
    }

    let mut slices = Vec::with_capacity(files.len());
    for file in &files {
        debug!(file = %file.display(), "Reading slice");
        slices.push(load_image(file)?);
    }
    Ok(ProjectionStack::new(slices, spacing)?)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}
