//! MetaImage (`.mhd` header + `.raw` data) volumes.
//!
//! Only detached-data, uncompressed files are handled, which is what
//! acquisition software and ITK write for projection stacks.

use crate::data::{
    AlignmentParameters, CropBorders, ElementSpacing, GeometricTransformer, ProjectionImage,
    ProjectionStack,
};
use crate::error::AlignError;
use anyhow::{anyhow, bail, Context};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const HEADER_EXTENSION: &str = ".mhd";

/// Sample types understood by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float,
    Double,
    UShort,
    Short,
    UChar,
}

impl ElementType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "MET_FLOAT" => Some(ElementType::Float),
            "MET_DOUBLE" => Some(ElementType::Double),
            "MET_USHORT" => Some(ElementType::UShort),
            "MET_SHORT" => Some(ElementType::Short),
            "MET_UCHAR" => Some(ElementType::UChar),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            ElementType::Float => 4,
            ElementType::Double => 8,
            ElementType::UShort | ElementType::Short => 2,
            ElementType::UChar => 1,
        }
    }

    fn decode(&self, bytes: &[u8], big_endian: bool) -> f64 {
        macro_rules! read {
            ($t:ty, $n:expr) => {{
                let mut buf = [0u8; $n];
                buf.copy_from_slice(bytes);
                if big_endian {
                    <$t>::from_be_bytes(buf) as f64
                } else {
                    <$t>::from_le_bytes(buf) as f64
                }
            }};
        }
        match self {
            ElementType::Float => read!(f32, 4),
            ElementType::Double => read!(f64, 8),
            ElementType::UShort => read!(u16, 2),
            ElementType::Short => read!(i16, 2),
            ElementType::UChar => bytes[0] as f64,
        }
    }
}

/// Parsed header fields needed to read the data file.
#[derive(Debug, Clone)]
pub struct MetaHeader {
    pub dims: Vec<usize>,
    pub element_type: ElementType,
    pub big_endian: bool,
    pub spacing: Option<Vec<f64>>,
    pub data_file: PathBuf,
    pub header_size: usize,
}

impl MetaHeader {
    pub fn parse(text: &str, header_path: &Path) -> crate::Result<Self> {
        let mut fields: HashMap<String, String> = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        if fields
            .get("CompressedData")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            bail!("Compressed MetaImage data is not supported");
        }

        let ndims: usize = required(&fields, "NDims")?.parse().context("Invalid NDims")?;
        let dims = parse_list::<usize>(required(&fields, "DimSize")?).context("Invalid DimSize")?;
        if !(2..=3).contains(&ndims) || dims.len() != ndims {
            bail!("Expected a 2D or 3D image, got NDims = {} and DimSize = {:?}", ndims, dims);
        }

        let type_name = required(&fields, "ElementType")?;
        let element_type = ElementType::parse(type_name)
            .ok_or_else(|| anyhow!("Unsupported ElementType {}", type_name))?;

        let big_endian = fields
            .get("BinaryDataByteOrderMSB")
            .or_else(|| fields.get("ElementByteOrderMSB"))
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let spacing = match fields.get("ElementSpacing").or_else(|| fields.get("ElementSize")) {
            Some(value) => Some(parse_list::<f64>(value).context("Invalid ElementSpacing")?),
            None => None,
        };

        let data_name = required(&fields, "ElementDataFile")?;
        if data_name.eq_ignore_ascii_case("LOCAL") || data_name.starts_with("LIST") {
            bail!("ElementDataFile = {} is not supported", data_name);
        }
        let data_file = header_path
            .parent()
            .map(|dir| dir.join(data_name))
            .unwrap_or_else(|| PathBuf::from(data_name));

        let header_size = match fields.get("HeaderSize") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("Unsupported HeaderSize {}", value))?,
            None => 0,
        };

        Ok(Self {
            dims,
            element_type,
            big_endian,
            spacing,
            data_file,
            header_size,
        })
    }

    pub fn width(&self) -> usize {
        self.dims[0]
    }

    pub fn height(&self) -> usize {
        self.dims[1]
    }

    pub fn slices(&self) -> usize {
        self.dims.get(2).copied().unwrap_or(1)
    }

    /// Byte layout of the volume in the data file. Fails on an empty
    /// dimension or when the sizes overflow.
    pub fn extent(&self) -> crate::Result<VolumeExtent> {
        let (width, height, depth) = (self.width(), self.height(), self.slices());
        if width == 0 || height == 0 || depth == 0 {
            bail!("MetaImage volume has an empty dimension: {:?}", self.dims);
        }
        let slice_bytes = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(self.element_type.size()))
            .ok_or_else(|| anyhow!("MetaImage slice size overflows: {:?}", self.dims))?;
        let data_bytes = slice_bytes
            .checked_mul(depth)
            .ok_or_else(|| anyhow!("MetaImage volume size overflows: {:?}", self.dims))?;
        let end = self
            .header_size
            .checked_add(data_bytes)
            .ok_or_else(|| anyhow!("HeaderSize {} overflows the volume size", self.header_size))?;
        Ok(VolumeExtent {
            slice_bytes,
            data_bytes,
            end,
        })
    }
}

/// Sizes in bytes of one slice and of the whole volume, and the offset just
/// past the last sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeExtent {
    pub slice_bytes: usize,
    pub data_bytes: usize,
    pub end: usize,
}

fn required<'a>(fields: &'a HashMap<String, String>, key: &str) -> crate::Result<&'a String> {
    fields
        .get(key)
        .ok_or_else(|| anyhow!("MetaImage header is missing {}", key))
}

fn parse_list<T: std::str::FromStr>(value: &str) -> crate::Result<Vec<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .split_whitespace()
        .map(|v| v.parse::<T>().map_err(anyhow::Error::from))
        .collect()
}

/// Read a volume as a stack of slices along its third axis.
pub fn read_stack(header_path: &Path, fallback_spacing: ElementSpacing) -> crate::Result<ProjectionStack> {
    let text = fs::read_to_string(header_path)
        .with_context(|| format!("Failed to read header {}", header_path.display()))?;
    let header = MetaHeader::parse(&text, header_path)?;

    let (width, height, depth) = (header.width(), header.height(), header.slices());
    let extent = header.extent()?;

    let bytes = fs::read(&header.data_file)
        .with_context(|| format!("Failed to read data file {}", header.data_file.display()))?;
    if bytes.len() < extent.end {
        bail!(
            "Data file {} holds {} bytes, expected {}",
            header.data_file.display(),
            bytes.len().saturating_sub(header.header_size),
            extent.data_bytes
        );
    }
    debug!(
        width,
        height,
        depth,
        element_type = ?header.element_type,
        big_endian = header.big_endian,
        "Decoding MetaImage volume"
    );

    let element_size = header.element_type.size();
    let data = &bytes[header.header_size..extent.end];
    let slices = data
        .chunks_exact(extent.slice_bytes)
        .map(|chunk| {
            let samples = chunk
                .chunks_exact(element_size)
                .map(|b| header.element_type.decode(b, header.big_endian))
                .collect();
            ProjectionImage::from_raw(width, height, samples)
        })
        .collect::<Result<Vec<_>, AlignError>>()?;

    let spacing = match header.spacing.as_deref() {
        Some([x, y, z, ..]) => ElementSpacing { x: *x, y: *y, z: *z },
        Some([x, y]) => ElementSpacing {
            x: *x,
            y: *y,
            z: fallback_spacing.z,
        },
        _ => fallback_spacing,
    };

    Ok(ProjectionStack::new(slices, spacing)?)
}

/// Paths and size of a written volume.
#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub header_path: PathBuf,
    pub data_path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub slices: usize,
}

/// The `.raw` file that goes with `header_path`.
///
/// Fails with `InvalidInput` unless the file name ends in `.mhd` and has a
/// stem.
pub fn data_path_for(header_path: &Path) -> crate::Result<PathBuf> {
    let name = header_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    match name.strip_suffix(HEADER_EXTENSION) {
        Some(stem) if !stem.is_empty() => Ok(header_path.with_file_name(format!("{}.raw", stem))),
        _ => Err(AlignError::InvalidInput(format!(
            "output file name must end with {}: {}",
            HEADER_EXTENSION,
            header_path.display()
        ))
        .into()),
    }
}

/// Write equally sized slices as a little-endian MET_FLOAT volume.
pub fn write_stack(
    slices: &[ProjectionImage],
    spacing: ElementSpacing,
    header_path: &Path,
) -> crate::Result<ExportSummary> {
    let data_path = data_path_for(header_path)?;
    let (width, height) = match slices.first() {
        Some(first) => first.dimensions(),
        None => bail!("Nothing to write"),
    };
    if let Some(odd) = slices.iter().find(|s| s.dimensions() != (width, height)) {
        return Err(AlignError::ShapeMismatch {
            left: (width, height),
            right: odd.dimensions(),
        }
        .into());
    }

    if let Err(err) = write_samples(slices, &data_path) {
        let _ = fs::remove_file(&data_path);
        return Err(err);
    }

    let data_name = data_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let header = format!(
        "ObjectType = Image\n\
         NDims = 3\n\
         BinaryData = True\n\
         BinaryDataByteOrderMSB = False\n\
         CompressedData = False\n\
         ElementSpacing = {} {} {}\n\
         DimSize = {} {} {}\n\
         ElementType = MET_FLOAT\n\
         ElementDataFile = {}\n",
        spacing.x,
        spacing.y,
        spacing.z,
        width,
        height,
        slices.len(),
        data_name
    );
    if let Err(err) = fs::write(header_path, header) {
        // No data file without its header.
        let _ = fs::remove_file(&data_path);
        return Err(anyhow::Error::new(err)
            .context(format!("Error writing file {}", header_path.display())));
    }

    Ok(ExportSummary {
        header_path: header_path.to_path_buf(),
        data_path,
        width,
        height,
        slices: slices.len(),
    })
}

fn write_samples(slices: &[ProjectionImage], data_path: &Path) -> crate::Result<()> {
    let mut out = BufWriter::new(
        File::create(data_path)
            .with_context(|| format!("Error writing file {}", data_path.display()))?,
    );
    for slice in slices {
        for sample in slice.samples() {
            out.write_all(&(sample as f32).to_le_bytes())?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Re-transform every slice with the final parameters and write the
/// aligned volume.
///
/// Slices use the non-mirrored transform and are processed in parallel;
/// the output keeps the input order.
pub fn apply_to_stack(
    stack: &ProjectionStack,
    params: &AlignmentParameters,
    crop: &CropBorders,
    header_path: &Path,
) -> crate::Result<ExportSummary> {
    // Reject a bad name before doing any work.
    data_path_for(header_path)?;

    let transformed = stack
        .slices()
        .par_iter()
        .map(|slice| GeometricTransformer::transform(slice, params, crop, false))
        .collect::<Result<Vec<_>, AlignError>>()?;

    let summary = write_stack(&transformed, stack.spacing(), header_path)?;
    info!(
        header = %summary.header_path.display(),
        slices = summary.slices,
        width = summary.width,
        height = summary.height,
        "Wrote aligned stack"
    );
    Ok(summary)
}
