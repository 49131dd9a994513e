use crate::error::Error;
use flate2::read::GzDecoder;
use ndarray::{Array1, Array2, ArrayView1};
use std::{fs::File, io::Read, path::Path};

pub const IMAGE_ROWS: usize = 28;
pub const IMAGE_COLUMNS: usize = 28;
pub const IMAGE_PIXELS: usize = IMAGE_ROWS * IMAGE_COLUMNS;
pub const CLASSES: usize = 10;

// Magic numbers from the IDX file format. An image file starts with 2051 and
// a label file with 2049, each stored as a big-endian u32.
const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

/// One split of the dataset. Each row of `images` is a flattened 28x28 digit
/// with every pixel already normalized into [0, 1], and `labels[i]` is the
/// correct digit for row `i`.
pub struct Split {
    pub images: Array2<f64>,
    pub labels: Array1<u8>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub struct MnistData {
    pub training: Split,
    pub test: Split,
}

impl MnistData {
    /// Loads the four canonical gzipped IDX files from `dir` and returns the
    /// training and test splits. Fails before any training can start if a
    /// file is missing, not valid gzipped IDX data, or the shapes disagree.
    pub fn load(dir: &Path) -> Result<MnistData, Error> {
        let training = parse_split(
            read_gz(&dir.join("train-images-idx3-ubyte.gz"))?,
            read_gz(&dir.join("train-labels-idx1-ubyte.gz"))?,
        )?;
        let test = parse_split(
            read_gz(&dir.join("t10k-images-idx3-ubyte.gz"))?,
            read_gz(&dir.join("t10k-labels-idx1-ubyte.gz"))?,
        )?;

        tracing::debug!(
            training = training.len(),
            test = test.len(),
            "dataset loaded"
        );

        Ok(MnistData { training, test })
    }
}

// Reads a gzipped file into a plain byte vector.
fn read_gz(path: &Path) -> Result<Vec<u8>, Error> {
    let file = File::open(path).map_err(|e| Error::data(path.display().to_string(), e))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| Error::data(path.display().to_string(), e))?;
    Ok(bytes)
}

// Reads one big-endian u32 header field at `offset`.
fn read_header(bytes: &[u8], offset: usize, what: &str) -> Result<u32, Error> {
    let chunk = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| Error::malformed(format!("truncated {what} header")))?;
    Ok(u32::from_be_bytes(chunk.try_into().expect("4-byte slice")))
}

/// Turns the raw bytes of an IDX image file and its matching IDX label file
/// into one dataset split, scaling each 0-255 pixel down to [0, 1].
pub(crate) fn parse_split(image_bytes: Vec<u8>, label_bytes: Vec<u8>) -> Result<Split, Error> {
    // The image file headers are four big-endian u32s: the magic number, the
    // number of images, and the rows and columns per image.
    if read_header(&image_bytes, 0, "image")? != IMAGE_MAGIC {
        return Err(Error::malformed("image file has wrong magic number"));
    }
    let images = read_header(&image_bytes, 4, "image")? as usize;
    let rows = read_header(&image_bytes, 8, "image")? as usize;
    let columns = read_header(&image_bytes, 12, "image")? as usize;

    // The label file headers are just the magic number and the label count.
    if read_header(&label_bytes, 0, "label")? != LABEL_MAGIC {
        return Err(Error::malformed("label file has wrong magic number"));
    }
    let labels = read_header(&label_bytes, 4, "label")? as usize;

    if rows != IMAGE_ROWS || columns != IMAGE_COLUMNS {
        return Err(Error::ShapeMismatch(format!(
            "expected {IMAGE_ROWS}x{IMAGE_COLUMNS} images, file contains {rows}x{columns}"
        )));
    }
    if images != labels {
        return Err(Error::ShapeMismatch(format!(
            "{images} images but {labels} labels"
        )));
    }

    let pixel_data = &image_bytes[16..];
    if pixel_data.len() < images * IMAGE_PIXELS {
        return Err(Error::malformed("image file is truncated"));
    }
    if label_bytes.len() - 8 < labels {
        return Err(Error::malformed("label file is truncated"));
    }

    // Normalize every pixel intensity by dividing by 255, so the model only
    // ever sees values in [0, 1]. Both splits go through this same path.
    let pixels = pixel_data[..images * IMAGE_PIXELS]
        .iter()
        .map(|&value| f64::from(value) / 255.0)
        .collect::<Vec<_>>();
    let images = Array2::from_shape_vec((images, IMAGE_PIXELS), pixels)
        .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
    let labels = Array1::from_vec(label_bytes[8..8 + labels].to_vec());

    Ok(Split { images, labels })
}

/// Prints a simple ASCII representation of one flattened digit image.
pub fn visualize(image: ArrayView1<f64>) {
    for (index, intensity) in image.iter().enumerate() {
        if index % IMAGE_COLUMNS == 0 {
            println!()
        }

        match intensity {
            a if *a < 0.2 => print!(" "),
            a if *a < 0.4 => print!("░"),
            a if *a < 0.6 => print!("▒"),
            a if *a < 0.8 => print!("▓"),
            _ => print!("█"),
        }
    }
    println!()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Builds the raw bytes of an IDX image file holding `n` constant-valued
    // images of the given geometry.
    fn image_bytes(magic: u32, n: u32, rows: u32, columns: u32, value: u8) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&magic.to_be_bytes());
        bytes.extend_from_slice(&n.to_be_bytes());
        bytes.extend_from_slice(&rows.to_be_bytes());
        bytes.extend_from_slice(&columns.to_be_bytes());
        bytes.extend(std::iter::repeat_n(value, (n * rows * columns) as usize));
        bytes
    }

    fn label_bytes(magic: u32, n: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&magic.to_be_bytes());
        bytes.extend_from_slice(&n.to_be_bytes());
        bytes.extend((0..n).map(|i| (i % 10) as u8));
        bytes
    }

    #[test]
    fn pixels_are_normalized_into_unit_interval() {
        let split = parse_split(image_bytes(2051, 3, 28, 28, 255), label_bytes(2049, 3)).unwrap();
        assert_eq!(split.images.dim(), (3, IMAGE_PIXELS));
        assert_eq!(split.labels.len(), 3);
        assert!(split.images.iter().all(|&p| (0.0..=1.0).contains(&p)));
        assert!(split.images.iter().all(|&p| p == 1.0));
    }

    #[test]
    fn zero_pixels_map_to_zero() {
        let split = parse_split(image_bytes(2051, 2, 28, 28, 0), label_bytes(2049, 2)).unwrap();
        assert!(split.images.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let result = parse_split(image_bytes(2051, 3, 28, 28, 0), label_bytes(2049, 4));
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn wrong_geometry_is_rejected() {
        let result = parse_split(image_bytes(2051, 2, 14, 14, 0), label_bytes(2049, 2));
        assert!(matches!(result, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let result = parse_split(image_bytes(2052, 2, 28, 28, 0), label_bytes(2049, 2));
        assert!(matches!(result, Err(Error::DataUnavailable { .. })));
    }

    #[test]
    fn truncated_image_data_is_rejected() {
        let mut bytes = image_bytes(2051, 2, 28, 28, 0);
        bytes.truncate(bytes.len() - 100);
        let result = parse_split(bytes, label_bytes(2049, 2));
        assert!(matches!(result, Err(Error::DataUnavailable { .. })));
    }

    #[test]
    fn gzipped_round_trip_parses() {
        use flate2::{Compression, write::GzEncoder};
        use std::io::Write;

        // Compress a fixture the way the real files are stored, then run it
        // back through the same gzip reader used for the files on disk.
        let raw = image_bytes(2051, 1, 28, 28, 128);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut decompressed = Vec::new();
        GzDecoder::new(&compressed[..])
            .read_to_end(&mut decompressed)
            .unwrap();
        let split = parse_split(decompressed, label_bytes(2049, 1)).unwrap();
        assert!((split.images[[0, 0]] - 128.0 / 255.0).abs() < 1e-12);
    }
}
