use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::dataset::{DataError, ImageItem};

pub const IMAGE_SIZE: usize = 32;
const PIXELS: usize = 3 * IMAGE_SIZE * IMAGE_SIZE;
const RECORD: usize = 1 + PIXELS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILES: [&str; 1] = ["test_batch.bin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn files(&self) -> &'static [&'static str] {
        match self {
            Split::Train => &TRAIN_FILES,
            Split::Test => &TEST_FILES,
        }
    }
}

/// Decodes a buffer of CIFAR-10 binary records: one label byte followed by
/// 1024 red, 1024 green and 1024 blue bytes.
pub fn parse_records(bytes: &[u8], path: &Path) -> Result<Vec<ImageItem>, DataError> {
    if bytes.len() % RECORD != 0 {
        return Err(DataError::Truncated {
            path: path.to_path_buf(),
            len: bytes.len(),
            record: RECORD,
        });
    }

    Ok(bytes
        .chunks_exact(RECORD)
        .map(|record| ImageItem {
            label: record[0],
            pixels: record[1..].to_vec(),
        })
        .collect())
}

pub fn load_split(dir: &Path, split: Split) -> Result<Vec<ImageItem>, DataError> {
    let mut items = Vec::new();
    for name in split.files() {
        let path: PathBuf = dir.join(name);
        let bytes = fs::read(&path).map_err(|source| DataError::Io {
            path: path.clone(),
            source,
        })?;
        let records = parse_records(&bytes, &path)?;
        info!("Loaded {} records from {:?}", records.len(), path);
        items.extend(records);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: u8, fill: u8) -> Vec<u8> {
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat(fill).take(PIXELS));
        bytes
    }

    #[test]
    fn parses_consecutive_records() {
        let mut bytes = record(3, 10);
        bytes.extend(record(7, 20));

        let items = parse_records(&bytes, Path::new("mem.bin")).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].label, 3);
        assert_eq!(items[1].label, 7);
        assert_eq!(items[1].pixels.len(), PIXELS);
        assert!(items[1].pixels.iter().all(|&p| p == 20));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let mut bytes = record(1, 0);
        bytes.pop();
        assert!(matches!(
            parse_records(&bytes, Path::new("short.bin")),
            Err(DataError::Truncated { record: RECORD, .. })
        ));
    }

    #[test]
    fn missing_directory_reports_the_file() {
        let err = load_split(Path::new("/nonexistent/cifar"), Split::Test).unwrap_err();
        match err {
            DataError::Io { path, .. } => assert!(path.ends_with("test_batch.bin")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
