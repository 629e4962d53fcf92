use crate::data::FeatureDataset;
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Layouts a feature file may come in
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Csv,
    Tsv,
    GzippedCsv,
    GzippedTsv,
}

impl FileFormat {
    /// Pick the layout from the file name (`.csv`, `.tsv`, `.txt`, optionally `.gz`)
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let (inner, gzipped) = match name.strip_suffix(".gz") {
            Some(inner) => (inner, true),
            None => (name.as_str(), false),
        };

        match (inner.rsplit_once('.').map(|(_, ext)| ext), gzipped) {
            (Some("csv"), false) => Ok(FileFormat::Csv),
            (Some("csv"), true) => Ok(FileFormat::GzippedCsv),
            (Some("tsv" | "txt"), false) => Ok(FileFormat::Tsv),
            (Some("tsv" | "txt"), true) => Ok(FileFormat::GzippedTsv),
            _ => bail!("{:?} is not a .csv or .tsv feature file (optionally gzipped)", path),
        }
    }

    pub fn delimiter(&self) -> u8 {
        match self {
            FileFormat::Csv | FileFormat::GzippedCsv => b',',
            FileFormat::Tsv | FileFormat::GzippedTsv => b'\t',
        }
    }

    pub fn is_gzipped(&self) -> bool {
        matches!(self, FileFormat::GzippedCsv | FileFormat::GzippedTsv)
    }
}

/// Data loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Frequency bins per frame; each row holds `num_features x frames` values
    pub num_features: usize,
    /// Whether file has header
    pub has_header: bool,
    /// Maximum number of examples to load (0 = unlimited)
    pub max_examples: usize,
}

impl LoaderConfig {
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            has_header: true,
            max_examples: 0,
        }
    }
}

/// Loads labeled feature maps from delimited files
///
/// Each row is `label, v_0, ..., v_{n-1}` where the values are one feature
/// map flattened feature-major: all frames of bin 0, then bin 1, and so on.
/// The frame count is inferred from the first row and must not change.
pub struct DatasetLoader {
    config: LoaderConfig,
}

impl DatasetLoader {
    pub fn new(num_features: usize) -> Self {
        Self {
            config: LoaderConfig::new(num_features),
        }
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Load a dataset from file
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<FeatureDataset> {
        let path = path.as_ref();
        info!("Loading dataset from {:?}", path);

        let format = FileFormat::from_path(path)?;
        debug!("Detected file format: {:?}", format);

        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        let dataset = if format.is_gzipped() {
            self.parse(BufReader::new(GzDecoder::new(file)), format)?
        } else {
            self.parse(BufReader::new(file), format)?
        };

        info!(
            "Loaded {} examples ({} positive), {} features x {} frames",
            dataset.labels.len(),
            dataset.positive_count(),
            dataset.num_features,
            dataset.num_frames
        );
        Ok(dataset)
    }

    fn parse<R: Read>(&self, reader: R, format: FileFormat) -> Result<FeatureDataset> {
        let num_features = self.config.num_features;
        if num_features == 0 {
            bail!("Number of features must be positive");
        }

        let mut csv_reader = ReaderBuilder::new()
            .delimiter(format.delimiter())
            .has_headers(self.config.has_header)
            .trim(csv::Trim::All)
            .from_reader(reader);

        if self.config.has_header {
            let headers = csv_reader.headers()?;
            if headers.get(0) != Some("label") {
                bail!("First column must be 'label', found {:?}", headers.get(0));
            }
        }

        let mut dataset: Option<FeatureDataset> = None;
        let mut row = Vec::new();

        for (index, result) in csv_reader.records().enumerate() {
            let line = index + 1 + self.config.has_header as usize;
            let record = result.with_context(|| format!("Failed to parse line {line}"))?;

            let label = record
                .get(0)
                .and_then(|s| s.parse::<u8>().ok())
                .filter(|&l| l <= 1)
                .with_context(|| format!("Line {line}: label must be 0 or 1"))?;

            row.clear();
            for field in record.iter().skip(1) {
                let value = field
                    .parse::<f32>()
                    .with_context(|| format!("Line {line}: bad value {field:?}"))?;
                row.push(value);
            }

            // the first row fixes the frame count
            let current = match dataset.take() {
                Some(current) => current,
                None => {
                    if row.is_empty() || row.len() % num_features != 0 {
                        bail!(
                            "Line {line}: {} values do not split into {} features",
                            row.len(),
                            num_features
                        );
                    }
                    FeatureDataset::new(num_features, row.len() / num_features)
                }
            };
            let current = dataset.insert(current);
            current
                .push(&row, label)
                .with_context(|| format!("Line {line}"))?;

            if self.config.max_examples > 0 && current.labels.len() >= self.config.max_examples {
                debug!("Reached example limit: {}", self.config.max_examples);
                break;
            }
        }

        Ok(dataset.unwrap_or_else(|| FeatureDataset::new(num_features, 0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::LabeledDataset;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    #[test]
    fn test_file_format_detection() {
        assert_eq!(FileFormat::from_path("data.csv").unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path("data.tsv").unwrap(), FileFormat::Tsv);
        assert_eq!(FileFormat::from_path("data.csv.gz").unwrap(), FileFormat::GzippedCsv);
        assert_eq!(FileFormat::from_path("data.tsv.gz").unwrap(), FileFormat::GzippedTsv);
        assert_eq!(FileFormat::from_path("DEV.CSV").unwrap(), FileFormat::Csv);
        assert!(FileFormat::from_path("data.wav").is_err());
        assert!(FileFormat::from_path("data.gz").is_err());
    }

    #[test]
    fn test_parse_simple_csv() {
        let csv_data = "label,v0,v1,v2,v3\n1,0.1,0.2,0.3,0.4\n0,1,2,3,4";
        let loader = DatasetLoader::new(2);
        let dataset = loader.parse(Cursor::new(csv_data), FileFormat::Csv).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.num_features(), 2);
        assert_eq!(dataset.num_frames(), 2);
        assert_eq!(dataset.labels(), vec![1, 0]);
        assert_eq!(dataset.features(1).unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_parse_rejects_malformed_rows() {
        let loader = DatasetLoader::new(2);

        let bad_label = "label,a,b\n2,0.1,0.2";
        assert!(loader.parse(Cursor::new(bad_label), FileFormat::Csv).is_err());

        let uneven = "label,a,b,c\n1,0.1,0.2,0.3";
        assert!(loader.parse(Cursor::new(uneven), FileFormat::Csv).is_err());

        let ragged = "label,a,b,c,d\n1,1,2,3,4\n0,1,2";
        assert!(loader.parse(Cursor::new(ragged), FileFormat::Csv).is_err());

        let no_header = "sample,a,b\n1,0.1,0.2";
        assert!(loader.parse(Cursor::new(no_header), FileFormat::Csv).is_err());
    }

    #[test]
    fn test_empty_file_gives_empty_dataset() {
        let loader = DatasetLoader::new(4);
        let dataset = loader.parse(Cursor::new("label\n"), FileFormat::Csv).unwrap();
        assert!(dataset.is_empty());
    }

    #[test]
    fn test_load_gzipped_tsv() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.tsv.gz");

        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(b"label\ta\tb\n0\t0.5\t0.25\n1\t1\t2\n").unwrap();
        encoder.finish().unwrap();

        let dataset = DatasetLoader::new(1).load(&path).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.num_frames(), 2);
        assert_eq!(dataset.positive_count(), 1);
    }
}
