use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::record::{FullPrecisionSettings, HalfPrecisionSettings, NamedMpkFileRecorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ExportError, ModelError};
use crate::model::architecture::{CrnnModel, ModelSpec};
use crate::model::encoder::{Encoder, EncoderSpec};
use crate::model::head::{Head, HeadSpec};
use crate::model::CrnnConfig;

const WEIGHTS_EXTENSION: &str = "mpk";
const METADATA_EXTENSION: &str = "json";

/// Independently stored half of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Part {
    Encoder,
    Detector,
}

impl Part {
    fn suffix(&self) -> &'static str {
        match self {
            Part::Encoder => "encode",
            Part::Detector => "detect",
        }
    }
}

/// Numeric precision of stored weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// 32-bit floats
    Full,
    /// 16-bit floats, for constrained inference targets
    Half,
}

impl Precision {
    fn suffix(&self) -> &'static str {
        match self {
            Precision::Full => "",
            Precision::Half => "-quant",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Full => f.write_str("full"),
            Precision::Half => f.write_str("half"),
        }
    }
}

/// Description stored next to each weight file
///
/// It carries everything needed to rebuild its part without the other one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartMetadata {
    /// Crate version that wrote the artifact
    pub version: String,
    pub identity: String,
    pub precision: Precision,
    pub config: CrnnConfig,
    pub layout: PartLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "part", rename_all = "snake_case")]
pub enum PartLayout {
    Encoder { spec: EncoderSpec },
    Detector { spec: HeadSpec },
}

/// One written weight file and its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    pub part: Part,
    pub precision: Precision,
    pub weights: PathBuf,
    pub metadata: PathBuf,
}

/// Everything one export wrote
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub identity: String,
    pub handles: Vec<ArtifactHandle>,
}

impl ArtifactSet {
    pub fn get(&self, part: Part, precision: Precision) -> Option<&ArtifactHandle> {
        self.handles
            .iter()
            .find(|h| h.part == part && h.precision == precision)
    }
}

/// Directory-backed artifact store keyed by model identity
///
/// Files are named `<identity>_<encode|detect>[-quant].<mpk|json>`.
pub struct ArtifactStore {
    root: PathBuf,
    /// Also write half-precision copies on export
    quantize: bool,
}

impl ArtifactStore {
    /// Open (and create) a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, ExportError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| ExportError::Io {
            path: root.clone(),
            source,
        })?;

        Ok(Self {
            root,
            quantize: true,
        })
    }

    /// Open the store holding the model at `prefix` (`<dir>/<identity>`)
    pub fn from_prefix<P: AsRef<Path>>(prefix: P) -> Result<(Self, String), ExportError> {
        let prefix = prefix.as_ref();
        let identity = prefix
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ExportError::Missing(prefix.to_path_buf()))?
            .to_string();
        let root = prefix
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        Ok((Self::new(root)?, identity))
    }

    /// Enable or disable half-precision copies
    pub fn with_quantized(mut self, quantize: bool) -> Self {
        self.quantize = quantize;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stem(&self, identity: &str, part: Part, precision: Precision) -> String {
        format!("{identity}_{}{}", part.suffix(), precision.suffix())
    }

    /// Path of the weight file for one part
    pub fn weights_path(&self, identity: &str, part: Part, precision: Precision) -> PathBuf {
        // the extension is spelled out: identities contain dots
        self.root.join(format!(
            "{}.{WEIGHTS_EXTENSION}",
            self.stem(identity, part, precision)
        ))
    }

    /// Path of the metadata file for one part
    pub fn metadata_path(&self, identity: &str, part: Part, precision: Precision) -> PathBuf {
        self.root.join(format!(
            "{}.{METADATA_EXTENSION}",
            self.stem(identity, part, precision)
        ))
    }

    /// Write encoder and detector separately, in full and optionally half
    /// precision
    ///
    /// Writes are not transactional. If a write fails after others
    /// succeeded, the error is [`ExportError::Partial`] and lists them.
    pub fn export<B: Backend>(
        &self,
        model: &CrnnModel<B>,
        spec: &ModelSpec,
    ) -> Result<ArtifactSet, ExportError> {
        let mut precisions = vec![Precision::Full];
        if self.quantize {
            precisions.push(Precision::Half);
        }

        let mut handles = Vec::new();
        let mut written = Vec::new();

        for precision in precisions {
            for part in [Part::Encoder, Part::Detector] {
                match self.export_part(model, spec, part, precision, &mut written) {
                    Ok(handle) => handles.push(handle),
                    Err(err) if written.is_empty() => return Err(err),
                    Err(err) => {
                        warn!("Export of {} stopped after {} file(s)", spec.identity, written.len());
                        return Err(ExportError::Partial {
                            written,
                            source: Box::new(err),
                        });
                    }
                }
            }
        }

        info!("Exported {} ({} artifacts)", spec.identity, handles.len());
        Ok(ArtifactSet {
            identity: spec.identity.clone(),
            handles,
        })
    }

    fn export_part<B: Backend>(
        &self,
        model: &CrnnModel<B>,
        spec: &ModelSpec,
        part: Part,
        precision: Precision,
        written: &mut Vec<PathBuf>,
    ) -> Result<ArtifactHandle, ExportError> {
        let weights = self.weights_path(&spec.identity, part, precision);
        let metadata = self.metadata_path(&spec.identity, part, precision);

        match part {
            Part::Encoder => save_module(model.encoder().clone(), precision, &weights)?,
            Part::Detector => save_module(model.head().clone(), precision, &weights)?,
        }
        written.push(weights.clone());

        let layout = match part {
            Part::Encoder => PartLayout::Encoder {
                spec: spec.encoder.clone(),
            },
            Part::Detector => PartLayout::Detector {
                spec: spec.head.clone(),
            },
        };
        let meta = PartMetadata {
            version: crate::VERSION.to_string(),
            identity: spec.identity.clone(),
            precision,
            config: spec.config.clone(),
            layout,
        };
        write_metadata(&metadata, &meta)?;
        written.push(metadata.clone());

        debug!("Wrote {:?}", weights);
        Ok(ArtifactHandle {
            part,
            precision,
            weights,
            metadata,
        })
    }

    fn read_metadata(
        &self,
        identity: &str,
        part: Part,
        precision: Precision,
    ) -> Result<PartMetadata, ExportError> {
        let path = self.metadata_path(identity, part, precision);
        if !path.is_file() {
            return Err(ExportError::Missing(path));
        }

        let json = fs::read_to_string(&path).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|source| ExportError::Metadata { path, source })
    }

    /// Load the encoder alone
    pub fn load_encoder<B: Backend>(
        &self,
        identity: &str,
        precision: Precision,
        device: &B::Device,
    ) -> Result<(PartMetadata, Encoder<B>), ExportError> {
        let meta = self.read_metadata(identity, Part::Encoder, precision)?;
        let PartLayout::Encoder { spec } = &meta.layout else {
            return Err(ModelError::InvalidConfig(format!(
                "{identity} encoder metadata describes a detector"
            ))
            .into());
        };

        let path = self.weights_path(identity, Part::Encoder, precision);
        let encoder = load_module(spec.init::<B>(device)?, precision, &path, device)?;

        Ok((meta, encoder))
    }

    /// Load the detector head alone
    pub fn load_head<B: Backend>(
        &self,
        identity: &str,
        precision: Precision,
        device: &B::Device,
    ) -> Result<(PartMetadata, Head<B>), ExportError> {
        let meta = self.read_metadata(identity, Part::Detector, precision)?;
        let PartLayout::Detector { spec } = &meta.layout else {
            return Err(ModelError::InvalidConfig(format!(
                "{identity} detector metadata describes an encoder"
            ))
            .into());
        };

        let path = self.weights_path(identity, Part::Detector, precision);
        let head = load_module(spec.init::<B>(device), precision, &path, device)?;

        Ok((meta, head))
    }

    /// Rebuild a full model from its stored encoder/detector pair
    pub fn load_model<B: Backend>(
        &self,
        identity: &str,
        precision: Precision,
        device: &B::Device,
    ) -> Result<(ModelSpec, CrnnModel<B>), ExportError> {
        info!("Loading {} ({} precision) from {:?}", identity, precision, self.root);

        let (encoder_meta, encoder) = self.load_encoder::<B>(identity, precision, device)?;
        let (head_meta, head) = self.load_head::<B>(identity, precision, device)?;

        let (PartLayout::Encoder { spec: encoder_spec }, PartLayout::Detector { spec: head_spec }) =
            (encoder_meta.layout, head_meta.layout)
        else {
            return Err(ModelError::InvalidConfig(format!("{identity} has mixed-up parts")).into());
        };

        if head_spec.input_shape() != encoder_spec.output_shape() {
            return Err(ModelError::ShapeMismatch {
                expected: head_spec.input_shape().to_string(),
                found: encoder_spec.output_shape().to_string(),
            }
            .into());
        }

        let spec = ModelSpec {
            identity: identity.to_string(),
            config: encoder_meta.config,
            encoder: encoder_spec,
            head: head_spec,
        };
        Ok((spec, CrnnModel::from_parts(encoder, head)))
    }

    /// Rewrite a stored full-precision pair at half precision
    pub fn quantize<B: Backend>(
        &self,
        identity: &str,
        device: &B::Device,
    ) -> Result<ArtifactSet, ExportError> {
        let (spec, model) = self.load_model::<B>(identity, Precision::Full, device)?;

        let mut handles = Vec::new();
        let mut written = Vec::new();
        for part in [Part::Encoder, Part::Detector] {
            match self.export_part(&model, &spec, part, Precision::Half, &mut written) {
                Ok(handle) => handles.push(handle),
                Err(err) if written.is_empty() => return Err(err),
                Err(err) => {
                    return Err(ExportError::Partial {
                        written,
                        source: Box::new(err),
                    })
                }
            }
        }

        info!("Quantized {}", identity);
        Ok(ArtifactSet {
            identity: identity.to_string(),
            handles,
        })
    }

    /// Identities with a full-precision encoder in the store, sorted
    pub fn list_identities(&self) -> Result<Vec<String>, ExportError> {
        let suffix = format!("_{}.{WEIGHTS_EXTENSION}", Part::Encoder.suffix());
        let entries = fs::read_dir(&self.root).map_err(|source| ExportError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut identities = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ExportError::Io {
                path: self.root.clone(),
                source,
            })?;
            let name = entry.file_name();
            if let Some(identity) = name.to_str().and_then(|n| n.strip_suffix(&suffix)) {
                identities.push(identity.to_string());
            }
        }

        identities.sort();
        Ok(identities)
    }
}

fn save_module<B: Backend, M: Module<B>>(
    module: M,
    precision: Precision,
    path: &Path,
) -> Result<(), ExportError> {
    let result = match precision {
        Precision::Full => module.save_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
        ),
        Precision::Half => module.save_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<HalfPrecisionSettings>::new(),
        ),
    };

    result.map_err(|err| ExportError::Recorder {
        path: path.to_path_buf(),
        message: format!("{err:?}"),
    })
}

fn load_module<B: Backend, M: Module<B>>(
    module: M,
    precision: Precision,
    path: &Path,
    device: &B::Device,
) -> Result<M, ExportError> {
    if !path.is_file() {
        return Err(ExportError::Missing(path.to_path_buf()));
    }

    let result = match precision {
        Precision::Full => module.load_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        ),
        Precision::Half => module.load_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<HalfPrecisionSettings>::new(),
            device,
        ),
    };

    result.map_err(|err| ExportError::Recorder {
        path: path.to_path_buf(),
        message: format!("{err:?}"),
    })
}

fn write_metadata(path: &Path, meta: &PartMetadata) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(meta).map_err(|source| ExportError::Metadata {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
