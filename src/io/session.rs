//! Session manifests.
//!
//! A session is a JSON file naming the CSV matrices of one fitting job plus
//! the scalar settings. Relative paths resolve against the manifest's
//! directory:
//!
//! ```json
//! {
//!   "model": "one-tissue",
//!   "decay_constant": 0.0063,
//!   "scan_times": "frames.csv",
//!   "blood": "blood.csv",
//!   "blood_step": 0.05,
//!   "tac": "tac.csv",
//!   "initial": [0.1, 0.1],
//!   "lower": [0, 0],
//!   "upper": [5, 5],
//!   "sensitive": [1, 1],
//!   "max_iterations": 50
//! }
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::ModelKind;
use crate::fit::{BatchInput, WeightInput};
use crate::io::matrix::read_matrix;
use crate::io::IoError;
use crate::models::{BloodInput, KineticContext, ScanTiming};

fn default_max_iterations() -> usize {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionManifest {
    pub model: ModelKind,
    /// Isotope decay constant (1/time); 0 for decay-corrected data.
    #[serde(default)]
    pub decay_constant: f64,
    /// Frames x 2 (start, end) or frames x 1 (start).
    pub scan_times: PathBuf,
    /// Frame length when `scan_times` holds start times only.
    #[serde(default)]
    pub frame_duration: Option<f64>,
    /// Samples x 1 (plasma) or samples x 2 (plasma, whole blood).
    pub blood: PathBuf,
    pub blood_step: f64,
    /// Frames x voxels.
    pub tac: PathBuf,
    /// Frames x 1 or frames x voxels; unit weights when absent.
    #[serde(default)]
    pub weights: Option<PathBuf>,
    #[serde(default)]
    pub initial: Option<Vec<f64>>,
    /// Params x voxels (or params x 1).
    #[serde(default)]
    pub initial_matrix: Option<PathBuf>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    /// 0/1 per parameter; all free when absent.
    #[serde(default)]
    pub sensitive: Option<Vec<u8>>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

/// A loaded manifest with its shared context built.
#[derive(Debug)]
pub struct Session {
    pub manifest: SessionManifest,
    base_dir: PathBuf,
    context: KineticContext,
}

impl Session {
    pub fn load(path: &Path) -> Result<Self, IoError> {
        let file = File::open(path).map_err(|source| IoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: SessionManifest = serde_json::from_reader(file).map_err(|source| IoError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_manifest(manifest, base_dir)
    }

    /// Build from an in-memory manifest whose relative paths resolve against
    /// `base_dir`.
    pub fn from_manifest(manifest: SessionManifest, base_dir: PathBuf) -> Result<Self, IoError> {
        let resolve = |p: &Path| base_dir.join(p);

        let times = read_matrix(&resolve(&manifest.scan_times))?;
        let timing = ScanTiming::from_matrix(&times, manifest.frame_duration)?;

        let blood = read_matrix(&resolve(&manifest.blood))?;
        let whole_blood = match blood.ncols() {
            1 => None,
            2 => Some(blood.column(1).iter().copied().collect()),
            n => {
                return Err(IoError::Manifest(format!(
                    "blood file has {n} columns; expected 1 (plasma) or 2 (plasma, whole blood)"
                )));
            }
        };
        let blood = BloodInput {
            step: manifest.blood_step,
            plasma: blood.column(0).iter().copied().collect(),
            whole_blood,
        };

        let context = KineticContext::new(manifest.model, timing, blood, manifest.decay_constant)?;
        Ok(Self {
            manifest,
            base_dir,
            context,
        })
    }

    pub fn context(&self) -> &KineticContext {
        &self.context
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    /// Mask flags as booleans; all true when the manifest omits them.
    pub fn sensitive(&self) -> Result<Vec<bool>, IoError> {
        match &self.manifest.sensitive {
            None => Ok(vec![true; self.context.num_params()]),
            Some(flags) => flags
                .iter()
                .map(|&f| match f {
                    0 => Ok(false),
                    1 => Ok(true),
                    other => Err(IoError::Manifest(format!(
                        "sensitive flags must be 0 or 1, got {other}"
                    ))),
                })
                .collect(),
        }
    }

    /// Load the per-voxel data named by the manifest.
    pub fn batch(&self) -> Result<BatchInput, IoError> {
        let m = &self.manifest;
        let tac = read_matrix(&self.resolve(&m.tac))?;
        let weights = match &m.weights {
            Some(p) => WeightInput::from_matrix(read_matrix(&self.resolve(p))?),
            None => WeightInput::uniform(tac.nrows()),
        };
        let initial = match (&m.initial, &m.initial_matrix) {
            (Some(v), None) => DMatrix::from_column_slice(v.len(), 1, v),
            (None, Some(p)) => read_matrix(&self.resolve(p))?,
            (None, None) => {
                return Err(IoError::Manifest(
                    "one of `initial` or `initial_matrix` is required".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(IoError::Manifest(
                    "`initial` and `initial_matrix` are mutually exclusive".to_string(),
                ));
            }
        };

        Ok(BatchInput {
            tac,
            weights,
            initial,
            lower: m.lower.clone(),
            upper: m.upper.clone(),
            sensitive: self.sensitive()?,
            max_iterations: m.max_iterations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample::{feng_plasma, sample_curve};
    use crate::io::matrix::write_matrix;
    use std::fs;

    fn write_inputs(dir: &Path) {
        let starts: Vec<f64> = (0..10).map(|i| i as f64).collect();
        write_matrix(&dir.join("frames.csv"), &DMatrix::from_column_slice(10, 1, &starts)).unwrap();
        let plasma = sample_curve(feng_plasma, 0.1, 12.0);
        write_matrix(
            &dir.join("blood.csv"),
            &DMatrix::from_column_slice(plasma.len(), 1, &plasma),
        )
        .unwrap();
        write_matrix(&dir.join("tac.csv"), &DMatrix::from_element(10, 3, 1.0)).unwrap();
    }

    const MANIFEST: &str = r#"{
        "model": "one-tissue",
        "scan_times": "data/frames.csv",
        "frame_duration": 1.0,
        "blood": "data/blood.csv",
        "blood_step": 0.1,
        "tac": "data/tac.csv",
        "initial": [0.1, 0.1],
        "lower": [0, 0],
        "upper": [5, 5],
        "sensitive": [1, 0]
    }"#;

    #[test]
    fn loads_relative_to_manifest_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        write_inputs(&dir.path().join("data"));
        let path = dir.path().join("session.json");
        fs::write(&path, MANIFEST).unwrap();

        let session = Session::load(&path).unwrap();
        assert_eq!(session.context().num_frames(), 10);
        assert_eq!(session.context().timing().end()[9], 10.0);
        assert_eq!(session.manifest.max_iterations, 100);

        let batch = session.batch().unwrap();
        assert_eq!(batch.tac.shape(), (10, 3));
        assert_eq!(batch.initial.shape(), (2, 1));
        assert_eq!(batch.sensitive, vec![true, false]);
        assert_eq!(batch.weights, WeightInput::uniform(10));
    }

    #[test]
    fn rejects_bad_flags_and_missing_initial() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        write_inputs(&dir.path().join("data"));

        let mut manifest: SessionManifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.sensitive = Some(vec![1, 2]);
        manifest.initial = None;
        let session = Session::from_manifest(manifest, dir.path().to_path_buf()).unwrap();
        assert!(matches!(session.sensitive(), Err(IoError::Manifest(_))));
        assert!(matches!(session.batch(), Err(IoError::Manifest(_))));
    }

    #[test]
    fn missing_frame_duration_is_a_context_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("data")).unwrap();
        write_inputs(&dir.path().join("data"));

        let mut manifest: SessionManifest = serde_json::from_str(MANIFEST).unwrap();
        manifest.frame_duration = None;
        let err = Session::from_manifest(manifest, dir.path().to_path_buf()).unwrap_err();
        assert!(matches!(err, IoError::Context(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let text = MANIFEST.replace("\"tac\"", "\"tacs\"");
        assert!(serde_json::from_str::<SessionManifest>(&text).is_err());
    }
}
