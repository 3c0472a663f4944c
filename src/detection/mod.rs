//! Detection results and the label contract with the external detector.
//!
//! The detector reports class indices. Instead of assuming a fixed array order, every
//! detector publishes a [`LabelSchema`] (version + names) and the core resolves it by
//! name into the fixed [`ClassLabel`] vocabulary through a [`LabelMap`]. Names outside
//! the vocabulary are ignored; a schema version the core does not understand is
//! rejected when the map is built.

pub mod actuator;
pub mod overlay;

pub use actuator::{signal, ActuatorSignal};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{AppResult, SentryError};

/// Label schema versions this build can resolve.
pub const SUPPORTED_SCHEMA_VERSIONS: &[u32] = &[1];

/// Classes the core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    /// Person operating a vehicle
    Driver,
    /// Forklift (monitored)
    Forklift,
    /// Pedestrian (monitored)
    Person,
}

impl ClassLabel {
    /// Resolve a detector label name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "driver" => Some(ClassLabel::Driver),
            "forklift" => Some(ClassLabel::Forklift),
            "person" => Some(ClassLabel::Person),
            _ => None,
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Driver => "driver",
            ClassLabel::Forklift => "forklift",
            ClassLabel::Person => "person",
        }
    }

    /// Whether the actuator policy watches this class.
    pub fn is_monitored(&self) -> bool {
        matches!(self, ClassLabel::Forklift | ClassLabel::Person)
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Versioned index -> name table published by a detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSchema {
    /// Schema version
    pub version: u32,
    /// Label name for each class index
    pub labels: Vec<String>,
}

impl LabelSchema {
    /// The schema of the stock forklift/person model.
    pub fn v1_default() -> Self {
        Self {
            version: 1,
            labels: vec!["driver".into(), "forklift".into(), "person".into()],
        }
    }
}

/// Resolved class-index table.
#[derive(Debug, Clone)]
pub struct LabelMap {
    version: u32,
    by_index: HashMap<u32, ClassLabel>,
}

impl LabelMap {
    /// Resolve a detector schema.
    ///
    /// # Errors
    /// `SentryError::Detection` if the version is unsupported or no known label appears.
    pub fn from_schema(schema: &LabelSchema) -> AppResult<Self> {
        if !SUPPORTED_SCHEMA_VERSIONS.contains(&schema.version) {
            return Err(SentryError::Detection(format!(
                "Unsupported label schema version {} (supported: {:?})",
                schema.version, SUPPORTED_SCHEMA_VERSIONS
            )));
        }

        let by_index: HashMap<u32, ClassLabel> = schema
            .labels
            .iter()
            .enumerate()
            .filter_map(|(idx, name)| ClassLabel::from_name(name).map(|label| (idx as u32, label)))
            .collect();

        if by_index.is_empty() {
            return Err(SentryError::Detection(
                "Label schema contains none of the known classes".to_string(),
            ));
        }

        Ok(Self {
            version: schema.version,
            by_index,
        })
    }

    /// Schema version this map was built from.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Label for a class index, if it is part of the vocabulary.
    pub fn resolve(&self, class_index: u32) -> Option<ClassLabel> {
        self.by_index.get(&class_index).copied()
    }

    /// Turn raw detector output into a result over known labels.
    pub fn interpret(&self, raw: &[RawDetection]) -> DetectionResult {
        let detections = raw
            .iter()
            .filter_map(|d| {
                self.resolve(d.class_index).map(|label| Detection {
                    label,
                    bbox: d.bbox,
                    confidence: d.confidence,
                })
            })
            .collect();
        DetectionResult::new(detections)
    }
}

/// Axis-aligned box in frame pixel coordinates (x1,y1 inclusive top-left).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge
    pub x1: u32,
    /// Top edge
    pub y1: u32,
    /// Right edge
    pub x2: u32,
    /// Bottom edge
    pub y2: u32,
}

impl BoundingBox {
    /// Construct a box from corners, normalising their order.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }
}

/// One detection as reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Class index in the detector's label schema
    pub class_index: u32,
    /// Box in frame coordinates
    pub bbox: BoundingBox,
    /// Confidence in 0..=1
    pub confidence: f32,
}

/// One detection over the known vocabulary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Resolved class
    pub label: ClassLabel,
    /// Box in frame coordinates
    pub bbox: BoundingBox,
    /// Confidence in 0..=1
    pub confidence: f32,
}

/// Everything detected in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    detections: Vec<Detection>,
    classes: BTreeSet<ClassLabel>,
}

impl DetectionResult {
    /// Build a result from individual detections.
    pub fn new(detections: Vec<Detection>) -> Self {
        let classes = detections.iter().map(|d| d.label).collect();
        Self {
            detections,
            classes,
        }
    }

    /// A result with no detections.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set of classes present.
    pub fn classes(&self) -> &BTreeSet<ClassLabel> {
        &self.classes
    }

    /// Individual detections.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// Actuator signal for this result.
    pub fn signal(&self) -> ActuatorSignal {
        signal(&self.classes)
    }
}
