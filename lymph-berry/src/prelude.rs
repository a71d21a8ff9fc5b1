//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx3d, RegionCode};

pub use crate::data::save::{save_instance_map, NiftiWrite};
pub use crate::data::{AtlasVolume, Geometry, IntensityVolume, LesionMask, SubjectVolumes, VolumeAttr};

pub use crate::config::AnalysisConfig;
pub use crate::consts::label::{ATLAS_BACKGROUND, EXTREMITIES, TRUNC};
pub use crate::dataset::{self, discover, subject_loader, DiscoveryOptions, SubjectPaths};
pub use crate::error::{StageError, StageResult};

pub use crate::lesion::{Connectivity, LesionId, LesionRecord};
pub use crate::region::{RegionAssignment, RegionCatalog};
pub use crate::staging::{StageRule, StageTable, SubjectReport};

pub use crate::pipeline::{analyze, process_subject, run_batch, BatchOptions, BatchResult, OutputOptions};
pub use crate::report::describe_into;
