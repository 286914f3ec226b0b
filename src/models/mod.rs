mod component;
mod prediction;
mod session;

pub use component::{Component, BF_DEFECT_CLASSES, OD_DEFECT_CLASSES};
pub use prediction::{
    ConfidenceStats, Detection, EventRow, PredictionStatus, PredictionSummary,
};
pub use session::{ComponentStats, SessionRow, SessionState, Stats};
