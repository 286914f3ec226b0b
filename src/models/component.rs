use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// The two independent inspection stations. Every table, counter and row in
/// the core is partitioned by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    /// Outer-diameter station.
    Od,
    /// Big-face station.
    Bf,
}

/// Defect classes the OD vision model is trained on. `roller` marks a clean
/// part; everything else is a defect.
pub const OD_DEFECT_CLASSES: &[&str] = &[
    "roller", "rust", "scratch", "dent", "pit", "burr", "crack",
];

/// Defect classes for the BF station.
pub const BF_DEFECT_CLASSES: &[&str] = &["roller", "rust", "dent", "scratch"];

impl Component {
    pub const ALL: [Component; 2] = [Component::Od, Component::Bf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Od => "od",
            Component::Bf => "bf",
        }
    }

    pub fn parse(value: &str) -> CoreResult<Self> {
        match value {
            "od" => Ok(Component::Od),
            "bf" => Ok(Component::Bf),
            other => Err(CoreError::Validation(format!(
                "unknown component '{other}'"
            ))),
        }
    }

    /// Valid defect vocabulary for this station, in column order.
    pub fn defect_classes(&self) -> &'static [&'static str] {
        match self {
            Component::Od => OD_DEFECT_CLASSES,
            Component::Bf => BF_DEFECT_CLASSES,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
