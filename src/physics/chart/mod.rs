pub mod curve;
pub mod compressor;
pub mod pump;
pub mod generic;

use thiserror::Error;

pub use compressor::{CompressorChart, CompressorChartQuery};
pub use curve::ChartCurve;
pub use generic::{GenericChartFromDesignPoint, GenericChartFromInput};
pub use pump::{PumpChart, PumpChartQuery};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    #[error("invalid chart geometry: {reason}")]
    GeometryInvalid { reason: String },
}

/// Where a query landed relative to the chart envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartAreaFlag {
    Internal,
    /// Below minimum flow; recirculation (ASV) lifted the rate onto the curve
    BelowMinimumFlowRecirculated,
    AboveMaximumFlow,
    AboveMaximumHead,
    /// Requested head below the curve; downstream choking assumed
    BelowCurveHeadChoked,
}

impl ChartAreaFlag {
    pub fn is_valid(&self) -> bool {
        !matches!(self, ChartAreaFlag::AboveMaximumFlow | ChartAreaFlag::AboveMaximumHead)
    }
}
