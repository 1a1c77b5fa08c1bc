//! Feature engineering: temporal windows, geodesic distance, risk encoding
//! and the assembler that composes them.

pub mod assembler;
pub mod geo;
pub mod risk;
pub mod temporal;

pub use assembler::{AssembledBatch, FallbackCounts, FeatureAssembler};
pub use geo::GeoDistanceCalculator;
pub use risk::{RiskEncoder, RiskFeatures, RiskLookup, RiskTable};
pub use temporal::{AccountTimeline, TemporalFeatureBuilder, TemporalFeatures};
