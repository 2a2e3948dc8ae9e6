//! Planning services: natural-language filters, stream-table joins, and
//! pipeline cost projection

pub mod cost;
pub mod filter;
pub mod join;

pub use cost::{CostComponent, CostEstimate, CostEstimator, FilterComparison};
pub use filter::{FilterConfig, FilterPlanner};
pub use join::{JoinPlan, JoinPlanner, JoinRequest, JoinValidation};
