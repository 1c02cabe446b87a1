//! SQL plumbing shared by the backends: named-parameter translation and
//! normalization of native result shapes.

pub mod params;
pub mod results;

pub use params::{BoundQuery, NamedParams, ParamValue, PlaceholderStyle, translate};
pub use results::{FieldInfo, QueryResult, Row};
