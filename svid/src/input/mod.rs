mod buffer;
mod columns;
mod geocode;
mod point_input;
mod reader;
mod sampling;

pub use buffer::{buffer_geometry, circle_polygon};
pub use columns::{standardize_column_name, standardize_column_names};
pub use point_input::{InputOptions, PointInput, ResolvedInput};
pub use reader::{read_csv_points, read_geo_file, InputFeature};
pub use sampling::{points_along_linestring, sample_geometry};
