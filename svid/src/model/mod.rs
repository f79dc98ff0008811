mod query_point;

pub use query_point::{PointTable, QueryPoint, LATITUDE, LAT_LON_ID, LONGITUDE};
