pub mod column_filter;
pub mod datetime_range;
pub mod into_utc_trait;
pub mod station;
