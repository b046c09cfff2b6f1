pub mod error;
pub mod io;
pub mod modis;
pub mod spatial;
pub mod stack;
pub mod terrain;
