//! S-record image files.

pub mod srec_file;

pub use srec_file::{ImageSummary, SrecImage, SrecWriter};
