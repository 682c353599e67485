mod image;
mod job;
mod models;

pub use image::*;
pub use job::*;
pub use models::*;
