pub mod transforms;

pub use transforms::TransformsService;
