mod registry;
mod style;

pub use registry::{AssetTypeConfig, AssetTypeRegistry};
pub use style::StyleFragments;
