mod text;
mod version;

pub use text::cut;
pub use text::visible_width;
pub use version::Identifier;
pub use version::Version;
pub use version::VersionError;
