pub mod converter;
pub mod integrity_validator;
pub mod profile;

pub use converter::Converter;
pub use integrity_validator::IntegrityValidator;
