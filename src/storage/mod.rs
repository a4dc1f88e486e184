pub mod templates;

pub use templates::{TemplateRecord, TemplateRegistry, TemplateRegistryError, TemplateStatistics};
