pub mod loader;
pub mod schema;

pub use loader::{load_ductwork_data, DataLoadError, DuctworkData};
