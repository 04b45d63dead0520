pub mod schema;
pub mod visual;
