mod export;

pub use export::export_all;
