mod rolling;

pub use rolling::RollingBuffer;
