pub mod screen;

pub use screen::ScannerScreen;
