pub mod capture;
pub mod diff;
pub mod window;

pub use capture::{ImportCapture, ScreenCapture};
pub use diff::{diff_percent, Snapshot};
pub use window::{locate_window, Region};
