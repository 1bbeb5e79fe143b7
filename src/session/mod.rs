pub mod navigation;
pub mod pool;
pub mod stealth;

pub use navigation::Navigator;
pub use pool::{PageHandle, PageState, SessionPool};
