//! State captures: live through the monitor console, offline through the
//! disk-image tool. Both report the same [`StateCapture`](vmctl_core::StateCapture).

mod listing;
mod live;
mod offline;

pub use listing::{parse_console_listing, parse_tool_listing, MIN_CONSOLE_COLUMNS, MIN_TOOL_COLUMNS};
pub use live::LiveCoordinator;
pub use offline::{DiskTool, ImageInfo, OfflineCoordinator, QemuImg, ToolOutput};
