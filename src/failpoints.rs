//! Named injection points for the crash/error-path tests.
//!
//! Only compiled in with `--features failpoints`, matching the
//! `tests/failpoints/` integration test crate.

pub use fail::fail_point;

pub const TRANSPORT_SUBMIT_READ: &str = "transport_submit_read";
pub const TRANSPORT_SUBMIT_WRITE: &str = "transport_submit_write";
pub const COMPLETION_BEFORE_DISSOLVE: &str = "completion_before_dissolve";
pub const DIRTY_BEGIN_BEFORE_MERGE: &str = "dirty_begin_before_merge";
