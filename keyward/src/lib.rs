pub mod ip;
pub mod logger;
pub mod protocol;
pub mod tls;
pub mod version;

pub use ip::{IpClass, classify, is_public};
pub use protocol::{CheckInRequest, CheckInResponse, UpdateNotice};
pub use version::{Version, is_newer};
