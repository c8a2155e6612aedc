mod update_checker;

pub use update_checker::{DEFAULT_RELEASES_URL, UpdateChecker, UpdateInfo, newer_release};
