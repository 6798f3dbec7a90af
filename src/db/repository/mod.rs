pub mod directory;
pub mod donation;
pub mod notification;

pub use directory::{UserDirectory, UserRepository};
pub use donation::{DonationRepository, DonationStore};
pub use notification::{NotificationLedger, NotificationRepository};
