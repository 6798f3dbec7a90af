pub mod identity;
pub mod init;
pub mod queries;
pub mod reservation;
