pub mod backup;
pub mod deploy;
pub mod health;
pub mod init;
pub mod rollback;
pub mod secrets;
pub mod status;
pub mod validate;
