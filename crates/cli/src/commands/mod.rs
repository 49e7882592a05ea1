pub mod ask;
pub mod cache;
pub mod doctor;
pub mod init;
pub mod skill;
pub mod status;
