pub mod guild;
pub mod ids;
pub mod message;
pub mod permissions;
pub mod team;
pub mod ticket;
pub mod transcript;
