//! Room codes and room identity

pub mod code;

pub use code::RoomCode;
