//! Piece lifecycle, photo attachment and idea ordering for a pottery studio
//! tracker, written against a hosted row store plus object storage.

pub mod config;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod ordering;
pub mod photos;

pub use error::{Error, Result};
pub use gateway::Gateway;
pub use model::{NewPiece, Photo, Piece, PiecePhase, Stage};
