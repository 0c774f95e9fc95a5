pub mod bbqr;
pub mod bytewords;
pub mod error;
pub mod fountain;
pub mod ur;
pub mod util;
