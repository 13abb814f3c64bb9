pub mod codes;
pub mod hash;
pub mod jwt;
