// src/models/mod.rs

pub mod achievement;
pub mod assignment;
pub mod attempt;
pub mod certificate;
pub mod course;
pub mod lesson;
pub mod quiz;
pub mod user;
