// src/handlers/mod.rs

pub mod achievements;
pub mod assignments;
pub mod auth;
pub mod certificates;
pub mod courses;
pub mod grading;
pub mod lessons;
pub mod quizzes;
