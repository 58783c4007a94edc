// src/handlers/mod.rs

pub mod live;
pub mod participant;
pub mod quiz;
