//! `impl Database` blocks, one file per entity.

mod catalog;
mod drive;
mod file;
mod job;
mod organize;

pub use drive::DriveObservation;
