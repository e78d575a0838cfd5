pub mod calendar;
pub mod canvas;
pub mod cli;
pub mod config;
pub mod crm;
pub mod db;
pub mod export;
pub mod grading;
pub mod import;
pub mod mail;
pub mod reports;
