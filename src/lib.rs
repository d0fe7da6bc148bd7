//! matchdesk - moderation and recommended-feed backend for a listings marketplace
//!
//! Realty and auto listings (seller offers) and requirements (buyer search
//! criteria) move through one moderation pipeline. Operators curate an
//! ordered feed of recommended realty listings, by hand or by random draw,
//! and read aggregate statistics over everything.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
