//! Relational store for users, auth records, todos and chats - library exports for testing

pub mod api;
pub mod core;
pub mod infrastructure;
