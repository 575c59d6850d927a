//! floodlabel - resumable VLM annotation of flood-related social media posts.
//!
//! Reads a CSV of TikTok or Twitter posts, sends each row's text and images
//! to a local multimodal model, and writes typed labels back into the table.

pub mod cli;
pub mod config;
pub mod llm;
pub mod media;
pub mod models;
pub mod services;
