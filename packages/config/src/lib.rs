// ABOUTME: Configuration constants for the sandbox runner
// ABOUTME: Re-exports environment variable names so every package reads the same keys

pub mod constants;
