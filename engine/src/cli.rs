//! CLI interface for Sentinel
//!
//! This module provides the command-line interface using clap's derive API.
//! The binary is a thin host around the engine: it wires the inference
//! provider, the capability registry, and the session store, then runs
//! turns against them.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sentinel Agent Engine
///
/// An on-device assistant core: a local language model drives a reasoning
/// graph that classifies requests against screen context, runs device
/// capabilities, and answers the user.
#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one conversation turn
    Run {
        /// The user query
        query: String,

        /// Conversation id; turns sharing an id share history
        #[arg(short = 'i', long, default_value = "cli")]
        conversation: String,

        /// File holding screen / environment context to ground the turn
        #[arg(long, value_name = "PATH")]
        context: Option<PathBuf>,
    },

    /// Manage stored conversations
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Check configuration and inference server availability
    Doctor,
}

/// Session management actions
#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// List stored conversations, most recently active first
    List,

    /// Delete all stored conversations
    Clear,
}
