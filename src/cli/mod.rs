mod commands;

pub use commands::{AgentArg, Cli, Commands, DecisionArg, KindArg};
