use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "gradebox")]
#[clap(version, about = "Sandboxed execution of untrusted submissions")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(flatten)]
    pub global_opts: GlobalOpts,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Configuration file path
    #[clap(short, long, global = true, env = "GRADEBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[clap(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a source file in the sandbox
    Exec(ExecArgs),

    /// List execution backends and whether they are usable here
    Backends,

    /// List supported languages
    Languages,

    /// Show the resource policy applied to every sandboxed run
    Policy,

    /// Initialize a new gradebox configuration
    Init(InitArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Source file to execute ("-" reads from stdin)
    pub source: PathBuf,

    /// Submission language (unknown values run as Python)
    #[clap(long, short = 'l', default_value = "python")]
    pub language: String,

    /// Input fed to the program
    #[clap(long, conflicts_with = "stdin_file")]
    pub stdin: Option<String>,

    /// File whose contents are fed to the program
    #[clap(long)]
    pub stdin_file: Option<PathBuf>,

    /// Wall-clock timeout in seconds (0 uses the configured default)
    #[clap(long, short = 't', default_value = "10")]
    pub timeout: u64,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force overwrite existing configuration
    #[clap(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[clap(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show configuration file path
    Path,
}

#[derive(Debug, Clone, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exec() {
        let cli = Cli::parse_from([
            "gradebox", "-vv", "exec", "main.c", "--language", "c", "--stdin", "3 4", "-t", "2",
        ]);
        assert_eq!(cli.global_opts.verbose, 2);
        match cli.command {
            Commands::Exec(args) => {
                assert_eq!(args.source, PathBuf::from("main.c"));
                assert_eq!(args.language, "c");
                assert_eq!(args.stdin.as_deref(), Some("3 4"));
                assert_eq!(args.timeout, 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_stdin_sources_conflict() {
        let parsed = Cli::try_parse_from([
            "gradebox", "exec", "a.py", "--stdin", "x", "--stdin-file", "in.txt",
        ]);
        assert!(parsed.is_err());
    }
}
