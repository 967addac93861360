use std::path::Path;

use tokio::io::AsyncReadExt;
use tracing::info;

use crate::cli::args::{ConfigAction, ConfigArgs, ExecArgs, InitArgs, OutputFormat};
use crate::config::loader::{default_config_toml, get_config_path};
use crate::config::types::GradeboxConfig;
use crate::error::{Result, SandboxError};
use crate::sandbox::{
    available_backends, create_executor, ExecutionRequest, ExecutionResult, Language,
    ResourcePolicy,
};

/// Execute a source file and print the result.
///
/// Returns the submission's exit code so `main` can mirror it.
pub async fn exec(args: ExecArgs, config: GradeboxConfig, format: OutputFormat) -> Result<i32> {
    let source_code = read_source(&args.source).await?;
    let stdin_payload = match (&args.stdin, &args.stdin_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => tokio::fs::read_to_string(path).await?,
        (None, None) => String::new(),
    };

    info!(
        source = %args.source.display(),
        language = %args.language,
        timeout_secs = args.timeout,
        "Executing submission"
    );

    let executor = create_executor(&config).await?;
    let request = ExecutionRequest::new(source_code, args.language)
        .with_stdin(stdin_payload)
        .with_timeout(args.timeout);
    let result = executor.execute(&request).await;

    output_execution_result(&result, format)?;

    Ok(result.exit_code)
}

/// List execution backends
pub async fn backends(config: GradeboxConfig, format: OutputFormat) -> Result<()> {
    let backends = available_backends(&config).await;

    match format {
        OutputFormat::Text => {
            println!("{:<10} {:<10} {:<10} DESCRIPTION", "BACKEND", "STATUS", "ISOLATED");
            println!("{}", "-".repeat(70));
            for backend in &backends {
                let status = if backend.available { "available" } else { "missing" };
                print!(
                    "{:<10} {:<10} {:<10} {}",
                    backend.name,
                    status,
                    if backend.sandboxed { "yes" } else { "NO" },
                    backend.description
                );
                match backend.unavailable_reason {
                    Some(reason) => println!(" ({})", reason),
                    None => println!(),
                }
            }
        }
        OutputFormat::Json => {
            let json: Vec<_> = backends
                .iter()
                .map(|b| {
                    serde_json::json!({
                        "name": b.name,
                        "available": b.available,
                        "sandboxed": b.sandboxed,
                        "description": b.description,
                        "unavailable_reason": b.unavailable_reason,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

/// List supported languages
pub fn languages(config: GradeboxConfig, format: OutputFormat) -> Result<()> {
    let profiles: Vec<_> = Language::ALL.iter().map(|l| l.profile()).collect();
    let image = |name: &str, default: &'static str| -> String {
        config
            .docker
            .images
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    };

    match format {
        OutputFormat::Text => {
            println!("{:<12} {:<10} {:<24} COMMAND", "LANGUAGE", "FILE", "IMAGE");
            println!("{}", "-".repeat(90));
            for profile in &profiles {
                println!(
                    "{:<12} {:<10} {:<24} {}",
                    profile.language.name(),
                    profile.source_filename,
                    image(profile.language.name(), profile.image),
                    profile.run_command_template
                );
            }
            println!();
            println!("Unrecognized languages run as {}.", Language::Python);
        }
        OutputFormat::Json => {
            let json: Vec<_> = profiles
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "language": p.language,
                        "source_filename": p.source_filename,
                        "image": image(p.language.name(), p.image),
                        "run_command": p.run_command_template,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}

/// Show the fixed resource policy
pub fn policy(format: OutputFormat) -> Result<()> {
    let policy = ResourcePolicy::apply();

    match format {
        OutputFormat::Text => {
            println!("Memory:        {} MiB (no swap)", policy.memory_limit_mb);
            println!("CPU:           {} core", policy.cpus);
            println!("Processes:     {}", policy.pids_limit);
            println!("Network:       disabled");
            println!("Root fs:       read-only");
            println!("Code mount:    {} (read-only)", policy.code_mount_path);
            println!("Scratch:       {} tmpfs, {} MiB", policy.scratch_path, policy.scratch_size_mb);
            println!("Capabilities:  none (drop {})", policy.cap_drop);
            println!("New privileges: disabled");
            println!("User:          {}", policy.user);
            println!("Auto-remove:   {}", policy.auto_remove);
            println!();
            println!(
                "docker run {}",
                policy
                    .docker_args(Path::new("<workspace>"))
                    .join(" ")
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&policy)?);
        }
    }

    Ok(())
}

/// Initialize a new gradebox configuration
pub async fn init(args: InitArgs) -> Result<()> {
    let config_path = get_config_path();

    if config_path.exists() && !args.force {
        return Err(SandboxError::Config(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    tokio::fs::write(&config_path, default_config_toml()?).await?;

    println!("Created configuration at {}", config_path.display());
    Ok(())
}

/// Manage configuration
pub async fn config(args: ConfigArgs, config: GradeboxConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            let toml = toml::to_string_pretty(&config)
                .map_err(|e| SandboxError::Config(format!("Failed to serialize config: {}", e)))?;
            println!("{}", toml);
        }
        ConfigAction::Path => {
            println!("{}", get_config_path().display());
        }
    }
    Ok(())
}

async fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut source = String::new();
        tokio::io::stdin().read_to_string(&mut source).await?;
        return Ok(source);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}

fn output_execution_result(result: &ExecutionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if !result.sandboxed {
                eprintln!("warning: executed WITHOUT sandbox isolation");
            }
            if !result.stdout.is_empty() {
                println!("{}", result.stdout);
            }
            if !result.stderr.is_empty() {
                eprintln!("{}", result.stderr);
            }
            if let Some(elapsed) = result.execution_time {
                eprintln!(
                    "exit code {} after {:.2}s",
                    result.exit_code,
                    elapsed.as_secs_f64()
                );
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
    }
    Ok(())
}
