use anyhow::Context;
use causeway::app::CausewayApp;
use causeway::config::CausewayConfig;
use causeway::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    let config_path = parse_cli_args()?;
    let config =
        CausewayConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    let app = CausewayApp::initialise(config)
        .await
        .context("failed to construct application")?;

    app.run().await.context("application runtime error")
}

fn parse_cli_args() -> anyhow::Result<Option<String>> {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(value);
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    Ok(config_path)
}

fn print_help() {
    println!(
        "\
Usage: causeway [OPTIONS]

Options:
  -c, --config <PATH>    Path to causeway route configuration YAML file
  -h, --help             Print this help message
"
    );
}
