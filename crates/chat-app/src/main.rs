use lloom::settings::SettingsStore;
use lloom::shell;

#[tokio::main]
async fn main() {
    let settings = SettingsStore::load();

    // Logs go to stderr so they never interleave with the transcript.
    tracing_subscriber::fmt()
        .with_max_level(settings.settings().log_level())
        .with_writer(std::io::stderr)
        .init();
    tracing::info!(path = ?settings.config_path(), "loaded settings");

    if let Err(error) = shell::run(settings).await {
        tracing::error!(error = %error, "lloom exited with an error");
        eprintln!("lloom: {error}");
        std::process::exit(1);
    }
}
